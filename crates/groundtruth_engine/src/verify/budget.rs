//! Overall run deadline
//!
//! Checked before every engine call. Once exhausted no new calls are
//! issued; work already done is still reported.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    started: Instant,
    limit: Duration,
}

impl RunBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_exhausted() {
        let budget = RunBudget::new(Duration::ZERO);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_fresh_budget() {
        let budget = RunBudget::new(Duration::from_secs(300));
        assert!(!budget.is_exhausted());
        assert!(budget.remaining() > Duration::from_secs(290));
    }
}
