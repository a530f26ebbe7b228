//! Scripted engine for tests and offline runs

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use groundtruth_common::error::{GroundTruthError, Result};
use groundtruth_common::types::EngineData;

use super::{EngineAnswer, GroundTruthEngine, MoveQuery};

/// Answers from a table keyed by `position|dice`
pub struct FakeEngine {
    url: String,
    healthy: AtomicBool,
    analyses: Mutex<HashMap<String, EngineData>>,
    fail_queries: AtomicBool,
    delay: Duration,
    health_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            url: "fake://engine".to_string(),
            healthy: AtomicBool::new(true),
            analyses: Mutex::new(HashMap::new()),
            fail_queries: AtomicBool::new(false),
            delay: Duration::ZERO,
            health_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Engine whose health probe fails
    pub fn unavailable() -> Self {
        let engine = Self::new();
        engine.healthy.store(false, Ordering::SeqCst);
        engine
    }

    /// Script the answer for a position (`opening-3-1` or XGID) and roll (`3-1`)
    pub fn with_analysis(self, position: &str, dice: &str, data: EngineData) -> Self {
        self.analyses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(format!("{}|{}", position, dice), data);
        self
    }

    /// Health passes but every query fails at the transport level
    pub fn failing_queries(self) -> Self {
        self.fail_queries.store(true, Ordering::SeqCst);
        self
    }

    /// Every query takes `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroundTruthEngine for FakeEngine {
    fn engine_url(&self) -> &str {
        &self.url
    }

    async fn health_check(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    fn tool_request(&self, query: &MoveQuery) -> (&'static str, Value) {
        (
            "best_moves",
            json!({
                "position": query.position.canonical(),
                "dice": query.dice.to_string(),
                "top_n": query.top_n,
            }),
        )
    }

    async fn best_moves(&self, query: &MoveQuery) -> Result<EngineAnswer> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(GroundTruthError::Transport("connection reset".to_string()));
        }

        let key = format!("{}|{}", query.position.canonical(), query.dice);
        let data = self
            .analyses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or_else(|| GroundTruthError::Engine(format!("no analysis for {}", key)))?;

        let mut moves = vec![json!({"move": data.best_move, "equity": data.best_equity})];
        moves.extend(
            data.alternatives
                .iter()
                .map(|m| json!({"move": m.mv, "equity": m.equity})),
        );
        let (tool_name, arguments) = self.tool_request(query);
        Ok(EngineAnswer {
            tool_name: tool_name.to_string(),
            arguments,
            raw: json!({"bestMove": data.best_move, "moves": moves}),
            data,
        })
    }
}
