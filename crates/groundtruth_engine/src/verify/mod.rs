//! Verification engine
//!
//! Two modes over the same lookup primitive:
//! - claim-based: checks extracted claims, tolerant of missing context
//! - per-item: checks every drill's declared answer directly
//!
//! Both start with a health probe. An unreachable engine marks the whole
//! batch skipped and UNVERIFIED without issuing a single query: content is
//! delivered either way, verification only adds trust.
//!
//! Items are verified one at a time so cache warm-up order is
//! deterministic and a fragile engine is not flooded.

pub mod budget;
pub mod claims;
pub mod drill_count;
pub mod drills;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use groundtruth_common::config::{GroundTruthConfig, VerificationPolicy};
use groundtruth_common::error::GroundTruthError;
use groundtruth_common::notation::{extract_dice_roll, DiceRoll, PositionRef};
use groundtruth_common::types::{EngineData, ToolCallResult};

use crate::cache::ResponseCache;
use crate::protocol::{parse_engine_data, GroundTruthEngine, MoveQuery};

pub use budget::RunBudget;
pub use drill_count::{validate_drill_count, DrillCountCheck};

pub const REASON_ENGINE_UNAVAILABLE: &str = "engine unavailable (health check failed)";
pub const REASON_DEADLINE: &str = "run deadline exceeded";

/// Why a lookup produced no engine data
#[derive(Debug)]
pub(crate) enum LookupFailure {
    /// Run budget spent; no call was made
    Deadline,
    /// Engine unreachable for this query
    Unavailable(GroundTruthError),
    /// Engine answered and refused
    Rejected(GroundTruthError),
}

/// Engine answer for one query, live or cached
#[derive(Debug, Clone)]
pub(crate) struct Lookup {
    pub data: EngineData,
    pub cached: bool,
}

pub struct VerificationEngine {
    engine: Arc<dyn GroundTruthEngine>,
    cache: ResponseCache,
    policy: VerificationPolicy,
    run_timeout: Duration,
}

impl VerificationEngine {
    pub fn new(
        engine: Arc<dyn GroundTruthEngine>,
        cache: ResponseCache,
        policy: VerificationPolicy,
        run_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            cache,
            policy,
            run_timeout,
        }
    }

    pub fn from_config(
        engine: Arc<dyn GroundTruthEngine>,
        cache: ResponseCache,
        config: &GroundTruthConfig,
    ) -> Self {
        Self::new(
            engine,
            cache,
            config.verification.clone(),
            config.timeouts.run(),
        )
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<dyn GroundTruthEngine> {
        &self.engine
    }

    pub(crate) fn budget(&self) -> RunBudget {
        RunBudget::new(self.run_timeout)
    }

    pub(crate) async fn engine_available(&self) -> bool {
        let healthy = self.engine.health_check().await;
        if !healthy {
            warn!(engine_url = %self.engine.engine_url(), "engine failed health check, skipping verification");
        }
        healthy
    }

    /// Dice for a position: carried by the reference, else found in `text`
    pub(crate) fn resolve_dice(position: &PositionRef, text: &str) -> Option<DiceRoll> {
        position.dice().or_else(|| extract_dice_roll(text))
    }

    /// Cache first, then the engine. The raw answer is cached whatever
    /// the verification outcome turns out to be.
    pub(crate) async fn lookup(
        &self,
        query: &MoveQuery,
        budget: &RunBudget,
        tool_calls: &mut Vec<ToolCallResult>,
    ) -> Result<Lookup, LookupFailure> {
        let key = query.cache_key();

        if let Some(raw) = self.cache.check_cache(&key).await {
            match parse_engine_data(&raw) {
                Ok(data) => {
                    let (tool_name, arguments) = self.engine.tool_request(query);
                    tool_calls.push(ToolCallResult {
                        tool_name: tool_name.to_string(),
                        arguments,
                        result: raw,
                        cached: true,
                        execution_time_ms: 0,
                    });
                    return Ok(Lookup { data, cached: true });
                }
                Err(e) => debug!(key = %key, "ignoring unreadable cache entry: {}", e),
            }
        }

        if budget.is_exhausted() {
            return Err(LookupFailure::Deadline);
        }

        let started = Instant::now();
        // The query's own timeout still applies; this caps it at what the run has left
        let answer = match tokio::time::timeout(budget.remaining(), self.engine.best_moves(query)).await {
            Ok(answer) => answer,
            Err(_) => {
                warn!(key = %key, "run deadline reached during engine call");
                return Err(LookupFailure::Deadline);
            }
        };
        match answer {
            Ok(answer) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.cache
                    .cache_for(&key, answer.raw.clone(), query.ttl_class())
                    .await;
                tool_calls.push(answer.to_tool_call(false, elapsed_ms));
                debug!(key = %key, elapsed_ms, cached = false, "engine lookup");
                Ok(Lookup {
                    data: answer.data,
                    cached: false,
                })
            }
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, "engine query failed: {}", e);
                Err(LookupFailure::Unavailable(e))
            }
            Err(e) => {
                debug!(key = %key, "engine rejected query: {}", e);
                Err(LookupFailure::Rejected(e))
            }
        }
    }
}
