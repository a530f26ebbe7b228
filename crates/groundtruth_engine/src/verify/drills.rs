//! Per-drill verification: every drill's declared answer is checked,
//! whether or not claim extraction found anything in its prose.

use tracing::info;

use groundtruth_common::content::{Drill, DrillSeries};
use groundtruth_common::notation::{extract_move, extract_xgid, normalize_move, PositionRef};
use groundtruth_common::types::{
    ClaimLocation, DrillSeriesVerificationResult, DrillVerificationResult, EngineData,
    ToolCallResult,
};

use super::{LookupFailure, RunBudget, VerificationEngine, REASON_DEADLINE, REASON_ENGINE_UNAVAILABLE};
use crate::claims::opening_from_text;
use crate::protocol::MoveQuery;

/// Alternatives kept on results for the repair stage
const REPAIR_ALTERNATIVES: usize = 3;

/// Position for a drill: explicit reference, XGID in the text, or an
/// opening roll recognised in the text
pub fn drill_position(drill: &Drill) -> Option<PositionRef> {
    if let Some(pos) = drill.position_id.as_deref().and_then(PositionRef::parse) {
        return Some(pos);
    }
    let text = drill.scenario_text();
    extract_xgid(&text)
        .or_else(|| opening_from_text(&text))
        .and_then(|id| PositionRef::parse(&id))
}

fn judge_answer(mv: &str, data: &EngineData, alternative_tolerance: f64) -> (bool, Option<String>) {
    if data.is_best(mv) {
        return (true, None);
    }
    match data.rank_of(mv) {
        Some((_, m)) if data.best_equity - m.equity <= alternative_tolerance => (true, None),
        Some((rank, m)) => (
            false,
            Some(format!(
                "declared answer {} is ranked #{} (equity {:+.3}, {:.3} behind); engine's best move is {} (equity {:+.3})",
                mv,
                rank + 1,
                m.equity,
                data.best_equity - m.equity,
                data.best_move,
                data.best_equity
            )),
        ),
        None => (
            false,
            Some(format!(
                "declared answer {} is not among the engine's moves; engine's best move is {} (equity {:+.3})",
                mv, data.best_move, data.best_equity
            )),
        ),
    }
}

impl VerificationEngine {
    /// Check every drill's declared correct answer. Never fails: an
    /// unreachable engine yields UNVERIFIED with every drill skipped.
    pub async fn verify_drill_series(&self, series: &DrillSeries) -> DrillSeriesVerificationResult {
        let threshold = self.policy.needs_review_threshold;
        let mut tool_calls = Vec::new();

        if !self.engine_available().await {
            let drills = series
                .drills()
                .map(|(loc, d)| DrillVerificationResult::skipped(&d.drill_id, loc, REASON_ENGINE_UNAVAILABLE))
                .collect();
            return DrillSeriesVerificationResult::from_drills(
                drills,
                tool_calls,
                threshold,
                Some(REASON_ENGINE_UNAVAILABLE.to_string()),
            );
        }

        let budget = self.budget();
        let mut results = Vec::with_capacity(series.drill_count());
        let mut deadline_hit = false;
        for (location, drill) in series.drills() {
            let result = self.verify_drill(location, drill, &budget, &mut tool_calls).await;
            deadline_hit |= result.reason.as_deref() == Some(REASON_DEADLINE);
            results.push(result);
        }

        let result = DrillSeriesVerificationResult::from_drills(
            results,
            tool_calls,
            threshold,
            deadline_hit.then(|| format!("{}; partial result", REASON_DEADLINE)),
        );
        info!(
            status = %result.status,
            verified = result.summary.verified,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            cached = result.summary.cached,
            elapsed_ms = budget.elapsed_ms(),
            "drill verification complete"
        );
        result
    }

    async fn verify_drill(
        &self,
        location: ClaimLocation,
        drill: &Drill,
        budget: &RunBudget,
        tool_calls: &mut Vec<ToolCallResult>,
    ) -> DrillVerificationResult {
        let id = drill.drill_id.as_str();
        let Some(declared) = drill.declared_answer() else {
            return DrillVerificationResult::skipped(id, location, "drill has no declared answer");
        };
        let Some(mv) = extract_move(declared).map(|m| normalize_move(&m)) else {
            let mut skipped =
                DrillVerificationResult::skipped(id, location, "declared answer is not in move notation");
            skipped.declared_answer = Some(declared.to_string());
            return skipped;
        };

        let skip = |location: ClaimLocation, reason: &str| {
            let mut skipped = DrillVerificationResult::skipped(id, location, reason);
            skipped.declared_answer = Some(mv.clone());
            skipped
        };

        let Some(position) = drill_position(drill) else {
            return skip(location, "no position reference");
        };
        let Some(dice) = Self::resolve_dice(&position, &drill.scenario_text()) else {
            return skip(location, "no dice roll for position");
        };

        let query = MoveQuery::new(position, dice, self.policy.top_n.max(REPAIR_ALTERNATIVES));
        match self.lookup(&query, budget, tool_calls).await {
            Ok(lookup) => {
                let (verified, discrepancy) =
                    judge_answer(&mv, &lookup.data, self.policy.alternative_tolerance);
                DrillVerificationResult {
                    drill_id: id.to_string(),
                    location,
                    declared_answer: Some(mv),
                    verified,
                    skipped: false,
                    engine_data: Some(lookup.data.truncated(REPAIR_ALTERNATIVES)),
                    discrepancy,
                    cached: lookup.cached,
                    reason: None,
                }
            }
            Err(LookupFailure::Deadline) => skip(location, REASON_DEADLINE),
            Err(LookupFailure::Unavailable(e)) => {
                skip(location, &format!("engine unavailable: {}", e))
            }
            Err(LookupFailure::Rejected(e)) => DrillVerificationResult {
                drill_id: id.to_string(),
                location,
                declared_answer: Some(mv.clone()),
                verified: false,
                skipped: false,
                engine_data: None,
                discrepancy: Some(format!("engine rejected query: {}", e)),
                cached: false,
                reason: None,
            },
        }
    }
}
