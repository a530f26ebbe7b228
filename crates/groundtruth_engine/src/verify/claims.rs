//! Claim-based verification

use tracing::info;

use groundtruth_common::content::GeneratedContent;
use groundtruth_common::notation::PositionRef;
use groundtruth_common::types::{
    ClaimType, ClaimVerificationResult, EngineData, VerificationClaim, VerificationResult,
};

use super::{LookupFailure, VerificationEngine, REASON_DEADLINE, REASON_ENGINE_UNAVAILABLE};
use crate::claims::{extract_claims, extract_equity};
use crate::protocol::MoveQuery;

/// Pass/fail for one claim given the engine's answer
fn judge_claim(
    claim: &VerificationClaim,
    mv: &str,
    data: &EngineData,
    top_n: usize,
    equity_tolerance: f64,
) -> (bool, Option<String>) {
    let best = format!(
        "engine's best move is {} (equity {:+.3})",
        data.best_move, data.best_equity
    );
    let ranked = data.rank_of(mv).filter(|(rank, _)| *rank < top_n.max(1));

    match claim.claim_type {
        ClaimType::EquityValue => {
            let Some((_, engine_move)) = data.rank_of(mv) else {
                return (
                    false,
                    Some(format!("{} is not among the engine's moves; {}", mv, best)),
                );
            };
            let Some(stated) = extract_equity(&claim.content) else {
                return (true, None);
            };
            let diff = (stated - engine_move.equity).abs();
            if diff <= equity_tolerance {
                (true, None)
            } else {
                (
                    false,
                    Some(format!(
                        "stated equity {:+.3} for {} differs from engine equity {:+.3}; {}",
                        stated, mv, engine_move.equity, best
                    )),
                )
            }
        }
        _ => match ranked {
            Some(_) => (true, None),
            None => (
                false,
                Some(format!(
                    "{} is not among the engine's top {} moves; {}",
                    mv, top_n, best
                )),
            ),
        },
    }
}

impl VerificationEngine {
    /// Extract claims from content and verify them
    pub async fn verify_content(&self, content: &GeneratedContent) -> VerificationResult {
        self.verify_claims(extract_claims(content)).await
    }

    /// Verify claims one at a time. Never fails: an unreachable engine
    /// yields an UNVERIFIED result with every claim skipped.
    pub async fn verify_claims(&self, claims: Vec<VerificationClaim>) -> VerificationResult {
        let threshold = self.policy.needs_review_threshold;
        let mut tool_calls = Vec::new();

        if !self.engine_available().await {
            let results = claims
                .into_iter()
                .map(|c| ClaimVerificationResult::skipped(c, REASON_ENGINE_UNAVAILABLE))
                .collect();
            return VerificationResult::from_claims(
                results,
                tool_calls,
                threshold,
                Some(REASON_ENGINE_UNAVAILABLE.to_string()),
            );
        }

        let budget = self.budget();
        let mut results = Vec::with_capacity(claims.len());
        let mut deadline_hit = false;
        for claim in claims {
            let result = self.verify_claim(claim, &budget, &mut tool_calls).await;
            deadline_hit |= result.reason.as_deref() == Some(REASON_DEADLINE);
            results.push(result);
        }

        let result = VerificationResult::from_claims(
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
            "claim verification complete"
        );
        result
    }

    async fn verify_claim(
        &self,
        claim: VerificationClaim,
        budget: &super::RunBudget,
        tool_calls: &mut Vec<groundtruth_common::types::ToolCallResult>,
    ) -> ClaimVerificationResult {
        // Missing context is assumed correct, never failed
        let (Some(mv), Some(position)) = (claim.extracted_move.clone(), claim.extracted_position.clone()) else {
            return ClaimVerificationResult::skipped(claim, "claim lacks move or position context");
        };
        let Some(position) = PositionRef::parse(&position) else {
            return ClaimVerificationResult::skipped(claim, "unrecognised position reference");
        };
        let Some(dice) = Self::resolve_dice(&position, &claim.content) else {
            return ClaimVerificationResult::skipped(claim, "no dice roll for position");
        };

        let top_n = self.policy.top_n;
        let query = MoveQuery::new(position, dice, top_n);
        match self.lookup(&query, budget, tool_calls).await {
            Ok(lookup) => {
                let (verified, discrepancy) =
                    judge_claim(&claim, &mv, &lookup.data, top_n, self.policy.equity_tolerance);
                ClaimVerificationResult {
                    claim,
                    verified,
                    skipped: false,
                    engine_data: Some(lookup.data.truncated(top_n)),
                    discrepancy,
                    cached: lookup.cached,
                    reason: None,
                }
            }
            Err(LookupFailure::Deadline) => ClaimVerificationResult::skipped(claim, REASON_DEADLINE),
            Err(LookupFailure::Unavailable(e)) => {
                ClaimVerificationResult::skipped(claim, &format!("engine unavailable: {}", e))
            }
            Err(LookupFailure::Rejected(e)) => ClaimVerificationResult {
                claim,
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
