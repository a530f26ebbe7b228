//! Verification data model
//!
//! Claims and results flow from the claim extractor, through the
//! verification engine, to the repair stage. Aggregate status is always
//! derived from the per-item results, never set by hand.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::notation::moves_equivalent;

// ============================================================================
// Engine configuration
// ============================================================================

/// Engine resolved for one verification run; immutable for the run's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub enabled: bool,
    #[serde(rename = "engineURL")]
    pub engine_url: String,
    #[serde(rename = "engineID")]
    pub engine_id: String,
    pub engine_name: String,
    pub domain: String,
    #[serde(rename = "configID")]
    pub config_id: String,
}

impl EngineConfig {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.engine_url.trim_end_matches('/')
    }
}

// ============================================================================
// Engine queries and answers
// ============================================================================

/// Immutable record of one engine query, served live or from cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
    pub cached: bool,
    pub execution_time_ms: u64,
}

/// One candidate move as ranked by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMove {
    #[serde(rename = "move")]
    pub mv: String,
    pub equity: f64,
}

/// Best move plus ranked alternatives, kept on results so repair can act
/// without re-querying the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineData {
    pub best_move: String,
    pub best_equity: f64,
    #[serde(default)]
    pub alternatives: Vec<EngineMove>,
}

impl EngineData {
    /// Best move first, then alternatives in engine order
    pub fn ranked(&self) -> Vec<EngineMove> {
        let mut moves = vec![EngineMove {
            mv: self.best_move.clone(),
            equity: self.best_equity,
        }];
        moves.extend(
            self.alternatives
                .iter()
                .filter(|m| !moves_equivalent(&m.mv, &self.best_move))
                .cloned(),
        );
        moves
    }

    /// Zero-based rank of `mv` among the engine's moves
    pub fn rank_of(&self, mv: &str) -> Option<(usize, EngineMove)> {
        self.ranked()
            .into_iter()
            .enumerate()
            .find(|(_, m)| moves_equivalent(&m.mv, mv))
    }

    pub fn is_best(&self, mv: &str) -> bool {
        moves_equivalent(&self.best_move, mv)
    }

    /// Keep only the best move and `n` alternatives
    pub fn truncated(&self, n: usize) -> Self {
        let ranked = self.ranked();
        Self {
            best_move: self.best_move.clone(),
            best_equity: self.best_equity,
            alternatives: ranked.into_iter().skip(1).take(n).collect(),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Kind of factual assertion found in generated content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    MoveRecommendation,
    PositionEvaluation,
    EquityValue,
    MatchScore,
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimType::MoveRecommendation => "move_recommendation",
            ClaimType::PositionEvaluation => "position_evaluation",
            ClaimType::EquityValue => "equity_value",
            ClaimType::MatchScore => "match_score",
        };
        f.write_str(s)
    }
}

/// Where in the generated content a claim came from. Reporting only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drill_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl ClaimLocation {
    pub fn drill(phase: usize, group: usize, drill: usize) -> Self {
        Self {
            phase_index: Some(phase),
            group_index: Some(group),
            drill_index: Some(drill),
            ..Default::default()
        }
    }

    pub fn lesson(module: usize, unit: usize, lesson: usize) -> Self {
        Self {
            module_index: Some(module),
            unit_index: Some(unit),
            lesson_index: Some(lesson),
            ..Default::default()
        }
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.section = Some(section.to_string());
        self
    }
}

impl fmt::Display for ClaimLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let labelled = [
            ("phase", self.phase_index),
            ("group", self.group_index),
            ("drill", self.drill_index),
            ("module", self.module_index),
            ("unit", self.unit_index),
            ("lesson", self.lesson_index),
        ];
        for (label, idx) in labelled {
            if let Some(i) = idx {
                parts.push(format!("{} {}", label, i + 1));
            }
        }
        if let Some(section) = &self.section {
            parts.push(section.clone());
        }
        if parts.is_empty() {
            f.write_str("(unknown location)")
        } else {
            f.write_str(&parts.join(" > "))
        }
    }
}

/// A single checkable assertion. Read-only once extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationClaim {
    pub id: String,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub content: String,
    pub location: ClaimLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_move: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_position: Option<String>,
}

impl VerificationClaim {
    /// `type:move:position`, deliberately coarse
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.claim_type,
            self.extracted_move.as_deref().unwrap_or(""),
            self.extracted_position.as_deref().unwrap_or("")
        )
    }

    /// Without both a move and a position there is nothing to ask the engine
    pub fn is_verifiable(&self) -> bool {
        self.extracted_move.is_some() && self.extracted_position.is_some()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of checking one claim
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVerificationResult {
    pub claim: VerificationClaim,
    pub verified: bool,
    /// Not checked against the engine; excluded from the status denominator
    pub skipped: bool,
    #[serde(rename = "engineResponse", skip_serializing_if = "Option::is_none")]
    pub engine_data: Option<EngineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClaimVerificationResult {
    pub fn skipped(claim: VerificationClaim, reason: &str) -> Self {
        Self {
            claim,
            verified: true,
            skipped: true,
            engine_data: None,
            discrepancy: None,
            cached: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Outcome of checking one drill's declared correct answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillVerificationResult {
    #[serde(rename = "drillID")]
    pub drill_id: String,
    pub location: ClaimLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_answer: Option<String>,
    pub verified: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_data: Option<EngineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DrillVerificationResult {
    pub fn skipped(drill_id: &str, location: ClaimLocation, reason: &str) -> Self {
        Self {
            drill_id: drill_id.to_string(),
            location,
            declared_answer: None,
            verified: false,
            skipped: true,
            engine_data: None,
            discrepancy: None,
            cached: false,
            reason: Some(reason.to_string()),
        }
    }

    /// Failed and carrying enough engine data to be repaired
    pub fn is_repairable(&self) -> bool {
        !self.verified && !self.skipped && self.engine_data.is_some()
    }
}

/// Trust level of a verified batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    NeedsReview,
    Unverified,
    /// Verification could not run on the content at all
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::NeedsReview => "NEEDS_REVIEW",
            VerificationStatus::Unverified => "UNVERIFIED",
            VerificationStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Counts over one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached: usize,
}

impl VerificationSummary {
    /// Status rule: skipped items are excluded from the denominator;
    /// no checked items is UNVERIFIED, no failures is VERIFIED, more than
    /// `needs_review_threshold` of checked items failing is NEEDS_REVIEW.
    pub fn status(&self, needs_review_threshold: f64) -> VerificationStatus {
        let checked = self.verified + self.failed;
        if checked == 0 {
            VerificationStatus::Unverified
        } else if self.failed == 0 {
            VerificationStatus::Verified
        } else if self.failed as f64 > needs_review_threshold * checked as f64 {
            VerificationStatus::NeedsReview
        } else {
            VerificationStatus::Verified
        }
    }
}

/// Default share of failed items above which a batch needs review
pub const DEFAULT_NEEDS_REVIEW_THRESHOLD: f64 = 0.3;

/// Aggregate for claim-based verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub claims: Vec<ClaimVerificationResult>,
    pub tool_calls: Vec<ToolCallResult>,
    pub summary: VerificationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn from_claims(
        claims: Vec<ClaimVerificationResult>,
        tool_calls: Vec<ToolCallResult>,
        needs_review_threshold: f64,
        reason: Option<String>,
    ) -> Self {
        let mut summary = VerificationSummary {
            total: claims.len(),
            ..Default::default()
        };
        for r in &claims {
            if r.skipped {
                summary.skipped += 1;
            } else if r.verified {
                summary.verified += 1;
            } else {
                summary.failed += 1;
            }
            if r.cached {
                summary.cached += 1;
            }
        }
        Self {
            status: summary.status(needs_review_threshold),
            claims,
            tool_calls,
            summary,
            reason,
        }
    }
}

/// Aggregate for per-drill verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillSeriesVerificationResult {
    pub status: VerificationStatus,
    pub drills: Vec<DrillVerificationResult>,
    pub tool_calls: Vec<ToolCallResult>,
    pub summary: VerificationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DrillSeriesVerificationResult {
    pub fn from_drills(
        drills: Vec<DrillVerificationResult>,
        tool_calls: Vec<ToolCallResult>,
        needs_review_threshold: f64,
        reason: Option<String>,
    ) -> Self {
        let mut summary = VerificationSummary {
            total: drills.len(),
            ..Default::default()
        };
        for r in &drills {
            if r.skipped {
                summary.skipped += 1;
            } else if r.verified {
                summary.verified += 1;
            } else {
                summary.failed += 1;
            }
            if r.cached {
                summary.cached += 1;
            }
        }
        Self {
            status: summary.status(needs_review_threshold),
            drills,
            tool_calls,
            summary,
            reason,
        }
    }

    /// Result for content that could not be verified at all
    pub fn failed(reason: &str) -> Self {
        Self {
            status: VerificationStatus::Failed,
            drills: Vec::new(),
            tool_calls: Vec::new(),
            summary: VerificationSummary::default(),
            reason: Some(reason.to_string()),
        }
    }

    pub fn repairable(&self) -> impl Iterator<Item = &DrillVerificationResult> {
        self.drills.iter().filter(|d| d.is_repairable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(verified: usize, failed: usize, skipped: usize) -> VerificationSummary {
        VerificationSummary {
            total: verified + failed + skipped,
            verified,
            failed,
            skipped,
            cached: 0,
        }
    }

    #[test]
    fn test_status_all_verified() {
        assert_eq!(
            summary(10, 0, 0).status(DEFAULT_NEEDS_REVIEW_THRESHOLD),
            VerificationStatus::Verified
        );
    }

    #[test]
    fn test_status_needs_review_above_threshold() {
        assert_eq!(
            summary(6, 4, 0).status(DEFAULT_NEEDS_REVIEW_THRESHOLD),
            VerificationStatus::NeedsReview
        );
    }

    #[test]
    fn test_status_minor_failures_still_verified() {
        assert_eq!(
            summary(7, 3, 0).status(DEFAULT_NEEDS_REVIEW_THRESHOLD),
            VerificationStatus::Verified
        );
    }

    #[test]
    fn test_status_all_skipped_is_unverified() {
        assert_eq!(
            summary(0, 0, 10).status(DEFAULT_NEEDS_REVIEW_THRESHOLD),
            VerificationStatus::Unverified
        );
    }

    #[test]
    fn test_skipped_excluded_from_denominator() {
        // 1 failure out of 2 checked is 50%, regardless of 20 skipped
        assert_eq!(
            summary(1, 1, 20).status(DEFAULT_NEEDS_REVIEW_THRESHOLD),
            VerificationStatus::NeedsReview
        );
    }

    #[test]
    fn test_engine_data_rank_of() {
        let data = EngineData {
            best_move: "8/5 6/5".to_string(),
            best_equity: 0.16,
            alternatives: vec![
                EngineMove { mv: "24/23 13/10".to_string(), equity: 0.0 },
                EngineMove { mv: "13/10 6/5".to_string(), equity: -0.01 },
            ],
        };
        assert!(data.is_best("6/5 8/5"));
        let (rank, mv) = data.rank_of("13/10 24/23").unwrap();
        assert_eq!(rank, 1);
        assert_eq!(mv.equity, 0.0);
        assert!(data.rank_of("24/18 13/10").is_none());
    }

    #[test]
    fn test_dedup_key_format() {
        let claim = VerificationClaim {
            id: "claim-1".to_string(),
            claim_type: ClaimType::MoveRecommendation,
            content: "Play 8/5 6/5".to_string(),
            location: ClaimLocation::default(),
            extracted_move: Some("8/5 6/5".to_string()),
            extracted_position: Some("opening-3-1".to_string()),
        };
        assert_eq!(claim.dedup_key(), "move_recommendation:8/5 6/5:opening-3-1");
        assert!(claim.is_verifiable());
    }

    #[test]
    fn test_location_display() {
        let loc = ClaimLocation::drill(0, 1, 2).with_section("feedback");
        assert_eq!(loc.to_string(), "phase 1 > group 2 > drill 3 > feedback");
    }
}
