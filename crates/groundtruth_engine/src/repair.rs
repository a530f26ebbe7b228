//! Content repair for drills that failed verification
//!
//! One completion per failing drill, never batched: a rewrite must not
//! see other drills. The model supplies new prose; the answer itself and
//! the option flags are set from the engine's data, not trusted to the
//! model. Only `correctAnswer`, `options`, `feedback` and `explanation`
//! are ever touched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use groundtruth_common::config::LlmSettings;
use groundtruth_common::content::{Drill, DrillFeedback, DrillOption, DrillSeries};
use groundtruth_common::notation::{extract_move, moves_equivalent};
use groundtruth_common::parser::{parse_response, ParseFailure, ResponseSchema};
use groundtruth_common::types::{DrillSeriesVerificationResult, EngineData};

use crate::llm_client::{CompletionClient, CompletionRequest, LlmError};

const REPAIR_SYSTEM_PROMPT: &str = "You correct backgammon teaching drills. \
A world-class analysis engine has determined the best move; it is always right. \
Reply with a single JSON object and nothing else.";

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("rewrite rejected: {0}")]
    Rejected(String),
}

/// Outcome of repairing one drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    #[serde(rename = "drillID")]
    pub drill_id: String,
    pub fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields the model is allowed to rewrite
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrillPatch {
    correct_answer: String,
    #[serde(default)]
    options: Option<Vec<DrillOption>>,
    #[serde(default)]
    feedback: Option<DrillFeedback>,
    #[serde(default)]
    explanation: Option<String>,
}

impl ResponseSchema for DrillPatch {
    fn validate(&self) -> Result<(), String> {
        if extract_move(&self.correct_answer).is_none() {
            return Err("correctAnswer is not a move".to_string());
        }
        if let Some(feedback) = &self.feedback {
            if feedback.correct.trim().is_empty() || feedback.incorrect.trim().is_empty() {
                return Err("feedback must cover both the correct and incorrect path".to_string());
            }
        }
        Ok(())
    }

    fn anchor_patterns() -> Vec<String> {
        vec![r#""correctAnswer"\s*:"#.to_string()]
    }
}

/// Make the option matching `best_move` the only correct one. When no
/// option matches, the formerly correct option is rewritten to the best
/// move. Returns false if there was nothing to align.
pub fn align_options(options: &mut [DrillOption], best_move: &str) -> bool {
    let matching = options.iter().position(|o| {
        extract_move(&o.text)
            .map(|mv| moves_equivalent(&mv, best_move))
            .unwrap_or(false)
    });

    let target = match matching {
        Some(idx) => idx,
        None => match options.iter().position(|o| o.is_correct) {
            Some(idx) => {
                options[idx].text = best_move.to_string();
                idx
            }
            None => return false,
        },
    };

    for (idx, option) in options.iter_mut().enumerate() {
        option.is_correct = idx == target;
    }
    true
}

fn build_prompt(drill: &Drill, data: &EngineData) -> Result<String, RepairError> {
    let original = serde_json::to_string_pretty(drill)
        .map_err(|e| RepairError::Rejected(format!("drill not serializable: {}", e)))?;

    let mut alternatives = String::new();
    for (rank, mv) in data.ranked().iter().enumerate().skip(1).take(3) {
        alternatives.push_str(&format!("  #{} {} (equity {:+.3})\n", rank + 1, mv.mv, mv.equity));
    }
    if alternatives.is_empty() {
        alternatives.push_str("  (none reported)\n");
    }

    Ok(format!(
        "ORIGINAL DRILL:\n{original}\n\n\
ENGINE ANALYSIS:\n  best move: {best} (equity {equity:+.3})\n  alternatives:\n{alternatives}\n\
INSTRUCTIONS:\n\
(a) Set correctAnswer to exactly \"{best}\".\n\
(b) Update the options so the option for {best} has isCorrect true and every other option false. \
If an option already shows {best}, keep it and only flip the flags. Do not drop options.\n\
(c) Rewrite feedback.correct and feedback.incorrect, and the explanation, to teach the principle \
behind {best}. Do not just say the engine prefers it.\n\n\
Reply with JSON of the form {{\"correctAnswer\": \"...\", \"options\": [...], \
\"feedback\": {{\"correct\": \"...\", \"incorrect\": \"...\"}}, \"explanation\": \"...\"}}",
        original = original,
        best = data.best_move,
        equity = data.best_equity,
        alternatives = alternatives,
    ))
}

/// Splice a validated patch into a copy of `drill`
fn apply_patch(drill: &Drill, patch: DrillPatch, data: &EngineData) -> Result<Drill, RepairError> {
    if !moves_equivalent(&patch.correct_answer, &data.best_move) {
        return Err(RepairError::Rejected(format!(
            "model answered {} instead of the engine's best move {}",
            patch.correct_answer, data.best_move
        )));
    }

    let mut repaired = drill.clone();
    repaired.correct_answer = data.best_move.clone();

    // Option ids are stable; texts and flags from the model only when
    // it returned the same set of options
    if let Some(options) = patch.options {
        let same_ids = options.len() == drill.options.len()
            && options
                .iter()
                .zip(&drill.options)
                .all(|(new, old)| new.id == old.id);
        if same_ids {
            for (target, new) in repaired.options.iter_mut().zip(options) {
                target.text = new.text;
                target.is_correct = new.is_correct;
            }
        }
    }
    if !repaired.options.is_empty() && !align_options(&mut repaired.options, &data.best_move) {
        return Err(RepairError::Rejected(
            "no option could be aligned with the best move".to_string(),
        ));
    }

    if let Some(feedback) = patch.feedback {
        repaired.feedback.correct = feedback.correct;
        repaired.feedback.incorrect = feedback.incorrect;
        if feedback.partial_credit.is_some() {
            repaired.feedback.partial_credit = feedback.partial_credit;
        }
    }
    if let Some(explanation) = patch.explanation.filter(|e| !e.trim().is_empty()) {
        repaired.explanation = explanation;
    }
    Ok(repaired)
}

pub struct ContentRepairer {
    llm: Arc<dyn CompletionClient>,
    temperature: f32,
}

impl ContentRepairer {
    pub fn new(llm: Arc<dyn CompletionClient>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    pub fn from_settings(llm: Arc<dyn CompletionClient>, settings: &LlmSettings) -> Self {
        Self::new(llm, settings.repair_temperature)
    }

    /// Rewrite one drill against the engine's answer
    pub async fn repair_drill(&self, drill: &Drill, data: &EngineData) -> Result<Drill, RepairError> {
        let prompt = build_prompt(drill, data)?;
        let request = CompletionRequest::simple(REPAIR_SYSTEM_PROMPT, &prompt, self.temperature);
        let response = self.llm.complete(&request).await?;
        let content = response.content.ok_or(LlmError::EmptyResponse)?;
        let parsed = parse_response::<DrillPatch>(&content)?;
        apply_patch(drill, parsed.value, data)
    }

    /// Repair every repairable drill in `result`, in place. A drill whose
    /// rewrite fails keeps its original content.
    pub async fn repair_series(
        &self,
        series: &mut DrillSeries,
        result: &DrillSeriesVerificationResult,
    ) -> Vec<RepairReport> {
        let mut reports = Vec::new();
        for failed in result.repairable() {
            let Some(data) = failed.engine_data.as_ref() else { continue };
            let Some(original) = series.find_drill(&failed.drill_id).cloned() else {
                reports.push(RepairReport {
                    drill_id: failed.drill_id.clone(),
                    fixed: false,
                    reason: Some("drill not found in series".to_string()),
                });
                continue;
            };

            let report = match self.repair_drill(&original, data).await {
                Ok(repaired) => {
                    if let Some(slot) = series.find_drill_mut(&failed.drill_id) {
                        *slot = repaired;
                    }
                    info!(drill_id = %failed.drill_id, best_move = %data.best_move, "drill repaired");
                    RepairReport {
                        drill_id: failed.drill_id.clone(),
                        fixed: true,
                        reason: None,
                    }
                }
                Err(e) => {
                    warn!(drill_id = %failed.drill_id, "repair failed, keeping original: {}", e);
                    RepairReport {
                        drill_id: failed.drill_id.clone(),
                        fixed: false,
                        reason: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{CompletionResponse, FakeCompletionClient};
    use groundtruth_common::types::{
        ClaimLocation, DrillVerificationResult, EngineMove, VerificationStatus,
    };
    use serde_json::json;

    fn doubles_data() -> EngineData {
        EngineData {
            best_move: "13/9 13/9".to_string(),
            best_equity: 0.31,
            alternatives: vec![EngineMove { mv: "13/10 13/9".to_string(), equity: 0.22 }],
        }
    }

    fn series() -> DrillSeries {
        serde_json::from_value(json!({
            "phases": [{"phase": "OPENING", "principleGroups": [{"principleId": "builders", "drills": [{
                "drillId": "d1",
                "positionId": "opening-2-2",
                "scenario": "You rolled 2-2",
                "correctAnswer": "13/10 13/9",
                "options": [
                    {"id": "a", "text": "13/10 13/9", "isCorrect": true},
                    {"id": "b", "text": "13/9 13/9", "isCorrect": false},
                    {"id": "c", "text": "24/20 6/4", "isCorrect": false}
                ],
                "feedback": {"correct": "old", "incorrect": "old"},
                "principleIds": ["builders"]
            }]}]}]
        }))
        .unwrap()
    }

    fn failed_result() -> DrillSeriesVerificationResult {
        let mut failed = DrillVerificationResult::skipped("d1", ClaimLocation::drill(0, 0, 0), "");
        failed.skipped = false;
        failed.reason = None;
        failed.engine_data = Some(doubles_data());
        DrillSeriesVerificationResult::from_drills(vec![failed], Vec::new(), 0.3, None)
    }

    const GOOD_REPLY: &str = r#"Here you go:
```json
{"correctAnswer": "13/9 13/9",
 "feedback": {"correct": "Two builders bring the 5-point closer.", "incorrect": "Stacking wastes pips."},
 "explanation": "Making the 9-point gives a strong blocking structure."}
```"#;

    #[tokio::test]
    async fn test_repair_accepts_prose_wrapped_patch_with_feedback_first() {
        let reply = r#"Sure, here is the fix: {"feedback": {"correct": "Two builders aim at the 5-point.", "incorrect": "Stacking wastes pips."}, "correctAnswer": "13/9 13/9", "explanation": "The 9-point blocks."} Hope that helps."#;
        let repairer = ContentRepairer::new(Arc::new(FakeCompletionClient::always_text(reply)), 0.3);
        let mut s = series();
        let reports = repairer.repair_series(&mut s, &failed_result()).await;

        assert!(reports[0].fixed);
        assert_eq!(s.find_drill("d1").unwrap().correct_answer, "13/9 13/9");
    }

    #[test]
    fn test_align_flips_existing_option() {
        let mut options = series().find_drill("d1").unwrap().options.clone();
        assert!(align_options(&mut options, "13/9 13/9"));
        let flags: Vec<bool> = options.iter().map(|o| o.is_correct).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(options[1].text, "13/9 13/9");
        assert_eq!(options[0].text, "13/10 13/9");
    }

    #[test]
    fn test_align_rewrites_correct_option_when_no_match() {
        let mut options = series().find_drill("d1").unwrap().options.clone();
        assert!(align_options(&mut options, "24/22 24/22 6/4 6/4"));
        assert_eq!(options[0].text, "24/22 24/22 6/4 6/4");
        assert!(options[0].is_correct);
        assert!(!options[1].is_correct);
    }

    #[tokio::test]
    async fn test_repair_series_splices_only_rewritable_fields() {
        let llm = Arc::new(FakeCompletionClient::always_text(GOOD_REPLY));
        let repairer = ContentRepairer::new(llm.clone(), 0.3);
        let mut s = series();
        let reports = repairer.repair_series(&mut s, &failed_result()).await;

        assert_eq!(reports, vec![RepairReport { drill_id: "d1".to_string(), fixed: true, reason: None }]);
        let drill = s.find_drill("d1").unwrap();
        assert_eq!(drill.correct_answer, "13/9 13/9");
        let flags: Vec<bool> = drill.options.iter().map(|o| o.is_correct).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert!(drill.feedback.correct.contains("builders"));
        assert_eq!(drill.position_id.as_deref(), Some("opening-2-2"));
        assert_eq!(drill.principle_ids, vec!["builders".to_string()]);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 0.3);
        let prompt = requests[0].messages[1].content.as_deref().unwrap();
        assert!(prompt.contains("\"drillId\": \"d1\""));
        assert!(prompt.contains("13/9 13/9 (equity +0.310)"));
    }

    #[tokio::test]
    async fn test_invalid_rewrite_keeps_original() {
        let llm = Arc::new(FakeCompletionClient::always_text("Sorry, I can't do that."));
        let repairer = ContentRepairer::new(llm, 0.3);
        let mut s = series();
        let before = s.clone();
        let reports = repairer.repair_series(&mut s, &failed_result()).await;

        assert!(!reports[0].fixed);
        assert!(reports[0].reason.is_some());
        assert_eq!(s, before);
    }

    #[tokio::test]
    async fn test_wrong_answer_from_model_is_rejected() {
        let reply = r#"{"correctAnswer": "13/10 13/9", "explanation": "unchanged"}"#;
        let llm = Arc::new(FakeCompletionClient::new(vec![Ok(CompletionResponse::text(reply))]));
        let repairer = ContentRepairer::new(llm, 0.3);
        let drill = series().find_drill("d1").cloned().unwrap();
        let err = repairer.repair_drill(&drill, &doubles_data()).await.unwrap_err();
        assert!(matches!(err, RepairError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_verified_drills_are_not_sent() {
        let llm = Arc::new(FakeCompletionClient::always_text(GOOD_REPLY));
        let repairer = ContentRepairer::new(llm.clone(), 0.3);
        let ok = DrillSeriesVerificationResult::from_drills(Vec::new(), Vec::new(), 0.3, None);
        assert_eq!(ok.status, VerificationStatus::Unverified);
        let reports = repairer.repair_series(&mut series(), &ok).await;
        assert!(reports.is_empty());
        assert_eq!(llm.call_count(), 0);
    }
}
