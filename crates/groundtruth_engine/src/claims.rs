//! Claim extraction from generated content
//!
//! Per content item (drill or lesson) the first rule that yields a claim wins:
//! 1. explicit position reference: dice come from the reference itself
//! 2. a dice roll and a move found together in the item's text
//! 3. an XGID plus a move in the text
//! 4. explanatory and feedback prose: "best move is ...", "X is better
//!    than Y", equity mentions, cube actions and match scores
//!
//! Claims are deduplicated on `type:move:position`, first occurrence wins.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use groundtruth_common::content::{Curriculum, Drill, DrillSeries, GeneratedContent, Lesson};
use groundtruth_common::notation::{
    detect_position_type, extract_dice_roll, extract_move, extract_xgid, normalize_move,
    PositionRef, PositionType,
};
use groundtruth_common::types::{ClaimLocation, ClaimType, VerificationClaim};

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?](?:\s+|$)|\n+").expect("sentence pattern is valid"));

static BEST_MOVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:best|correct|right|strongest|top)\s+(?:move|play|choice)\s+(?:here\s+)?(?:is|was|would be)\b")
        .expect("best move pattern is valid")
});

static BETTER_THAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:is|are|was)\s+(?:much\s+|clearly\s+|slightly\s+)?(?:better|stronger|superior)\s+(?:than|to)\b")
        .expect("comparison pattern is valid")
});

static EQUITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bequity\b[^0-9+\-−.]{0,16}([+\-−]?(?:\d+(?:\.\d+)?|\.\d+))")
        .expect("equity pattern is valid")
});

static MATCH_SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:leading|trailing|ahead|behind|up|down|score(?:\s+is)?|at)\s+(\d{1,2})\s*[-–]\s*(\d{1,2})\b|\b(\d{1,2})-away\b")
        .expect("match score pattern is valid")
});

static CUBE_ACTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:no\s+double|too\s+good\s+to\s+double|double[/,]\s*(?:take|pass|drop)|redouble|(?:is|was)\s+an?\s+(?:easy\s+|clear\s+|big\s+|small\s+)?(?:take|pass|drop|double))\b")
        .expect("cube action pattern is valid")
});

/// Stated equity in `text`, if any. Accepts a unicode minus.
pub fn extract_equity(text: &str) -> Option<f64> {
    let caps = EQUITY_RE.captures(text)?;
    caps[1].replace('−', "-").parse().ok()
}

/// A drill or lesson reduced to what extraction looks at
struct ContentItem<'a> {
    location: ClaimLocation,
    position_id: Option<&'a str>,
    answer: Option<&'a str>,
    text: String,
    prose: Vec<(&'static str, String)>,
}

impl<'a> ContentItem<'a> {
    fn from_drill(location: ClaimLocation, drill: &'a Drill) -> Self {
        let mut prose = vec![("explanation", drill.explanation.clone())];
        prose.push(("feedback.correct", drill.feedback.correct.clone()));
        prose.push(("feedback.incorrect", drill.feedback.incorrect.clone()));
        if let Some(partial) = &drill.feedback.partial_credit {
            prose.push(("feedback.partialCredit", partial.clone()));
        }
        Self {
            location,
            position_id: drill.position_id.as_deref(),
            answer: drill.declared_answer(),
            text: drill.scenario_text(),
            prose,
        }
    }

    fn from_lesson(location: ClaimLocation, lesson: &'a Lesson) -> Self {
        let content = &lesson.content;
        let mut text = content.body.clone();
        for example in &content.examples {
            text.push('\n');
            text.push_str(example);
        }
        let mut prose = vec![("body", content.body.clone())];
        prose.extend(content.examples.iter().map(|e| ("examples", e.clone())));
        prose.extend(content.key_points.iter().map(|k| ("keyPoints", k.clone())));

        let practice = lesson.practice.as_ref();
        if let Some(p) = practice {
            text.push('\n');
            text.push_str(&p.question);
            prose.push(("practice.explanation", p.explanation.clone()));
        }
        Self {
            location,
            position_id: practice.and_then(|p| p.position_id.as_deref()),
            answer: practice.and_then(|p| p.correct_answer.as_deref()),
            text,
            prose,
        }
    }

    /// Position implied by the item as a whole, used for prose claims
    fn context_position(&self) -> Option<String> {
        if let Some(pos) = self.position_id.and_then(PositionRef::parse) {
            return Some(pos.canonical());
        }
        if let Some(xgid) = extract_xgid(&self.text) {
            return Some(xgid);
        }
        opening_from_text(&self.text)
    }
}

/// `opening-h-l` when the text reads as an opening and names a non-double roll
pub(crate) fn opening_from_text(text: &str) -> Option<String> {
    if detect_position_type(text).position_type != PositionType::Opening {
        return None;
    }
    let roll = extract_dice_roll(text)?;
    PositionRef::opening(roll).map(|p| p.canonical())
}

fn claim(
    claim_type: ClaimType,
    content: String,
    location: ClaimLocation,
    extracted_move: Option<String>,
    extracted_position: Option<String>,
) -> VerificationClaim {
    VerificationClaim {
        id: String::new(),
        claim_type,
        content,
        location,
        extracted_move: extracted_move.map(|m| normalize_move(&m)),
        extracted_position,
    }
}

fn answer_move(item: &ContentItem<'_>) -> Option<String> {
    item.answer.and_then(extract_move)
}

/// Rule 1: explicit position reference
fn from_position_ref(item: &ContentItem<'_>) -> Option<VerificationClaim> {
    let position = PositionRef::parse(item.position_id?)?;
    let mv = answer_move(item)?;
    let dice = position
        .dice()
        .or_else(|| extract_dice_roll(&item.text))
        .map(|d| format!(" [{}]", d))
        .unwrap_or_default();
    Some(claim(
        ClaimType::MoveRecommendation,
        format!("{}{} -> {}", item.text.trim(), dice, mv),
        item.location.clone(),
        Some(mv),
        Some(position.canonical()),
    ))
}

/// Rule 2: dice roll and move in the text
fn from_dice_and_move(item: &ContentItem<'_>) -> Option<VerificationClaim> {
    let roll = extract_dice_roll(&item.text)?;
    let xgid = extract_xgid(&item.text);
    let mv = match &xgid {
        Some(xgid) => answer_move(item).or_else(|| extract_move(&item.text.replace(xgid, " "))),
        None => answer_move(item).or_else(|| extract_move(&item.text)),
    }?;
    // Without a position the claim is kept but cannot be checked
    let position = xgid.or_else(|| opening_from_text(&item.text));
    Some(claim(
        ClaimType::MoveRecommendation,
        format!("{} [{}] -> {}", item.text.trim(), roll, mv),
        item.location.clone(),
        Some(mv),
        position,
    ))
}

/// Rule 3: XGID plus move
fn from_xgid_and_move(item: &ContentItem<'_>) -> Option<VerificationClaim> {
    let xgid = extract_xgid(&item.text)?;
    let without_xgid = item.text.replace(&xgid, " ");
    let mv = answer_move(item).or_else(|| extract_move(&without_xgid))?;
    Some(claim(
        ClaimType::MoveRecommendation,
        format!("{} -> {}", item.text.trim(), mv),
        item.location.clone(),
        Some(mv),
        Some(xgid),
    ))
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE_END_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Rule 4: claims stated in explanatory prose
fn from_prose(item: &ContentItem<'_>) -> Vec<VerificationClaim> {
    let position = item.context_position();
    let mut claims = Vec::new();

    for (section, text) in &item.prose {
        for sentence in sentences(text) {
            let location = item.location.clone().with_section(section);

            if let Some(m) = BEST_MOVE_RE.find(sentence) {
                if let Some(mv) = extract_move(&sentence[m.end()..]) {
                    claims.push(claim(
                        ClaimType::MoveRecommendation,
                        sentence.to_string(),
                        location.clone(),
                        Some(mv),
                        position.clone(),
                    ));
                }
            } else if let Some(m) = BETTER_THAN_RE.find(sentence) {
                if let Some(mv) = extract_move(&sentence[..m.start()]) {
                    claims.push(claim(
                        ClaimType::MoveRecommendation,
                        sentence.to_string(),
                        location.clone(),
                        Some(mv),
                        position.clone(),
                    ));
                }
            }

            if extract_equity(sentence).is_some() {
                claims.push(claim(
                    ClaimType::EquityValue,
                    sentence.to_string(),
                    location.clone(),
                    extract_move(sentence),
                    position.clone(),
                ));
            }

            if CUBE_ACTION_RE.is_match(sentence) {
                claims.push(claim(
                    ClaimType::PositionEvaluation,
                    sentence.to_string(),
                    location.clone(),
                    None,
                    position.clone(),
                ));
            }

            if MATCH_SCORE_RE.is_match(sentence) {
                claims.push(claim(
                    ClaimType::MatchScore,
                    sentence.to_string(),
                    location,
                    None,
                    None,
                ));
            }
        }
    }
    claims
}

fn extract_from_item(item: &ContentItem<'_>) -> Vec<VerificationClaim> {
    if let Some(c) = from_position_ref(item) {
        return vec![c];
    }
    if let Some(c) = from_dice_and_move(item) {
        return vec![c];
    }
    if let Some(c) = from_xgid_and_move(item) {
        return vec![c];
    }
    from_prose(item)
}

/// Drop claims whose `type:move:position` was already seen
pub fn deduplicate_claims(claims: Vec<VerificationClaim>) -> Vec<VerificationClaim> {
    let mut seen = HashSet::new();
    claims
        .into_iter()
        .filter(|c| seen.insert(c.dedup_key()))
        .collect()
}

fn finish(raw: Vec<VerificationClaim>) -> Vec<VerificationClaim> {
    let found = raw.len();
    let mut claims = deduplicate_claims(raw);
    for (idx, c) in claims.iter_mut().enumerate() {
        c.id = format!("claim-{}", idx + 1);
    }
    debug!(found, kept = claims.len(), "extracted claims");
    claims
}

pub fn extract_drill_series_claims(series: &DrillSeries) -> Vec<VerificationClaim> {
    finish(
        series
            .drills()
            .flat_map(|(loc, drill)| extract_from_item(&ContentItem::from_drill(loc, drill)))
            .collect(),
    )
}

pub fn extract_curriculum_claims(curriculum: &Curriculum) -> Vec<VerificationClaim> {
    finish(
        curriculum
            .lessons()
            .flat_map(|(loc, lesson)| extract_from_item(&ContentItem::from_lesson(loc, lesson)))
            .collect(),
    )
}

pub fn extract_claims(content: &GeneratedContent) -> Vec<VerificationClaim> {
    match content {
        GeneratedContent::DrillSeries(series) => extract_drill_series_claims(series),
        GeneratedContent::Curriculum(curriculum) => extract_curriculum_claims(curriculum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(drills: serde_json::Value) -> DrillSeries {
        serde_json::from_value(json!({
            "seriesTitle": "Test",
            "phases": [{"phase": "P1", "principleGroups": [{"principleId": "g", "drills": drills}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_position_ref_wins() {
        let s = series(json!([{
            "drillId": "d1",
            "scenario": "Start of the game.",
            "question": "Best play?",
            "positionId": "opening-3-1",
            "correctAnswer": "8/5 6/5"
        }]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].id, "claim-1");
        assert_eq!(claims[0].extracted_move.as_deref(), Some("8/5 6/5"));
        assert_eq!(claims[0].extracted_position.as_deref(), Some("opening-3-1"));
    }

    #[test]
    fn test_dice_and_move_in_opening_text() {
        let s = series(json!([{
            "drillId": "d1",
            "scenario": "Your opening roll is 6-1.",
            "question": "How do you play it?",
            "correctAnswer": "13/7 8/7"
        }]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims[0].extracted_position.as_deref(), Some("opening-6-1"));
        assert!(claims[0].is_verifiable());
    }

    #[test]
    fn test_midgame_roll_without_position_is_unverifiable() {
        let s = series(json!([{
            "drillId": "d1",
            "scenario": "In this holding game you rolled 5-2.",
            "question": "What now?",
            "correctAnswer": "13/8 13/11"
        }]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims.len(), 1);
        assert!(!claims[0].is_verifiable());
    }

    #[test]
    fn test_roll_with_xgid_takes_xgid_position() {
        let xgid = "XGID=-b----E-C---eE---c-e----B-:0:0:1:52:0:0:0:0:10";
        let s = series(json!([{
            "drillId": "d1",
            "scenario": format!("You rolled 5-2 here. {}", xgid),
            "question": "Pick the play.",
            "correctAnswer": "13/11 13/8"
        }]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].extracted_move.as_deref(), Some("13/11 13/8"));
        assert_eq!(claims[0].extracted_position.as_deref(), Some(xgid));
        assert!(claims[0].is_verifiable());
    }

    #[test]
    fn test_xgid_and_move() {
        let s = series(json!([{
            "drillId": "d1",
            "scenario": "XGID=-b----E-C---eE---c-e----B-:0:0:1:52:0:0:0:0:10",
            "question": "Pick the play.",
            "correctAnswer": "13/11 13/8"
        }]));
        let claims = extract_drill_series_claims(&s);
        assert!(claims[0]
            .extracted_position
            .as_deref()
            .unwrap()
            .starts_with("XGID="));
    }

    #[test]
    fn test_prose_claims() {
        let s = series(json!([{
            "drillId": "d1",
            "scenario": "A race position.",
            "question": "Cube action?",
            "explanation": "The best move is 24/18 13/11. Its equity: +0.15. This is a clear double.",
            "feedback": {"correct": "Right, leading 3-1 you should be careful.", "incorrect": ""}
        }]));
        let claims = extract_drill_series_claims(&s);
        let types: Vec<ClaimType> = claims.iter().map(|c| c.claim_type).collect();
        assert!(types.contains(&ClaimType::MoveRecommendation));
        assert!(types.contains(&ClaimType::EquityValue));
        assert!(types.contains(&ClaimType::PositionEvaluation));
        assert!(types.contains(&ClaimType::MatchScore));
        let eq = claims.iter().find(|c| c.claim_type == ClaimType::EquityValue).unwrap();
        assert_eq!(extract_equity(&eq.content), Some(0.15));
    }

    #[test]
    fn test_better_than_takes_first_move() {
        let s = series(json!([{
            "drillId": "d1",
            "explanation": "Here 13/9 13/10 is better than 24/21 13/9."
        }]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims[0].extracted_move.as_deref(), Some("13/9 13/10"));
    }

    #[test]
    fn test_dedup_is_first_wins_and_idempotent() {
        let s = series(json!([
            {"drillId": "d1", "positionId": "opening-3-1", "correctAnswer": "8/5 6/5"},
            {"drillId": "d2", "positionId": "opening-3-1", "correctAnswer": "8/5 6/5", "scenario": "again"}
        ]));
        let claims = extract_drill_series_claims(&s);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].location.drill_index, Some(0));

        let again = deduplicate_claims(claims.clone());
        assert_eq!(again.len(), claims.len());
        assert_eq!(again[0].dedup_key(), claims[0].dedup_key());
    }

    #[test]
    fn test_curriculum_practice_position() {
        let curriculum: Curriculum = serde_json::from_value(json!({
            "modules": [{"moduleTitle": "M", "units": [{"unitTitle": "U", "lessons": [{
                "lessonId": "l1",
                "title": "Splitting",
                "content": {"body": "Split early."},
                "practice": {"question": "Play 2-1", "correctAnswer": "13/11 24/23", "positionId": "opening-2-1"}
            }]}]}]
        }))
        .unwrap();
        let claims = extract_curriculum_claims(&curriculum);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].extracted_position.as_deref(), Some("opening-2-1"));
        assert_eq!(claims[0].location.lesson_index, Some(0));
    }

    #[test]
    fn test_extract_equity_variants() {
        assert_eq!(extract_equity("equity of -0.041"), Some(-0.041));
        assert_eq!(extract_equity("Equity = −0.5"), Some(-0.5));
        assert_eq!(extract_equity("no numbers"), None);
    }
}
