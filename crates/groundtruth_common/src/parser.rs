//! Structured output recovery from raw model replies
//!
//! Models wrap JSON in prose, markdown fences, or both. Three strategies
//! are tried in order and the first one that yields a schema-valid value
//! wins:
//! 1. the whole reply as JSON
//! 2. each fenced code block, in order
//! 3. shape-specific anchor patterns, then a brace-balanced scan from the
//!    anchor (string and escape aware)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// Fallback anchor when a schema names no fields of its own
const ANY_OBJECT_PATTERN: &str = r"\{";

/// A type the parser can produce from model output
pub trait ResponseSchema: DeserializeOwned {
    /// Semantic checks beyond what deserialization enforces
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Regexes locating the start of this shape in free text, e.g. an
    /// object opening with a known top-level field
    fn anchor_patterns() -> Vec<String> {
        vec![ANY_OBJECT_PATTERN.to_string()]
    }
}

impl ResponseSchema for serde_json::Value {}

/// Strategy that produced (or failed to produce) a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Direct,
    FencedBlock,
    PatternScan,
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseStrategy::Direct => "direct",
            ParseStrategy::FencedBlock => "fenced_block",
            ParseStrategy::PatternScan => "pattern_scan",
        };
        f.write_str(s)
    }
}

/// A successfully parsed reply
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: T,
    pub strategy: ParseStrategy,
}

/// Every strategy was exhausted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("No valid structured output found (tried: {}): {last_error}", attempted_list(.attempted))]
pub struct ParseFailure {
    pub attempted: Vec<ParseStrategy>,
    pub last_error: String,
}

fn attempted_list(attempted: &[ParseStrategy]) -> String {
    attempted
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of one strategy over one reply
enum Attempt<T> {
    Found(T),
    Rejected(String),
}

fn try_candidate<T: ResponseSchema>(candidate: &str) -> Attempt<T> {
    match serde_json::from_str::<T>(candidate.trim()) {
        Ok(value) => match value.validate() {
            Ok(()) => Attempt::Found(value),
            Err(e) => Attempt::Rejected(format!("schema validation failed: {}", e)),
        },
        Err(e) => Attempt::Rejected(format!("invalid JSON: {}", e)),
    }
}

fn strategy_direct<T: ResponseSchema>(text: &str) -> Attempt<T> {
    try_candidate(text)
}

fn strategy_fenced<T: ResponseSchema>(text: &str) -> Attempt<T> {
    let mut last = Attempt::Rejected("no fenced code blocks".to_string());
    for caps in FENCE_RE.captures_iter(text) {
        let Some(block) = caps.get(1) else { continue };
        match try_candidate(block.as_str()) {
            Attempt::Found(v) => return Attempt::Found(v),
            rejected => last = rejected,
        }
    }
    last
}

fn strategy_pattern<T: ResponseSchema>(text: &str) -> Attempt<T> {
    let mut last = Attempt::Rejected("no anchor pattern matched".to_string());
    for pattern in T::anchor_patterns() {
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                last = Attempt::Rejected(format!("bad anchor pattern {}: {}", pattern, e));
                continue;
            }
        };
        for m in re.find_iter(text) {
            // Anchors may start mid-object; try each enclosing brace, innermost first
            for open in enclosing_braces(text, m.start()) {
                let Some(slice) = balanced_object(&text[open..]) else { continue };
                if open + slice.len() <= m.start() {
                    continue;
                }
                match try_candidate(slice) {
                    Attempt::Found(v) => return Attempt::Found(v),
                    rejected => last = rejected,
                }
            }
        }
    }
    last
}

/// Byte offsets of every `{` at or before `at`, nearest first
fn enclosing_braces(text: &str, at: usize) -> Vec<usize> {
    let mut opens: Vec<usize> = text[..at].match_indices('{').map(|(i, _)| i).collect();
    if text[at..].starts_with('{') {
        opens.push(at);
    }
    opens.reverse();
    opens
}

/// Shortest prefix of `text` (which must start with `{`) that closes the
/// opening brace. Braces inside string literals are not counted.
pub fn balanced_object(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model reply into `T`, trying each strategy in order
pub fn parse_response<T: ResponseSchema>(text: &str) -> Result<Parsed<T>, ParseFailure> {
    let strategies: [(ParseStrategy, fn(&str) -> Attempt<T>); 3] = [
        (ParseStrategy::Direct, strategy_direct::<T>),
        (ParseStrategy::FencedBlock, strategy_fenced::<T>),
        (ParseStrategy::PatternScan, strategy_pattern::<T>),
    ];

    let mut attempted = Vec::with_capacity(strategies.len());
    let mut last_error = String::from("empty reply");
    for (strategy, run) in strategies {
        attempted.push(strategy);
        match run(text) {
            Attempt::Found(value) => {
                debug!(strategy = %strategy, "parsed structured reply");
                return Ok(Parsed { value, strategy });
            }
            Attempt::Rejected(reason) => {
                debug!(strategy = %strategy, reason = %reason, "parse strategy rejected reply");
                last_error = reason;
            }
        }
    }

    Err(ParseFailure {
        attempted,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Simple {
        a: f64,
    }

    impl ResponseSchema for Simple {}

    #[derive(Debug, Deserialize)]
    struct Series {
        phases: Vec<serde_json::Value>,
    }

    impl ResponseSchema for Series {
        fn validate(&self) -> Result<(), String> {
            if self.phases.is_empty() {
                return Err("phases must not be empty".to_string());
            }
            Ok(())
        }

        fn anchor_patterns() -> Vec<String> {
            vec![r#"\{\s*"phases"\s*:"#.to_string()]
        }
    }

    #[test]
    fn test_direct_json() {
        let parsed = parse_response::<Simple>(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed.value, Simple { a: 1.0 });
        assert_eq!(parsed.strategy, ParseStrategy::Direct);
    }

    #[test]
    fn test_fenced_block() {
        let reply = "Here's the result:\n```json\n{\"a\":1}\n```\nThanks";
        let parsed = parse_response::<Simple>(reply).unwrap();
        assert_eq!(parsed.value, Simple { a: 1.0 });
        assert_eq!(parsed.strategy, ParseStrategy::FencedBlock);
    }

    #[test]
    fn test_second_fenced_block_wins_when_first_invalid() {
        let reply = "```\nnot json\n```\nand\n```json\n{\"a\": 2}\n```";
        let parsed = parse_response::<Simple>(reply).unwrap();
        assert_eq!(parsed.value.a, 2.0);
    }

    #[test]
    fn test_pattern_scan_with_braces_in_strings() {
        let reply = r#"Sure! The series is {"phases": [{"title": "use {braces} \"freely\""}]} hope it helps"#;
        let parsed = parse_response::<Series>(reply).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::PatternScan);
        assert_eq!(parsed.value.phases.len(), 1);
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Patch {
        correct_answer: String,
        feedback: serde_json::Value,
    }

    impl ResponseSchema for Patch {
        fn anchor_patterns() -> Vec<String> {
            vec![r#""correctAnswer"\s*:"#.to_string()]
        }
    }

    #[test]
    fn test_pattern_scan_finds_enclosing_object_past_nested_one() {
        let reply = r#"Sure, here is the fix: {"feedback": {"correct": "Good.", "incorrect": "No."}, "correctAnswer": "13/9 13/9"} Hope that helps."#;
        let parsed = parse_response::<Patch>(reply).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::PatternScan);
        assert_eq!(parsed.value.correct_answer, "13/9 13/9");
        assert_eq!(parsed.value.feedback["correct"], "Good.");
    }

    #[derive(Debug, Deserialize)]
    struct Accented {}

    impl ResponseSchema for Accented {
        fn anchor_patterns() -> Vec<String> {
            vec!["é".to_string()]
        }
    }

    #[test]
    fn test_anchor_on_multibyte_char_does_not_panic() {
        let parsed = parse_response::<Accented>(r#"voilà {"note": "café"} fin"#).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::PatternScan);
        assert!(parse_response::<Accented>("é only").is_err());
    }

    #[test]
    fn test_schema_invalid_reports_all_strategies() {
        let err = parse_response::<Series>(r#"{"phases": []}"#).unwrap_err();
        assert_eq!(
            err.attempted,
            vec![
                ParseStrategy::Direct,
                ParseStrategy::FencedBlock,
                ParseStrategy::PatternScan
            ]
        );
        assert!(err.last_error.contains("phases must not be empty"));
    }

    #[test]
    fn test_no_json_at_all() {
        let err = parse_response::<Simple>("I cannot help with that.").unwrap_err();
        assert_eq!(err.attempted.len(), 3);
        assert!(err.to_string().contains("direct, fenced_block, pattern_scan"));
    }

    #[test]
    fn test_balanced_object() {
        assert_eq!(balanced_object(r#"{"a":{"b":1}} tail"#), Some(r#"{"a":{"b":1}}"#));
        assert_eq!(balanced_object(r#"{"a":"}"}"#), Some(r#"{"a":"}"}"#));
        assert_eq!(balanced_object(r#"{"a":1"#), None);
        assert_eq!(balanced_object("no brace"), None);
    }
}
