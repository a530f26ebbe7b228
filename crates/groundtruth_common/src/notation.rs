//! Backgammon notation - moves, dice rolls and position references
//!
//! Pure functions, no I/O. Generated teaching content and the analysis
//! engine both write moves in standard notation (`8/5 6/5`, `bar/22`,
//! `6/off`), but rarely in the same order or with the same decorations,
//! so every comparison goes through `moves_equivalent`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One checker hop: `13/7`, `bar/22`, `6/off`, optional hit marker and repeat count
const SEGMENT: &str = r"(?:bar|2[0-5]|1[0-9]|[1-9])/(?:off|2[0-5]|1[0-9]|[1-9])(?:/(?:off|2[0-5]|1[0-9]|[1-9]))*\*?(?:\([1-4]\))?";

static MULTI_MOVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{seg}(?:[ ,]+{seg}){{1,3}}", seg = SEGMENT))
        .expect("multi-move pattern is valid")
});

static SINGLE_MOVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\b{}", SEGMENT)).expect("single-move pattern is valid"));

static ROLL_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:rolled|rolls|rolling|roll|dice|throw)\s*(?:of|a|an|is|:)?\s*([1-6])\s*[-–x]?\s*([1-6])\b")
        .expect("roll pattern is valid")
});

static DASHED_ROLL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([1-6])[-–]([1-6])\b").expect("dashed roll pattern is valid"));

static OPENING_ROLL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:opening|open)\s+(?:roll\s+)?(?:of\s+)?([1-6])-?([1-6])\b")
        .expect("opening roll pattern is valid")
});

static XGID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"XGID=[-a-oA-O]{26}(?::[^:\s]*){9}").expect("xgid pattern is valid")
});

static OPENING_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^opening[-_:]([1-6])-?([1-6])$").expect("opening ref pattern is valid")
});

/// Words that turn a dashed pair into a match score rather than a roll
const SCORE_CONTEXT: &[&str] = &["lead", "score", "ahead", "trail", "behind", "match", "up "];

/// A roll of two dice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiceRoll {
    pub a: u8,
    pub b: u8,
}

impl DiceRoll {
    /// Build a roll, rejecting faces outside 1..=6
    pub fn new(a: u8, b: u8) -> Option<Self> {
        if (1..=6).contains(&a) && (1..=6).contains(&b) {
            Some(Self { a, b })
        } else {
            None
        }
    }

    /// High die first, the way rolls are conventionally written
    pub fn normalized(&self) -> Self {
        Self {
            a: self.a.max(self.b),
            b: self.a.min(self.b),
        }
    }

    pub fn is_double(&self) -> bool {
        self.a == self.b
    }

    /// Doubles can never be an opening roll
    pub fn is_opening_roll(&self) -> bool {
        !self.is_double()
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.normalized();
        write!(f, "{}-{}", n.a, n.b)
    }
}

/// Where a position came from: the fixed starting position plus an
/// opening roll, or an arbitrary XGID board description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PositionRef {
    Opening(DiceRoll),
    Xgid(String),
}

impl PositionRef {
    /// Parse `opening-3-1`, `opening-31` or an `XGID=...` string
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(caps) = OPENING_REF_RE.captures(raw) {
            let a = caps[1].parse().ok()?;
            let b = caps[2].parse().ok()?;
            let roll = DiceRoll::new(a, b)?;
            return roll.is_opening_roll().then(|| PositionRef::Opening(roll.normalized()));
        }
        XGID_RE
            .find(raw)
            .map(|m| PositionRef::Xgid(m.as_str().to_string()))
    }

    /// Reference for the starting position with the given roll
    pub fn opening(roll: DiceRoll) -> Option<Self> {
        roll.is_opening_roll()
            .then(|| PositionRef::Opening(roll.normalized()))
    }

    /// Dice carried by the reference itself, if any.
    /// XGID field 5 holds the roll as two digits; `00` means not yet rolled.
    pub fn dice(&self) -> Option<DiceRoll> {
        match self {
            PositionRef::Opening(roll) => Some(*roll),
            PositionRef::Xgid(xgid) => {
                let field = xgid.split(':').nth(4)?;
                let mut digits = field.chars().filter_map(|c| c.to_digit(10));
                let a = digits.next()? as u8;
                let b = digits.next()? as u8;
                DiceRoll::new(a, b)
            }
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, PositionRef::Opening(_))
    }

    /// Canonical identifier used in cache keys and claim positions
    pub fn canonical(&self) -> String {
        match self {
            PositionRef::Opening(roll) => {
                let n = roll.normalized();
                format!("opening-{}-{}", n.a, n.b)
            }
            PositionRef::Xgid(xgid) => xgid.clone(),
        }
    }
}

impl fmt::Display for PositionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Coarse position classes recognised in free text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Opening,
    Midgame,
    BearingOff,
    Bar,
    Race,
    Priming,
    Holding,
    Unknown,
}

impl fmt::Display for PositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionType::Opening => "opening",
            PositionType::Midgame => "midgame",
            PositionType::BearingOff => "bearing_off",
            PositionType::Bar => "bar",
            PositionType::Race => "race",
            PositionType::Priming => "priming",
            PositionType::Holding => "holding",
            PositionType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of `detect_position_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDetection {
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xgid: Option<String>,
}

/// Find the first move in `text`. Multi-checker sequences are tried
/// before single hops so `8/5 6/5` is not cut down to `8/5`.
pub fn extract_move(text: &str) -> Option<String> {
    MULTI_MOVE_RE
        .find(text)
        .or_else(|| SINGLE_MOVE_RE.find(text))
        .map(|m| {
            m.as_str()
                .split(|c: char| c == ' ' || c == ',')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
}

/// Find a dice roll in `text`, ignoring dashed pairs that read as match scores
pub fn extract_dice_roll(text: &str) -> Option<DiceRoll> {
    let from_caps = |caps: regex::Captures<'_>| -> Option<DiceRoll> {
        DiceRoll::new(caps[1].parse().ok()?, caps[2].parse().ok()?)
    };

    if let Some(roll) = ROLL_WORD_RE.captures(text).and_then(from_caps) {
        return Some(roll);
    }
    if let Some(roll) = OPENING_ROLL_RE.captures(text).and_then(from_caps) {
        return Some(roll);
    }

    for caps in DASHED_ROLL_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let before = &text[..whole.start()];
        let prefix_start = before
            .char_indices()
            .rev()
            .nth(11)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let prefix = before[prefix_start..].to_lowercase();
        if SCORE_CONTEXT.iter().any(|w| prefix.contains(w)) {
            continue;
        }
        if let Some(roll) = DiceRoll::new(caps[1].parse().ok()?, caps[2].parse().ok()?) {
            return Some(roll);
        }
    }
    None
}

/// First XGID found anywhere in `text`
pub fn extract_xgid(text: &str) -> Option<String> {
    XGID_RE.find(text).map(|m| m.as_str().to_string())
}

/// Lowercase, unify separators (`-` becomes `/`), collapse whitespace
pub fn normalize_move(mv: &str) -> String {
    mv.trim()
        .to_lowercase()
        .replace(['-', '–'], "/")
        .replace(',', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expand a normalized move into single hops: hit markers dropped,
/// `8/5(2)` repeated, `24/18/13` split into `24/18 18/13`.
fn move_segments(normalized: &str) -> Vec<String> {
    let mut segments = Vec::new();
    for token in normalized.split_whitespace() {
        let token = token.replace('*', "");
        let (body, repeat) = match token.find('(') {
            Some(idx) => {
                let count = token[idx + 1..]
                    .trim_end_matches(')')
                    .parse::<usize>()
                    .unwrap_or(1);
                (token[..idx].to_string(), count.max(1))
            }
            None => (token, 1),
        };
        let points: Vec<&str> = body.split('/').filter(|p| !p.is_empty()).collect();
        let hops: Vec<String> = if points.len() >= 2 {
            points
                .windows(2)
                .map(|w| format!("{}/{}", w[0], w[1]))
                .collect()
        } else {
            vec![body.clone()]
        };
        for _ in 0..repeat {
            segments.extend(hops.iter().cloned());
        }
    }
    segments
}

/// Two moves are the same if they contain the same hops in any order
pub fn moves_equivalent(a: &str, b: &str) -> bool {
    let mut left = move_segments(&normalize_move(a));
    let mut right = move_segments(&normalize_move(b));
    if left.is_empty() || right.is_empty() {
        return false;
    }
    left.sort();
    right.sort();
    left == right
}

/// Heuristic classification of free text. Ordered keyword checks, first
/// match wins; this is a hint for prompts and reports, not ground truth.
pub fn detect_position_type(text: &str) -> PositionDetection {
    let lower = text.to_lowercase();
    let xgid = extract_xgid(text);

    let checks: &[(PositionType, f32, &[&str])] = &[
        (
            PositionType::Opening,
            0.9,
            &["opening", "first move", "starting position", "initial position"],
        ),
        (
            PositionType::BearingOff,
            0.85,
            &["bear off", "bearing off", "bearoff", "bear-off"],
        ),
        (
            PositionType::Bar,
            0.8,
            &["on the bar", "from the bar", "bar/", "enter from", "closed out"],
        ),
        (PositionType::Race, 0.75, &["race", "racing", "pip count"]),
        (PositionType::Priming, 0.75, &["prime", "priming"]),
        (
            PositionType::Holding,
            0.7,
            &["anchor", "holding game", "holding position"],
        ),
        (
            PositionType::Midgame,
            0.7,
            &["middle game", "midgame", "mid-game"],
        ),
    ];

    for (position_type, confidence, keywords) in checks {
        if keywords.iter().any(|k| lower.contains(k)) {
            return PositionDetection {
                position_type: *position_type,
                confidence: *confidence,
                xgid,
            };
        }
    }

    // Nothing recognised: callers treat this as a generic middle game
    PositionDetection {
        position_type: PositionType::Unknown,
        confidence: 0.5,
        xgid,
    }
}
