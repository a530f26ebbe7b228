//! Generated teaching content shapes
//!
//! Two hierarchies come out of the content-generation service:
//! drill series (phase > principle group > drill) and curricula
//! (module > unit > lesson). Unknown fields are preserved through
//! `extra` so a repaired document round-trips without losing data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ClaimLocation;

/// One answer option of a drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Feedback shown after answering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillFeedback {
    #[serde(default)]
    pub correct: String,
    #[serde(default)]
    pub incorrect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_credit: Option<String>,
}

/// A single practice drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drill {
    pub drill_id: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub question: String,
    /// `opening-3-1` or an XGID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(default)]
    pub options: Vec<DrillOption>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub feedback: DrillFeedback,
    #[serde(default)]
    pub principle_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Drill {
    /// Declared correct answer: the explicit field, else the option flagged correct
    pub fn declared_answer(&self) -> Option<&str> {
        if !self.correct_answer.trim().is_empty() {
            return Some(self.correct_answer.as_str());
        }
        self.options
            .iter()
            .find(|o| o.is_correct)
            .map(|o| o.text.as_str())
    }

    /// All prose a claim could be hiding in, joined for scanning
    pub fn scenario_text(&self) -> String {
        format!("{}\n{}", self.scenario, self.question)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipleGroup {
    #[serde(default)]
    pub principle_id: String,
    #[serde(default)]
    pub principle_name: String,
    #[serde(default)]
    pub drills: Vec<Drill>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub phase_title: String,
    #[serde(default)]
    pub principle_groups: Vec<PrincipleGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// phase > principle group > drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillSeries {
    #[serde(default)]
    pub series_title: String,
    pub phases: Vec<Phase>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DrillSeries {
    /// Every drill with its location, in document order
    pub fn drills(&self) -> impl Iterator<Item = (ClaimLocation, &Drill)> {
        self.phases.iter().enumerate().flat_map(|(p, phase)| {
            phase
                .principle_groups
                .iter()
                .enumerate()
                .flat_map(move |(g, group)| {
                    group
                        .drills
                        .iter()
                        .enumerate()
                        .map(move |(d, drill)| (ClaimLocation::drill(p, g, d), drill))
                })
        })
    }

    pub fn drill_count(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|p| &p.principle_groups)
            .map(|g| g.drills.len())
            .sum()
    }

    pub fn find_drill_mut(&mut self, drill_id: &str) -> Option<&mut Drill> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.principle_groups.iter_mut())
            .flat_map(|g| g.drills.iter_mut())
            .find(|d| d.drill_id == drill_id)
    }

    pub fn find_drill(&self, drill_id: &str) -> Option<&Drill> {
        self.drills()
            .map(|(_, d)| d)
            .find(|d| d.drill_id == drill_id)
    }
}

/// Lesson body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Optional practice question attached to a lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPractice {
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    #[serde(default)]
    pub lesson_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: LessonContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practice: Option<LessonPractice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    #[serde(default)]
    pub unit_title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    #[serde(default)]
    pub module_title: String,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// module > unit > lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    #[serde(default)]
    pub curriculum_title: String,
    pub modules: Vec<Module>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Curriculum {
    pub fn lessons(&self) -> impl Iterator<Item = (ClaimLocation, &Lesson)> {
        self.modules.iter().enumerate().flat_map(|(m, module)| {
            module.units.iter().enumerate().flat_map(move |(u, unit)| {
                unit.lessons
                    .iter()
                    .enumerate()
                    .map(move |(l, lesson)| (ClaimLocation::lesson(m, u, l), lesson))
            })
        })
    }
}

/// Either content hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedContent {
    DrillSeries(DrillSeries),
    Curriculum(Curriculum),
}
