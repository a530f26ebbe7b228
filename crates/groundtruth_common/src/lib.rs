//! Ground Truth Common - shared types for verifying generated teaching content
//!
//! Everything here is synchronous and free of network I/O: notation
//! handling, the verification data model, content shapes, configuration
//! and the structured-output parser.

pub mod config;
pub mod content;
pub mod error;
pub mod notation;
pub mod parser;
pub mod types;

pub use config::{ConfigResolver, GroundTruthConfig, StaticConfigResolver};
pub use content::{Curriculum, Drill, DrillOption, DrillSeries, GeneratedContent};
pub use error::{GroundTruthError, Result};
pub use notation::{
    detect_position_type, extract_dice_roll, extract_move, extract_xgid, moves_equivalent,
    normalize_move, DiceRoll, PositionRef, PositionType,
};
pub use parser::{parse_response, ParseFailure, ParseStrategy, Parsed, ResponseSchema};
pub use types::*;
