//! JSON output for stdout and the stderr error envelope

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};

use groundtruth_common::GroundTruthError;
use groundtruth_engine::{AgentError, LlmError};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `{"error", "message", "type"}` for the first typed error in the chain
pub fn error_envelope(err: &anyhow::Error) -> Value {
    let (code, kind) = err
        .chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<GroundTruthError>() {
                Some((e.code(), "GroundTruthError"))
            } else if let Some(e) = cause.downcast_ref::<AgentError>() {
                Some((e.code(), "AgentError"))
            } else if cause.downcast_ref::<LlmError>().is_some() {
                Some(("llm", "LlmError"))
            } else if cause.downcast_ref::<std::io::Error>().is_some() {
                Some(("io", "IoError"))
            } else if cause.downcast_ref::<serde_json::Error>().is_some() {
                Some(("json", "JsonError"))
            } else {
                None
            }
        })
        .unwrap_or(("error", "Error"));

    json!({
        "error": code,
        "message": format!("{:#}", err),
        "type": kind,
    })
}

pub fn print_error(err: &anyhow::Error) {
    eprintln!("{}", error_envelope(err));
}
