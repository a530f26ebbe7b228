//! Engine answer normalization
//!
//! The session and REST transports describe the same analysis with
//! different field names. Everything above the protocol layer sees only
//! `EngineData`.

use serde_json::Value;

use groundtruth_common::error::{GroundTruthError, Result};
use groundtruth_common::types::{EngineData, EngineMove};

const LIST_KEYS: &[&str] = &["moves", "candidates", "topMoves", "top_moves", "alternatives"];
const MOVE_KEYS: &[&str] = &["move", "play", "notation"];
const EQUITY_KEYS: &[&str] = &["equity", "eq", "bestEquity", "best_equity"];
const WRAPPER_KEYS: &[&str] = &["data", "analysis", "result"];

fn first_field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn as_engine_move(item: &Value) -> Option<EngineMove> {
    if let Some(mv) = item.as_str() {
        return Some(EngineMove {
            mv: mv.to_string(),
            equity: 0.0,
        });
    }
    let mv = first_field(item, MOVE_KEYS)?.as_str()?;
    let equity = first_field(item, EQUITY_KEYS)
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    Some(EngineMove {
        mv: mv.to_string(),
        equity,
    })
}

fn has_analysis(body: &Value) -> bool {
    first_field(body, LIST_KEYS).is_some() || first_field(body, &["bestMove", "best_move"]).is_some()
}

/// Normalize any supported engine payload into `EngineData`
pub fn parse_engine_data(raw: &Value) -> Result<EngineData> {
    // Unwrap `{data: {...}}` style envelopes, however deeply nested
    let mut body = raw;
    while !has_analysis(body) {
        match WRAPPER_KEYS
            .iter()
            .find_map(|k| body.get(*k).filter(|v| v.is_object()))
        {
            Some(inner) => body = inner,
            None => break,
        }
    }

    let moves: Vec<EngineMove> = first_field(body, LIST_KEYS)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(as_engine_move).collect())
        .unwrap_or_default();

    let best = match body.get("bestMove").or_else(|| body.get("best_move")) {
        Some(Value::String(mv)) => {
            let equity = first_field(body, &["bestEquity", "best_equity", "equity"])
                .and_then(Value::as_f64)
                .or_else(|| {
                    moves
                        .iter()
                        .find(|m| groundtruth_common::moves_equivalent(&m.mv, mv))
                        .map(|m| m.equity)
                })
                .unwrap_or(0.0);
            Some(EngineMove {
                mv: mv.clone(),
                equity,
            })
        }
        Some(obj @ Value::Object(_)) => as_engine_move(obj),
        _ => moves.first().cloned(),
    };

    let best = best.ok_or_else(|| {
        GroundTruthError::Engine("engine response contains no candidate moves".to_string())
    })?;

    Ok(EngineData {
        alternatives: moves
            .into_iter()
            .filter(|m| !groundtruth_common::moves_equivalent(&m.mv, &best.mv))
            .collect(),
        best_move: best.mv,
        best_equity: best.equity,
    })
}
