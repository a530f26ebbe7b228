//! In-process fake analysis engine speaking both transports.
//!
//! - `POST /mcp`: JSON-RPC with `Mcp-Session-Id` handshake
//! - `POST /api/mcp`: stateless `{tool, args}`
//! - `GET /health`

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use groundtruth_common::types::EngineConfig;

#[derive(Default)]
pub struct EngineState {
    pub initialize_calls: AtomicUsize,
    pub tool_calls: AtomicUsize,
    pub rest_calls: AtomicUsize,
    pub sessions: Mutex<HashSet<String>>,
    /// Answer JSON-RPC as `text/event-stream`
    pub sse: AtomicBool,
    /// Leave the session header off `initialize`
    pub omit_session_header: AtomicBool,
    pub unhealthy: AtomicBool,
    /// Hold `ping` replies for two seconds
    pub slow_ping: AtomicBool,
}

impl EngineState {
    pub fn forget_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }
}

/// Scripted analysis: 3-1 makes the 5-point, 6-1 makes the bar point
fn analysis_for(die1: u64, die2: u64) -> Option<Value> {
    match (die1.max(die2), die1.min(die2)) {
        (3, 1) => Some(json!({
            "moves": [
                {"move": "8/5 6/5", "equity": 0.160},
                {"move": "24/23 13/10", "equity": -0.010},
                {"move": "13/10 6/5", "equity": -0.020}
            ]
        })),
        (6, 1) => Some(json!({
            "moves": [
                {"move": "13/7 8/7", "equity": 0.210},
                {"move": "24/18 13/12", "equity": -0.050}
            ]
        })),
        _ => None,
    }
}

fn rpc_reply(state: &EngineState, id: Value, result: Value) -> Response {
    let envelope = json!({"jsonrpc": "2.0", "id": id, "result": result});
    if state.sse.load(Ordering::SeqCst) {
        let body = format!("event: message\ndata: {}\n\n", envelope);
        ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
    } else {
        Json(envelope).into_response()
    }
}

async fn mcp(State(state): State<Arc<EngineState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let id = body.get("id").cloned().unwrap_or(Value::Null);

    if method == "initialize" {
        let n = state.initialize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("session-{}", n);
        state.sessions.lock().unwrap().insert(session_id.clone());
        let result = json!({"protocolVersion": "2024-11-05", "capabilities": {"tools": {}}});
        if state.omit_session_header.load(Ordering::SeqCst) {
            return rpc_reply(&state, id, result);
        }
        let mut response = rpc_reply(&state, id, result);
        response
            .headers_mut()
            .insert("mcp-session-id", session_id.parse().unwrap());
        return response;
    }

    let known = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| state.sessions.lock().unwrap().contains(s))
        .unwrap_or(false);
    if !known {
        return StatusCode::NOT_FOUND.into_response();
    }

    match method.as_str() {
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "ping" => {
            if state.slow_ping.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            rpc_reply(&state, id, json!({}))
        }
        "tools/call" => {
            state.tool_calls.fetch_add(1, Ordering::SeqCst);
            let args = &body["params"]["arguments"];
            let (die1, die2) = match body["params"]["name"].as_str() {
                Some("get_opening_move") => (
                    args["die1"].as_u64().unwrap_or(0),
                    args["die2"].as_u64().unwrap_or(0),
                ),
                _ => {
                    let dice: Vec<u64> = args["dice"]
                        .as_str()
                        .unwrap_or_default()
                        .chars()
                        .filter_map(|c| c.to_digit(10).map(u64::from))
                        .collect();
                    (dice.first().copied().unwrap_or(0), dice.get(1).copied().unwrap_or(0))
                }
            };
            let result = match analysis_for(die1, die2) {
                Some(analysis) => json!({"content": [{"type": "text", "text": analysis.to_string()}]}),
                None => json!({
                    "content": [{"type": "text", "text": "no analysis for this roll"}],
                    "isError": true
                }),
            };
            rpc_reply(&state, id, result)
        }
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .into_response(),
    }
}

async fn rest(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> Json<Value> {
    state.rest_calls.fetch_add(1, Ordering::SeqCst);
    let dice: Vec<u64> = body["args"]["dice"]
        .as_array()
        .map(|d| d.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    let position = body["args"]["position"].as_str().unwrap_or_default();
    let analysis = if position.starts_with("opening-") && dice.len() == 2 {
        analysis_for(dice[0], dice[1])
    } else {
        None
    };
    Json(match analysis {
        Some(data) => json!({"success": true, "data": data}),
        None => json!({"success": false, "error": format!("cannot analyse {}", position)}),
    })
}

async fn health(State(state): State<Arc<EngineState>>) -> StatusCode {
    if state.unhealthy.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Start the fake engine on an ephemeral port, returning its base URL
pub async fn spawn_engine(state: Arc<EngineState>) -> String {
    let app = Router::new()
        .route("/mcp", post(mcp))
        .route("/api/mcp", post(rest))
        .route("/health", get(health))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn engine_config(url: &str) -> EngineConfig {
    EngineConfig {
        enabled: true,
        engine_url: url.to_string(),
        engine_id: "gnubg".to_string(),
        engine_name: "GNU Backgammon".to_string(),
        domain: "backgammon".to_string(),
        config_id: "test".to_string(),
    }
}
