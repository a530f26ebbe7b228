//! Session transport client
//!
//! Handshake: `initialize` returns the session token in the
//! `Mcp-Session-Id` header, then a `notifications/initialized`
//! notification is sent with that token before any tool call.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use groundtruth_common::config::TimeoutSettings;
use groundtruth_common::error::{GroundTruthError, Result};
use groundtruth_common::notation::PositionRef;
use groundtruth_common::types::EngineConfig;

use super::analysis::parse_engine_data;
use super::rpc::{RpcRequest, RpcResponse};
use super::session::{Session, SessionRegistry};
use super::{EngineAnswer, GroundTruthEngine, MoveQuery};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";
const CLIENT_NAME: &str = "groundtruth";

pub const OPENING_TOOL: &str = "get_opening_move";
pub const POSITION_TOOL: &str = "analyze_position";

/// Map a reqwest failure onto the error taxonomy
pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> GroundTruthError {
    if e.is_timeout() {
        GroundTruthError::Timeout(timeout)
    } else {
        GroundTruthError::Transport(format!("Request failed: {}", e))
    }
}

pub struct McpClient {
    config: EngineConfig,
    http: reqwest::Client,
    registry: Arc<SessionRegistry>,
    query_timeout: Duration,
    health_timeout: Duration,
}

impl McpClient {
    pub fn new(config: EngineConfig, timeouts: &TimeoutSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GroundTruthError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            registry: SessionRegistry::global(),
            query_timeout: timeouts.query(),
            health_timeout: timeouts.health(),
        })
    }

    /// Use a private registry instead of the process-wide one
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/mcp", self.config.base_url())
    }

    async fn post(
        &self,
        request: &RpcRequest,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(self.endpoint())
            .header(ACCEPT, ACCEPT_BOTH)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(request);
        if let Some(id) = session_id {
            builder = builder.header(SESSION_HEADER, id);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && session_id.is_some() {
            return Err(GroundTruthError::Protocol(
                "engine no longer recognises the session".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(GroundTruthError::Transport(format!(
                "HTTP {} from {}",
                status,
                self.endpoint()
            )));
        }
        Ok(response)
    }

    async fn read_envelope(response: reqwest::Response, timeout: Duration) -> Result<RpcResponse> {
        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(e, timeout))?;
        RpcResponse::from_body(&body)
    }

    /// Perform the handshake. Callers normally go through `session()`.
    pub async fn initialize(&self) -> Result<Session> {
        let request = RpcRequest::initialize(CLIENT_NAME, env!("CARGO_PKG_VERSION"));
        let response = self.post(&request, None, self.query_timeout).await?;

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                GroundTruthError::Protocol(format!(
                    "initialize response is missing the {} header",
                    SESSION_HEADER
                ))
            })?;
        Self::read_envelope(response, self.query_timeout)
            .await?
            .into_result()?;

        let ready = RpcRequest::notification("notifications/initialized");
        self.post(&ready, Some(&session_id), self.query_timeout)
            .await?;

        info!(engine_url = %self.config.engine_url, "engine session initialized");
        Ok(Session {
            session_id,
            engine_url: self.config.engine_url.clone(),
            initialized: true,
        })
    }

    /// Shared session for this engine URL, created on first use
    pub async fn session(&self) -> Result<Session> {
        self.registry
            .get_or_init(&self.config.engine_url, || self.initialize())
            .await
    }

    pub fn clear_session(&self) -> bool {
        self.registry.clear(&self.config.engine_url)
    }

    /// Invoke a tool and decode its JSON text payload. Transport and
    /// protocol failures drop the session before returning.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        let result = self.call_tool_inner(name, arguments).await;
        if let Err(e) = &result {
            if e.is_unavailable() {
                warn!(engine_url = %self.config.engine_url, tool = name, "tool call failed, dropping session: {}", e);
                self.clear_session();
            }
        }
        result
    }

    async fn call_tool_inner(&self, name: &str, arguments: &Value) -> Result<Value> {
        let session = self.session().await?;
        let request = RpcRequest::tool_call(name, arguments);
        let response = self
            .post(&request, Some(&session.session_id), self.query_timeout)
            .await?;
        Self::read_envelope(response, self.query_timeout)
            .await?
            .into_tool_output()
    }

    /// Tool name and arguments for a query; openings and arbitrary
    /// positions use different tools
    pub fn request_for(query: &MoveQuery) -> (&'static str, Value) {
        match &query.position {
            PositionRef::Opening(roll) => (
                OPENING_TOOL,
                json!({"die1": roll.a, "die2": roll.b, "top_n": query.top_n}),
            ),
            PositionRef::Xgid(xgid) => (
                POSITION_TOOL,
                json!({
                    "xgid": xgid,
                    "dice": format!("{}{}", query.dice.a, query.dice.b),
                    "top_n": query.top_n,
                }),
            ),
        }
    }

    async fn ping(&self) -> Result<()> {
        let session = self.session().await?;
        let response = self
            .post(
                &RpcRequest::new("ping", None),
                Some(&session.session_id),
                self.health_timeout,
            )
            .await?;
        Self::read_envelope(response, self.health_timeout)
            .await?
            .into_result()
            .map(|_| ())
    }
}

#[async_trait]
impl GroundTruthEngine for McpClient {
    fn engine_url(&self) -> &str {
        &self.config.engine_url
    }

    async fn health_check(&self) -> bool {
        match tokio::time::timeout(self.health_timeout, self.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(engine_url = %self.config.engine_url, "health check failed: {}", e);
                if e.is_unavailable() {
                    self.clear_session();
                }
                false
            }
            Err(_) => {
                debug!(engine_url = %self.config.engine_url, "health check timed out");
                self.clear_session();
                false
            }
        }
    }

    fn tool_request(&self, query: &MoveQuery) -> (&'static str, Value) {
        Self::request_for(query)
    }

    async fn best_moves(&self, query: &MoveQuery) -> Result<EngineAnswer> {
        let (tool_name, arguments) = Self::request_for(query);
        let started = Instant::now();
        let raw = self.call_tool(tool_name, &arguments).await?;
        let data = parse_engine_data(&raw)?;
        debug!(
            tool = tool_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            best_move = %data.best_move,
            "engine answered"
        );
        Ok(EngineAnswer {
            tool_name: tool_name.to_string(),
            arguments,
            raw,
            data,
        })
    }
}
