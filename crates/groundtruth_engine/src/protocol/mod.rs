//! Engine protocol layer
//!
//! Two transports reach the analysis engine:
//! - `McpClient`: session-oriented JSON-RPC over HTTP (`/mcp`)
//! - `StatelessToolExecutor`: plain POST to `/api/mcp`, no handshake
//!
//! Both implement `GroundTruthEngine` and hand back normalized
//! `EngineData`, so nothing above this module branches on transport.

pub mod analysis;
pub mod client;
pub mod executor;
pub mod fake;
pub mod rpc;
pub mod session;

use async_trait::async_trait;
use serde_json::Value;

use groundtruth_common::error::Result;
use groundtruth_common::notation::{DiceRoll, PositionRef};
use groundtruth_common::types::{EngineData, ToolCallResult};

use crate::cache::{cache_key, TtlClass};

pub use analysis::parse_engine_data;
pub use client::McpClient;
pub use executor::{StatelessToolExecutor, ToolOutcome};
pub use fake::FakeEngine;
pub use session::{clear_session, Session, SessionRegistry};

/// "Best moves at this position with this roll"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveQuery {
    pub position: PositionRef,
    pub dice: DiceRoll,
    pub top_n: usize,
}

impl MoveQuery {
    pub fn new(position: PositionRef, dice: DiceRoll, top_n: usize) -> Self {
        Self {
            position,
            dice: dice.normalized(),
            top_n,
        }
    }

    /// Identical questions share a key no matter who asks
    pub fn cache_key(&self) -> String {
        cache_key(
            "best_moves",
            &[
                self.position.canonical(),
                self.dice.to_string(),
                self.top_n.to_string(),
            ],
        )
    }

    pub fn ttl_class(&self) -> TtlClass {
        if self.position.is_opening() {
            TtlClass::Opening
        } else {
            TtlClass::Position
        }
    }
}

/// One live engine answer: the request as sent plus the raw and
/// normalized response
#[derive(Debug, Clone)]
pub struct EngineAnswer {
    pub tool_name: String,
    pub arguments: Value,
    pub raw: Value,
    pub data: EngineData,
}

impl EngineAnswer {
    pub fn to_tool_call(&self, cached: bool, execution_time_ms: u64) -> ToolCallResult {
        ToolCallResult {
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
            result: self.raw.clone(),
            cached,
            execution_time_ms,
        }
    }
}

/// Transport-independent view of the analysis engine
#[async_trait]
pub trait GroundTruthEngine: Send + Sync {
    fn engine_url(&self) -> &str;

    /// Short-timeout availability probe; never errors
    async fn health_check(&self) -> bool;

    /// Tool name and arguments this transport sends for `query`
    fn tool_request(&self, query: &MoveQuery) -> (&'static str, Value);

    /// Engine-ranked moves for the query
    async fn best_moves(&self, query: &MoveQuery) -> Result<EngineAnswer>;
}
