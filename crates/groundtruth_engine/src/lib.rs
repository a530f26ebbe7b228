//! Ground Truth Engine - checks generated backgammon content against an
//! authoritative analysis engine
//!
//! Layers, bottom up:
//! - `protocol`: session JSON-RPC and stateless REST transports
//! - `cache`: TTL response cache over memory or SQLite stores
//! - `claims`: claim extraction from drills and lessons
//! - `verify`: claim-based and per-drill verification
//! - `repair`: LLM rewrite of failed drills
//! - `agent`: bounded tool-calling generation loop
//! - `pipeline`: verify, repair, re-verify

pub mod agent;
pub mod cache;
pub mod claims;
pub mod llm_client;
pub mod pipeline;
pub mod protocol;
pub mod repair;
pub mod verify;

pub use agent::{AgentError, AgentLimits, AgentOutput, CachedToolRunner, GenerationAgent, ToolRunner};
pub use cache::{spawn_cache_sweeper, ResponseCache, SweeperGuard};
pub use claims::{deduplicate_claims, extract_claims};
pub use llm_client::{CompletionClient, FakeCompletionClient, HttpCompletionClient, LlmError};
pub use pipeline::{GroundTruthPipeline, PipelineOutcome, Transport};
pub use protocol::{GroundTruthEngine, McpClient, StatelessToolExecutor};
pub use repair::{ContentRepairer, RepairReport};
pub use verify::VerificationEngine;
