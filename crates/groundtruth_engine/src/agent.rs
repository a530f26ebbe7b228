//! Agentic generation loop
//!
//! The model is offered the engine's tools and may call them before it
//! answers. Hard caps on iterations and cumulative tool calls turn a
//! runaway conversation into a named error; nothing partial is returned.
//! If the engine is down, a single tool-less completion is made instead.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use groundtruth_common::config::{AgentSettings, GroundTruthConfig};
use groundtruth_common::error::GroundTruthError;
use groundtruth_common::notation::normalize_move;
use groundtruth_common::parser::{parse_response, ParseFailure, ParseStrategy, ResponseSchema};

use crate::llm_client::{
    ChatMessage, CompletionClient, CompletionRequest, LlmError, ToolDefinition, Usage,
};
use crate::cache::{cache_key, ResponseCache, TtlClass};
use crate::protocol::executor::{validate_tool_call, GET_BEST_MOVES, QUERY_POSITION, VERIFY_MOVE};
use crate::protocol::{GroundTruthEngine, StatelessToolExecutor, ToolOutcome};

const JSON_ONLY_INSTRUCTION: &str = "The analysis engine is unavailable, so no tools can be called. \
Output JSON only: a single JSON object, no prose and no markdown.";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Iteration or tool-call cap exceeded
    #[error(transparent)]
    Policy(GroundTruthError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("Generation run timed out after {0:?}")]
    Timeout(Duration),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Policy(e) => e.code(),
            AgentError::Llm(_) => "llm",
            AgentError::Parse(_) => "parse",
            AgentError::Timeout(_) => "timeout",
        }
    }
}

/// Where the model's tool calls go
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn available(&self) -> bool;
    async fn run_tool(&self, name: &str, args: &Value) -> ToolOutcome;
}

#[async_trait]
impl ToolRunner for StatelessToolExecutor {
    async fn available(&self) -> bool {
        self.health_check().await
    }

    async fn run_tool(&self, name: &str, args: &Value) -> ToolOutcome {
        self.execute(name, args).await
    }
}

/// Serves repeated engine tool calls from the response cache. Only
/// successful answers are stored; unknown or malformed calls pass through.
pub struct CachedToolRunner {
    inner: Arc<dyn ToolRunner>,
    cache: ResponseCache,
}

impl CachedToolRunner {
    pub fn new(inner: Arc<dyn ToolRunner>, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }
}

/// `h-l` from `[a, b]` or `"ab"`
fn dice_key(dice: &Value) -> String {
    let mut faces: Vec<u64> = match dice {
        Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
        Value::String(s) => s.chars().filter_map(|c| c.to_digit(10).map(u64::from)).collect(),
        _ => Vec::new(),
    };
    faces.sort_unstable_by(|a, b| b.cmp(a));
    faces.iter().map(u64::to_string).collect::<Vec<_>>().join("-")
}

/// Cache key and stability class for a model tool call
fn tool_cache_key(name: &str, args: &Value) -> Option<(String, TtlClass)> {
    validate_tool_call(name, args).ok()?;
    let position = args.get("position")?.as_str()?;
    let dice = args.get("dice").map(dice_key).unwrap_or_default();
    match name {
        QUERY_POSITION => Some((cache_key(name, &[position, dice.as_str()]), TtlClass::Position)),
        VERIFY_MOVE => {
            // Segment order does not change the move
            let normalized = normalize_move(args.get("move")?.as_str()?);
            let mut segments: Vec<&str> = normalized.split(' ').collect();
            segments.sort_unstable();
            let mv = segments.join(" ");
            Some((cache_key(name, &[position, dice.as_str(), mv.as_str()]), TtlClass::MoveCheck))
        }
        GET_BEST_MOVES => {
            let top_n = args
                .get("top_n")
                .and_then(Value::as_u64)
                .map(|n| n.to_string())
                .unwrap_or_default();
            Some((cache_key(name, &[position, dice.as_str(), top_n.as_str()]), TtlClass::MoveCheck))
        }
        _ => None,
    }
}

#[async_trait]
impl ToolRunner for CachedToolRunner {
    async fn available(&self) -> bool {
        self.inner.available().await
    }

    async fn run_tool(&self, name: &str, args: &Value) -> ToolOutcome {
        let Some((key, class)) = tool_cache_key(name, args) else {
            return self.inner.run_tool(name, args).await;
        };
        if let Some(data) = self.cache.check_cache(&key).await {
            debug!(tool = name, key = %key, "tool call served from cache");
            return ToolOutcome {
                success: true,
                data: Some(data),
                error: None,
                unavailable: false,
                execution_time_ms: 0,
            };
        }

        let outcome = self.inner.run_tool(name, args).await;
        if let Some(data) = outcome.data.as_ref().filter(|_| outcome.success) {
            self.cache.cache_for(&key, data.clone(), class).await;
        }
        outcome
    }
}

/// Tool schemas offered to the model
pub fn engine_tools() -> Vec<ToolDefinition> {
    let dice = json!({
        "type": "array",
        "items": {"type": "integer", "minimum": 1, "maximum": 6},
        "minItems": 2,
        "maxItems": 2,
        "description": "The two dice, e.g. [3, 1]"
    });
    let position = json!({
        "type": "string",
        "description": "Position id: opening-<high>-<low> (e.g. opening-3-1) or an XGID"
    });

    vec![
        ToolDefinition {
            name: QUERY_POSITION.to_string(),
            description: "Evaluate a backgammon position".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"position": position, "dice": dice},
                "required": ["position"]
            }),
        },
        ToolDefinition {
            name: VERIFY_MOVE.to_string(),
            description: "Check a move against the engine's analysis of a position and roll".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "position": position,
                    "dice": dice,
                    "move": {"type": "string", "description": "Move in standard notation, e.g. 8/5 6/5"}
                },
                "required": ["position", "dice", "move"]
            }),
        },
        ToolDefinition {
            name: GET_BEST_MOVES.to_string(),
            description: "Ranked best moves with equities for a position and roll".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "position": position,
                    "dice": dice,
                    "top_n": {"type": "integer", "minimum": 1, "maximum": 10}
                },
                "required": ["position", "dice"]
            }),
        },
    ]
}

/// Caps for one generation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_iterations: usize,
    pub max_tool_calls: usize,
    pub run_timeout: Duration,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default(), Duration::from_secs(300))
    }
}

impl AgentLimits {
    pub fn from_settings(settings: &AgentSettings, run_timeout: Duration) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            max_tool_calls: settings.max_tool_calls,
            run_timeout,
        }
    }
}

/// Parsed final answer plus loop accounting
#[derive(Debug, Clone)]
pub struct AgentOutput<T> {
    pub value: T,
    pub strategy: ParseStrategy,
    pub iterations: usize,
    pub tool_calls: usize,
    /// False when the engine was down and the tool-less fallback ran
    pub used_tools: bool,
    pub usage: Usage,
}

/// Final reply text before parsing
struct RawAnswer {
    content: String,
    iterations: usize,
    tool_calls: usize,
    used_tools: bool,
    usage: Usage,
}

fn add_usage(total: &mut Usage, more: &Usage) {
    total.prompt_tokens += more.prompt_tokens;
    total.completion_tokens += more.completion_tokens;
    total.total_tokens += more.total_tokens;
}

pub struct GenerationAgent {
    llm: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolRunner>,
    limits: AgentLimits,
    temperature: f32,
}

impl GenerationAgent {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolRunner>,
        limits: AgentLimits,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            tools,
            limits,
            temperature,
        }
    }

    pub fn from_config(
        llm: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolRunner>,
        config: &GroundTruthConfig,
    ) -> Self {
        Self::new(
            llm,
            tools,
            AgentLimits::from_settings(&config.agent, config.timeouts.run()),
            config.llm.temperature,
        )
    }

    /// Generate structured content, letting the model consult the engine
    pub async fn generate<T: ResponseSchema>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<AgentOutput<T>, AgentError> {
        let raw = tokio::time::timeout(self.limits.run_timeout, self.run(system_prompt, user_prompt))
            .await
            .map_err(|_| AgentError::Timeout(self.limits.run_timeout))??;

        let parsed = parse_response::<T>(&raw.content)?;
        info!(
            iterations = raw.iterations,
            tool_calls = raw.tool_calls,
            used_tools = raw.used_tools,
            strategy = %parsed.strategy,
            "generation complete"
        );
        Ok(AgentOutput {
            value: parsed.value,
            strategy: parsed.strategy,
            iterations: raw.iterations,
            tool_calls: raw.tool_calls,
            used_tools: raw.used_tools,
            usage: raw.usage,
        })
    }

    async fn run(&self, system_prompt: &str, user_prompt: &str) -> Result<RawAnswer, AgentError> {
        if !self.tools.available().await {
            warn!("engine unavailable, generating without tools");
            return self.fallback(system_prompt, user_prompt).await;
        }

        let mut request = CompletionRequest {
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
            tools: engine_tools(),
            temperature: self.temperature,
        };
        let mut usage = Usage::default();
        let mut used = 0usize;

        for iteration in 1..=self.limits.max_iterations {
            let response = self.llm.complete(&request).await?;
            add_usage(&mut usage, &response.usage);

            if response.tool_calls.is_empty() {
                let content = response.content.ok_or(LlmError::EmptyResponse)?;
                return Ok(RawAnswer {
                    content,
                    iterations: iteration,
                    tool_calls: used,
                    used_tools: true,
                    usage,
                });
            }

            let attempted = used + response.tool_calls.len();
            if attempted > self.limits.max_tool_calls {
                warn!(limit = self.limits.max_tool_calls, attempted, "tool call limit exceeded");
                return Err(AgentError::Policy(GroundTruthError::ToolCallLimitExceeded {
                    limit: self.limits.max_tool_calls,
                    attempted,
                }));
            }

            request.messages.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let outcome = self.tools.run_tool(&call.name, &call.arguments).await;
                debug!(
                    iteration,
                    tool = %call.name,
                    success = outcome.success,
                    unavailable = outcome.unavailable,
                    elapsed_ms = outcome.execution_time_ms,
                    "tool call"
                );
                let body = serde_json::to_string(&outcome)
                    .unwrap_or_else(|e| json!({"success": false, "error": e.to_string()}).to_string());
                request.messages.push(ChatMessage::tool_result(&call.id, &body));
            }
            used = attempted;
        }

        warn!(limit = self.limits.max_iterations, "iteration limit exceeded");
        Err(AgentError::Policy(GroundTruthError::IterationLimitExceeded {
            limit: self.limits.max_iterations,
        }))
    }

    async fn fallback(&self, system_prompt: &str, user_prompt: &str) -> Result<RawAnswer, AgentError> {
        let system = format!("{}\n\n{}", system_prompt, JSON_ONLY_INSTRUCTION);
        let request = CompletionRequest::simple(&system, user_prompt, self.temperature);
        let response = self.llm.complete(&request).await?;
        let content = response.content.ok_or(LlmError::EmptyResponse)?;
        Ok(RawAnswer {
            content,
            iterations: 1,
            tool_calls: 0,
            used_tools: false,
            usage: response.usage,
        })
    }
}
