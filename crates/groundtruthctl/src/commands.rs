//! Subcommand implementations

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use groundtruth_common::config::{ConfigResolver, GroundTruthConfig, StaticConfigResolver};
use groundtruth_common::content::{Curriculum, DrillSeries, GeneratedContent};
use groundtruth_engine::agent::{GenerationAgent, ToolRunner};
use groundtruth_engine::pipeline::{connect, REASON_NO_ENGINE};
use groundtruth_engine::protocol::{GroundTruthEngine, ToolOutcome};
use groundtruth_engine::{
    CachedToolRunner, ContentRepairer, GroundTruthPipeline, HttpCompletionClient, ResponseCache,
    StatelessToolExecutor, SweeperGuard, Transport, VerificationEngine,
};

use crate::output::print_json;
use crate::{ContentKind, TransportArg, VerifyMode};

const GENERATE_SYSTEM_PROMPT: &str = "You write backgammon teaching content. \
Use the engine tools to check every move you present as correct. \
Answer with a single JSON object.";

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Session => Transport::Session,
            TransportArg::Rest => Transport::Rest,
        }
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<GroundTruthConfig> {
    GroundTruthConfig::load(explicit).context("Failed to load configuration")
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn load_content(path: &Path, kind: ContentKind) -> Result<GeneratedContent> {
    let value = read_json(path)?;
    let content = match kind {
        ContentKind::Auto => serde_json::from_value(value)
            .context("content is neither a drill series nor a curriculum")?,
        ContentKind::Drills => GeneratedContent::DrillSeries(
            serde_json::from_value::<DrillSeries>(value).context("content is not a drill series")?,
        ),
        ContentKind::Curriculum => GeneratedContent::Curriculum(
            serde_json::from_value::<Curriculum>(value).context("content is not a curriculum")?,
        ),
    };
    Ok(content)
}

fn cache_for(config: &GroundTruthConfig) -> Result<ResponseCache> {
    ResponseCache::from_settings(&config.cache).context("Failed to open response cache")
}

pub async fn verify(
    config: &GroundTruthConfig,
    project: &str,
    path: &Path,
    kind: ContentKind,
    mode: VerifyMode,
    transport: TransportArg,
    expect_drills: Option<usize>,
) -> Result<()> {
    let content = load_content(path, kind)?;
    let cache = cache_for(config)?;

    match (mode, content) {
        (VerifyMode::Items, GeneratedContent::DrillSeries(series)) => {
            let mut pipeline = GroundTruthPipeline::new(
                Arc::new(StaticConfigResolver::new(config.clone())),
                config.clone(),
                cache,
                transport.into(),
            );
            if let Some(expected) = expect_drills {
                pipeline = pipeline.expect_drills(expected);
            }
            let outcome = pipeline.run(project, series).await;
            info!(project, status = %outcome.status, "verification finished");
            print_json(&json!({
                "status": outcome.status,
                "verification": outcome.verification,
                "drillCount": outcome.drill_count,
            }))
        }
        (VerifyMode::Items, GeneratedContent::Curriculum(_)) => {
            bail!("per-item verification needs a drill series; use --mode claims for curricula")
        }
        (VerifyMode::Claims, content) => {
            let Some(engine) = StaticConfigResolver::new(config.clone()).resolve_config(project) else {
                return print_json(&json!({"status": "UNVERIFIED", "reason": REASON_NO_ENGINE}));
            };
            let engine = connect(engine, transport.into(), config)?;
            let _sweeper = SweeperGuard::start(cache.clone(), config.cache.sweep_interval());
            let verifier = VerificationEngine::from_config(engine, cache, config);
            let result = verifier.verify_content(&content).await;
            info!(project, status = %result.status, claims = result.summary.total, "verification finished");
            print_json(&result)
        }
    }
}

pub async fn repair(
    config: &GroundTruthConfig,
    project: &str,
    path: &Path,
    transport: TransportArg,
) -> Result<()> {
    let series: DrillSeries = serde_json::from_value(read_json(path)?)
        .context("content is not a drill series")?;
    let llm = HttpCompletionClient::new(config.llm.clone()).context("Failed to create LLM client")?;
    let repairer = ContentRepairer::from_settings(Arc::new(llm), &config.llm);

    let outcome = GroundTruthPipeline::new(
        Arc::new(StaticConfigResolver::new(config.clone())),
        config.clone(),
        cache_for(config)?,
        transport.into(),
    )
    .with_repairer(repairer)
    .run(project, series)
    .await;

    let fixed = outcome.repairs.iter().filter(|r| r.fixed).count();
    info!(project, status = %outcome.status, fixed, "repair finished");
    print_json(&outcome)
}

pub async fn health(config: &GroundTruthConfig, project: &str, transport: TransportArg) -> Result<()> {
    let Some(engine_config) = StaticConfigResolver::new(config.clone()).resolve_config(project) else {
        bail!("{} for project '{}'", REASON_NO_ENGINE, project);
    };
    let url = engine_config.engine_url.clone();
    let engine = connect(engine_config, transport.into(), config)?;
    let available = engine.health_check().await;
    print_json(&json!({
        "project": project,
        "engineURL": url,
        "available": available,
    }))
}

pub async fn cache_sweep(config: &GroundTruthConfig) -> Result<()> {
    let removed = cache_for(config)?
        .cleanup_expired()
        .await
        .context("Cache sweep failed")?;
    print_json(&json!({"removed": removed}))
}

/// Tool runner for projects without an engine: always down
struct NoEngine;

#[async_trait]
impl ToolRunner for NoEngine {
    async fn available(&self) -> bool {
        false
    }

    async fn run_tool(&self, _name: &str, _args: &Value) -> ToolOutcome {
        ToolOutcome {
            success: false,
            data: None,
            error: Some(REASON_NO_ENGINE.to_string()),
            unavailable: true,
            execution_time_ms: 0,
        }
    }
}

pub async fn generate(
    config: &GroundTruthConfig,
    project: &str,
    prompt: &Path,
    system: Option<&Path>,
) -> Result<()> {
    let user_prompt = std::fs::read_to_string(prompt)
        .with_context(|| format!("Failed to read {}", prompt.display()))?;
    let system_prompt = match system {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => GENERATE_SYSTEM_PROMPT.to_string(),
    };

    let cache = cache_for(config)?;
    let _sweeper = SweeperGuard::start(cache.clone(), config.cache.sweep_interval());
    let tools: Arc<dyn ToolRunner> =
        match StaticConfigResolver::new(config.clone()).resolve_config(project) {
            Some(engine) => Arc::new(CachedToolRunner::new(
                Arc::new(StatelessToolExecutor::new(engine, &config.timeouts)?),
                cache,
            )),
            None => Arc::new(NoEngine),
        };
    let llm = HttpCompletionClient::new(config.llm.clone()).context("Failed to create LLM client")?;
    let agent = GenerationAgent::from_config(Arc::new(llm), tools, config);

    let output = agent
        .generate::<Value>(&system_prompt, &user_prompt)
        .await
        .context("Generation failed")?;
    info!(
        project,
        iterations = output.iterations,
        tool_calls = output.tool_calls,
        used_tools = output.used_tools,
        "generation finished"
    );
    print_json(&output.value)
}
