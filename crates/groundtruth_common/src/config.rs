//! Ground truth configuration
//!
//! Config file: ~/.config/groundtruth/config.toml or /etc/groundtruth/config.toml
//!
//! Every section has defaults, so an empty file (or no file) is valid.
//! Projects map a content project to the engine that checks it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{GroundTruthError, Result};
use crate::types::{EngineConfig, DEFAULT_NEEDS_REVIEW_THRESHOLD};

const SECS_PER_HOUR: u64 = 60 * 60;

/// Default engine settings used when a project does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub url: String,
    pub engine_id: String,
    pub engine_name: String,
    pub domain: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            engine_id: "gnubg".to_string(),
            engine_name: "GNU Backgammon".to_string(),
            domain: "backgammon".to_string(),
        }
    }
}

/// Network and run deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub health_secs: u64,
    pub query_secs: u64,
    pub run_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            health_secs: 5,
            query_secs: 10,
            run_secs: 300,
        }
    }
}

impl TimeoutSettings {
    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }
}

/// Which store backs the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Entry cap for the in-memory store
    pub capacity: usize,
    pub sqlite_path: Option<PathBuf>,
    pub sweep_interval_secs: u64,
    pub opening_ttl_secs: u64,
    pub position_ttl_secs: u64,
    pub move_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            capacity: 10_000,
            sqlite_path: None,
            sweep_interval_secs: SECS_PER_HOUR,
            opening_ttl_secs: 7 * 24 * SECS_PER_HOUR,
            position_ttl_secs: 24 * SECS_PER_HOUR,
            move_ttl_secs: SECS_PER_HOUR,
        }
    }
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Sqlite path, defaulting to the user cache directory
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        self.sqlite_path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("groundtruth")
                .join("responses.db")
        })
    }
}

/// Pass/fail policy. These are policy knobs, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Share of checked items that may fail before a batch needs review
    pub needs_review_threshold: f64,
    /// Allowed deviation from the requested drill count
    pub drill_count_tolerance: usize,
    /// Moves requested from the engine per position
    pub top_n: usize,
    /// Allowed gap between a stated equity and the engine's
    pub equity_tolerance: f64,
    /// A drill answer this close to the best move's equity still passes
    pub alternative_tolerance: f64,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            needs_review_threshold: DEFAULT_NEEDS_REVIEW_THRESHOLD,
            drill_count_tolerance: 1,
            top_n: 3,
            equity_tolerance: 0.05,
            alternative_tolerance: 0.0,
        }
    }
}

/// Language-model service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub repair_temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            temperature: 0.7,
            repair_temperature: 0.3,
        }
    }
}

impl LlmSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Bounds for tool-calling generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub max_tool_calls: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_tool_calls: 100,
        }
    }
}

/// One `[[projects]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEngine {
    pub project_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub engine_url: Option<String>,
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default)]
    pub engine_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub config_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthConfig {
    pub engine: EngineSettings,
    pub timeouts: TimeoutSettings,
    pub cache: CacheSettings,
    pub verification: VerificationPolicy,
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub projects: Vec<ProjectEngine>,
}

impl GroundTruthConfig {
    /// User config path: $XDG_CONFIG_HOME/groundtruth/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("groundtruth").join("config.toml"))
    }

    /// System config path: /etc/groundtruth/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/groundtruth/config.toml")
    }

    /// Parse a config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            GroundTruthError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
            .map_err(|e| GroundTruthError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| GroundTruthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Values that parse but cannot run
    pub fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval_secs == 0 {
            return Err(GroundTruthError::Config(
                "cache.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Explicit path, then $GROUNDTRUTH_CONFIG, then user and system
    /// paths, then defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => Self::discover()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn discover() -> Result<Self> {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var("GROUNDTRUTH_CONFIG") {
            candidates.push(PathBuf::from(path));
        }
        candidates.extend(Self::user_config_path());
        candidates.push(Self::system_config_path());

        for path in candidates {
            if path.exists() {
                info!("Loading configuration from {}", path.display());
                return Self::load_from(&path);
            }
        }
        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("GROUNDTRUTH_ENGINE_URL") {
            self.engine.url = url;
        }
        if let Ok(endpoint) = std::env::var("GROUNDTRUTH_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("GROUNDTRUTH_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    /// Engine config for a project, filling gaps from `[engine]`.
    /// `None` when the project is unknown or verification is disabled.
    pub fn engine_for_project(&self, project_id: &str) -> Option<EngineConfig> {
        let project = self.projects.iter().find(|p| p.project_id == project_id)?;
        if !project.enabled {
            return None;
        }
        Some(EngineConfig {
            enabled: true,
            engine_url: project
                .engine_url
                .clone()
                .unwrap_or_else(|| self.engine.url.clone()),
            engine_id: project
                .engine_id
                .clone()
                .unwrap_or_else(|| self.engine.engine_id.clone()),
            engine_name: project
                .engine_name
                .clone()
                .unwrap_or_else(|| self.engine.engine_name.clone()),
            domain: project
                .domain
                .clone()
                .unwrap_or_else(|| self.engine.domain.clone()),
            config_id: project
                .config_id
                .clone()
                .unwrap_or_else(|| format!("{}:{}", project_id, self.engine.engine_id)),
        })
    }
}

/// Maps a project to the engine that verifies its content
pub trait ConfigResolver: Send + Sync {
    /// `None` when the project has no enabled engine
    fn resolve_config(&self, project_id: &str) -> Option<EngineConfig>;
}

/// Resolver backed by the `[[projects]]` table
#[derive(Debug, Clone)]
pub struct StaticConfigResolver {
    config: GroundTruthConfig,
}

impl StaticConfigResolver {
    pub fn new(config: GroundTruthConfig) -> Self {
        Self { config }
    }
}

impl ConfigResolver for StaticConfigResolver {
    fn resolve_config(&self, project_id: &str) -> Option<EngineConfig> {
        let resolved = self.config.engine_for_project(project_id);
        if resolved.is_none() {
            debug!(project_id, "no enabled engine for project");
        }
        resolved
    }
}
