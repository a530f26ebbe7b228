//! Verify, repair, re-verify
//!
//! Resolves the project's engine, checks every drill, rewrites the
//! failures that carry engine data and verifies the corrected series
//! once more. Content always comes back; the status says how far to
//! trust it.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use groundtruth_common::config::{ConfigResolver, GroundTruthConfig};
use groundtruth_common::content::DrillSeries;
use groundtruth_common::error::Result;
use groundtruth_common::types::{
    DrillSeriesVerificationResult, DrillVerificationResult, EngineConfig, VerificationStatus,
};

use crate::cache::{ResponseCache, SweeperGuard};
use crate::protocol::{GroundTruthEngine, McpClient, StatelessToolExecutor};
use crate::repair::{ContentRepairer, RepairReport};
use crate::verify::{validate_drill_count, DrillCountCheck, VerificationEngine};

pub const REASON_NO_ENGINE: &str = "no engine configured";

/// Which engine transport to speak
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// JSON-RPC with a session handshake
    #[default]
    Session,
    /// Stateless `/api/mcp`
    Rest,
}

/// Build an engine client for a resolved configuration
pub fn connect(
    engine: EngineConfig,
    transport: Transport,
    config: &GroundTruthConfig,
) -> Result<Arc<dyn GroundTruthEngine>> {
    Ok(match transport {
        Transport::Session => Arc::new(McpClient::new(engine, &config.timeouts)?),
        Transport::Rest => Arc::new(StatelessToolExecutor::new(engine, &config.timeouts)?),
    })
}

type Connector = Box<dyn Fn(EngineConfig) -> Result<Arc<dyn GroundTruthEngine>> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub status: VerificationStatus,
    /// Result for the series as returned
    pub verification: DrillSeriesVerificationResult,
    /// First pass, present when repair ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_verification: Option<DrillSeriesVerificationResult>,
    pub repairs: Vec<RepairReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drill_count: Option<DrillCountCheck>,
    pub series: DrillSeries,
}

pub struct GroundTruthPipeline {
    resolver: Arc<dyn ConfigResolver>,
    config: GroundTruthConfig,
    cache: ResponseCache,
    repairer: Option<ContentRepairer>,
    connector: Connector,
    expected_drills: Option<usize>,
}

impl GroundTruthPipeline {
    pub fn new(
        resolver: Arc<dyn ConfigResolver>,
        config: GroundTruthConfig,
        cache: ResponseCache,
        transport: Transport,
    ) -> Self {
        let connect_config = config.clone();
        Self {
            resolver,
            config,
            cache,
            repairer: None,
            connector: Box::new(move |engine| connect(engine, transport, &connect_config)),
            expected_drills: None,
        }
    }

    pub fn with_repairer(mut self, repairer: ContentRepairer) -> Self {
        self.repairer = Some(repairer);
        self
    }

    /// Swap how engine clients are built
    pub fn with_connector<F>(mut self, connector: F) -> Self
    where
        F: Fn(EngineConfig) -> Result<Arc<dyn GroundTruthEngine>> + Send + Sync + 'static,
    {
        self.connector = Box::new(connector);
        self
    }

    /// Also check the series holds this many drills
    pub fn expect_drills(mut self, expected: usize) -> Self {
        self.expected_drills = Some(expected);
        self
    }

    fn unverified(series: &DrillSeries, reason: &str, threshold: f64) -> DrillSeriesVerificationResult {
        let drills = series
            .drills()
            .map(|(loc, d)| DrillVerificationResult::skipped(&d.drill_id, loc, reason))
            .collect();
        DrillSeriesVerificationResult::from_drills(drills, Vec::new(), threshold, Some(reason.to_string()))
    }

    /// Verify a series for `project_id`, repairing failures when a
    /// repairer is attached
    pub async fn run(&self, project_id: &str, mut series: DrillSeries) -> PipelineOutcome {
        let _sweeper = SweeperGuard::start(self.cache.clone(), self.config.cache.sweep_interval());
        let threshold = self.config.verification.needs_review_threshold;
        let drill_count = self.expected_drills.map(|expected| {
            validate_drill_count(&series, expected, self.config.verification.drill_count_tolerance)
        });
        if let Some(check) = drill_count.filter(|c| !c.within_tolerance) {
            warn!(expected = check.expected, actual = check.actual, "drill count out of tolerance");
        }

        let Some(engine_config) = self.resolver.resolve_config(project_id) else {
            info!(project_id, "no engine configured, content left unverified");
            let verification = Self::unverified(&series, REASON_NO_ENGINE, threshold);
            return PipelineOutcome {
                status: verification.status,
                verification,
                initial_verification: None,
                repairs: Vec::new(),
                drill_count,
                series,
            };
        };

        let engine = match (self.connector)(engine_config) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(project_id, "could not build engine client: {}", e);
                let verification = DrillSeriesVerificationResult::failed(&e.to_string());
                return PipelineOutcome {
                    status: verification.status,
                    verification,
                    initial_verification: None,
                    repairs: Vec::new(),
                    drill_count,
                    series,
                };
            }
        };

        let verifier = VerificationEngine::from_config(engine, self.cache.clone(), &self.config);
        let initial = verifier.verify_drill_series(&series).await;

        let Some(repairer) = self.repairer.as_ref().filter(|_| initial.repairable().next().is_some())
        else {
            return PipelineOutcome {
                status: initial.status,
                verification: initial,
                initial_verification: None,
                repairs: Vec::new(),
                drill_count,
                series,
            };
        };

        let repairs = repairer.repair_series(&mut series, &initial).await;
        let fixed = repairs.iter().filter(|r| r.fixed).count();
        info!(project_id, fixed, attempted = repairs.len(), "repair pass complete");

        // Re-verify once; repaired answers come from cached engine data
        let verification = if fixed > 0 {
            verifier.verify_drill_series(&series).await
        } else {
            initial.clone()
        };
        PipelineOutcome {
            status: verification.status,
            verification,
            initial_verification: Some(initial),
            repairs,
            drill_count,
            series,
        }
    }
}
