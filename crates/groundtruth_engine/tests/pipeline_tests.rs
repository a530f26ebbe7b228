//! End-to-end tests: verification, repair and generation against an
//! in-process engine.
//!
//! Tests verify:
//! - Drill verification over the session transport, with cache reuse
//! - An unreachable engine leaves content UNVERIFIED without queries
//! - The verify-repair-reverify pipeline over a SQLite cache
//! - Agentic generation feeding engine results back to the model

mod common;

use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{engine_config, spawn_engine, EngineState};
use groundtruth_common::config::{GroundTruthConfig, StaticConfigResolver, VerificationPolicy};
use groundtruth_common::content::DrillSeries;
use groundtruth_common::types::VerificationStatus;
use groundtruth_engine::agent::{AgentLimits, GenerationAgent};
use groundtruth_engine::cache::{ResponseCache, SqliteCacheStore, TtlPolicy};
use groundtruth_engine::llm_client::{CompletionResponse, FakeCompletionClient, ToolCallRequest};
use groundtruth_engine::protocol::SessionRegistry;
use groundtruth_engine::{ContentRepairer, GroundTruthPipeline, McpClient, StatelessToolExecutor, Transport, VerificationEngine};

/// Two drills: one right, one teaching 6-1 as a run
fn opening_series() -> DrillSeries {
    serde_json::from_value(json!({
        "seriesTitle": "Opening rolls",
        "phases": [{
            "phase": "OPENING",
            "principleGroups": [{
                "principleId": "point-making",
                "drills": [
                    {
                        "drillId": "open-31",
                        "scenario": "Opening roll of 3-1.",
                        "question": "Best play?",
                        "positionId": "opening-3-1",
                        "correctAnswer": "8/5 6/5",
                        "options": [
                            {"id": "a", "text": "8/5 6/5", "isCorrect": true},
                            {"id": "b", "text": "24/21 6/5", "isCorrect": false}
                        ]
                    },
                    {
                        "drillId": "open-61",
                        "scenario": "Opening roll of 6-1.",
                        "question": "Best play?",
                        "positionId": "opening-6-1",
                        "correctAnswer": "24/18 13/12",
                        "options": [
                            {"id": "a", "text": "24/18 13/12", "isCorrect": true},
                            {"id": "b", "text": "13/7 8/7", "isCorrect": false}
                        ],
                        "feedback": {"correct": "Run!", "incorrect": "Too slow."},
                        "principleIds": ["point-making"]
                    }
                ]
            }]
        }]
    }))
    .unwrap()
}

fn mcp_client(url: &str) -> Arc<McpClient> {
    Arc::new(
        McpClient::new(engine_config(url), &GroundTruthConfig::default().timeouts)
            .unwrap()
            .with_registry(Arc::new(SessionRegistry::default())),
    )
}

#[tokio::test]
async fn test_drill_verification_over_session_transport() {
    let state = Arc::new(EngineState::default());
    let url = spawn_engine(state.clone()).await;
    let verifier = VerificationEngine::new(
        mcp_client(&url),
        ResponseCache::in_memory(128),
        VerificationPolicy::default(),
        Duration::from_secs(300),
    );

    let first = verifier.verify_drill_series(&opening_series()).await;
    assert_eq!(first.status, VerificationStatus::NeedsReview);
    assert!(first.drills[0].verified);
    let failed = &first.drills[1];
    assert!(failed.is_repairable());
    assert!(failed.discrepancy.as_deref().unwrap().contains("#2"));
    assert_eq!(first.tool_calls.len(), 2);

    let second = verifier.verify_drill_series(&opening_series()).await;
    assert_eq!(second.summary.cached, 2);
    assert_eq!(second.tool_calls[0].tool_name, "get_opening_move");
    assert_eq!(second.tool_calls[0].arguments, first.tool_calls[0].arguments);
    assert_eq!(state.tool_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_engine_is_unverified() {
    // Nothing listens on the discard port
    let verifier = VerificationEngine::new(
        mcp_client("http://127.0.0.1:9"),
        ResponseCache::in_memory(16),
        VerificationPolicy::default(),
        Duration::from_secs(300),
    );
    let result = verifier.verify_drill_series(&opening_series()).await;
    assert_eq!(result.status, VerificationStatus::Unverified);
    assert!(result.drills.iter().all(|d| d.skipped && !d.cached));
    assert!(result.tool_calls.is_empty());
}

#[tokio::test]
async fn test_pipeline_repairs_and_reverifies_with_sqlite_cache() {
    let state = Arc::new(EngineState::default());
    let url = spawn_engine(state.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let config = GroundTruthConfig::from_toml(&format!(
        r#"
        [[projects]]
        project_id = "bg-openings"
        engine_url = "{}"
        "#,
        url
    ))
    .unwrap();
    let store = SqliteCacheStore::open_at(dir.path().join("cache.db")).unwrap();
    let cache = ResponseCache::new(Arc::new(store), TtlPolicy::from(&config.cache));

    let llm = Arc::new(FakeCompletionClient::always_text(
        r#"{"correctAnswer": "13/7 8/7",
            "feedback": {"correct": "The bar point blocks sixes from your opponent's back checkers.",
                         "incorrect": "Running gives up the chance to build a prime."},
            "explanation": "Making the 7-point starts a blockade."}"#,
    ));
    let pipeline = GroundTruthPipeline::new(
        Arc::new(StaticConfigResolver::new(config.clone())),
        config,
        cache,
        Transport::Rest,
    )
    .with_repairer(ContentRepairer::new(llm.clone(), 0.3))
    .expect_drills(2);

    let outcome = pipeline.run("bg-openings", opening_series()).await;
    assert_eq!(
        outcome.initial_verification.as_ref().unwrap().status,
        VerificationStatus::NeedsReview
    );
    assert_eq!(outcome.status, VerificationStatus::Verified);
    assert!(outcome.repairs.iter().all(|r| r.fixed));

    let repaired = outcome.series.find_drill("open-61").unwrap();
    assert_eq!(repaired.correct_answer, "13/7 8/7");
    assert!(!repaired.options[0].is_correct);
    assert!(repaired.options[1].is_correct);
    assert_eq!(repaired.principle_ids, vec!["point-making".to_string()]);
    assert_eq!(repaired.position_id.as_deref(), Some("opening-6-1"));

    // Two live queries; the re-verification pass was served from SQLite
    assert_eq!(state.rest_calls.load(Ordering::SeqCst), 2);
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_agent_consults_engine_before_answering() {
    let state = Arc::new(EngineState::default());
    let url = spawn_engine(state.clone()).await;
    let executor = Arc::new(
        StatelessToolExecutor::new(engine_config(&url), &GroundTruthConfig::default().timeouts)
            .unwrap(),
    );
    let llm = Arc::new(FakeCompletionClient::new(vec![
        Ok(CompletionResponse::with_tool_calls(vec![ToolCallRequest {
            id: "call_1".to_string(),
            name: "get_best_moves".to_string(),
            arguments: json!({"position": "opening-3-1", "dice": [3, 1], "top_n": 3}),
        }])),
        Ok(CompletionResponse::text(
            "```json\n{\"phases\": [{\"phase\": \"OPENING\", \"principleGroups\": []}]}\n```",
        )),
    ]));

    let agent = GenerationAgent::new(llm.clone(), executor, AgentLimits::default(), 0.7);
    let out = agent
        .generate::<Value>("Write an opening drill series.", "Cover 3-1.")
        .await
        .unwrap();

    assert!(out.used_tools);
    assert_eq!(out.tool_calls, 1);
    assert_eq!(out.value["phases"][0]["phase"], "OPENING");
    assert_eq!(state.rest_calls.load(Ordering::SeqCst), 1);

    let follow_up = &llm.requests()[1];
    let tool_turn = follow_up.messages.last().unwrap();
    assert!(tool_turn.content.as_deref().unwrap().contains("8/5 6/5"));
}

#[tokio::test]
async fn test_agent_falls_back_when_engine_down() {
    let state = Arc::new(EngineState::default());
    state.unhealthy.store(true, Ordering::SeqCst);
    let url = spawn_engine(state.clone()).await;
    let executor = Arc::new(
        StatelessToolExecutor::new(engine_config(&url), &GroundTruthConfig::default().timeouts)
            .unwrap(),
    );
    let llm = Arc::new(FakeCompletionClient::always_text(r#"{"phases": []}"#));

    let out = GenerationAgent::new(llm.clone(), executor, AgentLimits::default(), 0.7)
        .generate::<Value>("Write drills.", "Openings.")
        .await
        .unwrap();

    assert!(!out.used_tools);
    assert_eq!(llm.call_count(), 1);
    assert!(llm.requests()[0].tools.is_empty());
    assert_eq!(state.rest_calls.load(Ordering::SeqCst), 0);
}
