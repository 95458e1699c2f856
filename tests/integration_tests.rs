use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use kpi_engine::config::{Config, WarehouseConfig};
use kpi_engine::error::{DataAccessError, FailureKind, ReasoningError};
use kpi_engine::generator::context::PipelineContext;
use kpi_engine::generator::orchestrator::{Orchestrator, PipelineStatus};
use kpi_engine::generator::stages::types::StageName;
use kpi_engine::llm::client::ScriptedReasoner;
use kpi_engine::llm::client::types::{ModelReply, ToolCallRequest, TurnContent};
use kpi_engine::warehouse::{
    DataAccessLayer, FixtureWarehouse, PerformanceRecord, Row, Warehouse, WarehouseQuery,
};
use kpi_engine::{KpiTarget, PipelineOutput, run_pipeline};

fn record(day: &str, campaign: &str, device: &str, cost: f64, conv: f64, rev: f64) -> PerformanceRecord {
    PerformanceRecord {
        date: NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
        campaign_id: campaign.to_string(),
        device: Some(device.to_string()),
        region: Some("US".to_string()),
        cost,
        conversions: conv,
        revenue: rev,
        clicks: 100.0,
        impressions: 1000.0,
    }
}

/// 账户合计：cost=10000, conversions=50, revenue=21000
fn sample_records() -> Vec<PerformanceRecord> {
    vec![
        record("2024-07-01", "c-1", "mobile", 6000.0, 30.0, 9000.0),
        record("2024-07-02", "c-2", "desktop", 3000.0, 15.0, 10500.0),
        record("2024-07-03", "c-3", "mobile", 1000.0, 5.0, 1500.0),
    ]
}

fn roas_kpi() -> KpiTarget {
    KpiTarget::new("ROAS", 2.1, 4.0, "Q3").with_unit("x")
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.retry_attempts = 3;
    config.llm.retry_delay_ms = 1;
    config.llm.timeout_seconds = 5;
    config.warehouse = warehouse_config();
    config
}

fn warehouse_config() -> WarehouseConfig {
    WarehouseConfig {
        retry_attempts: 3,
        retry_delay_ms: 1,
        timeout_seconds: 5,
        ..WarehouseConfig::default()
    }
}

fn context_with(
    config: Config,
    reasoner: Arc<ScriptedReasoner>,
    warehouse: Arc<dyn Warehouse>,
) -> PipelineContext {
    let dal = DataAccessLayer::new(warehouse, &config.warehouse);
    PipelineContext::new(config, roas_kpi(), reasoner, dal)
}

fn fixture() -> Arc<dyn Warehouse> {
    Arc::new(FixtureWarehouse::new(sample_records()))
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

/// 模型故意给出错误的数值，应被仓库结果覆盖
fn insights_answer() -> String {
    json!({
        "current_state": {
            "metric": "ROAS",
            "value": 9.9,
            "cost": 1.0,
            "roas": 9.9,
            "summary": "ROAS trails target, c-1 and c-3 waste spend"
        },
        "gap_analysis": {"gap": 100.0, "top_drivers": ["c-1 mobile spend"]},
        "key_insights": ["c-1 takes 60% of spend at ROAS 1.5"],
        "risk_areas": ["mobile"],
        "opportunities": ["shift budget to c-2"],
        "hypotheses": ["mobile traffic converts poorly"]
    })
    .to_string()
}

fn research_answer() -> String {
    json!({
        "trends": [{"description": "ROAS fell after 07-01", "evidence": "time series"}],
        "efficiency_gaps": [{"segment": "c-1", "issue": "ROAS 1.5 vs 2.1", "impact": "-0.6"}],
        "optimization_opportunities": ["reallocate c-1 budget to c-2"],
        "hypotheses": [{"statement": "mobile traffic converts poorly", "status": "confirmed", "evidence": "c-1 and c-3 are mobile"}],
        "root_cause": "mobile-heavy campaigns c-1 and c-3",
        "actionable_summary": "Cut mobile bids on c-1 and c-3, scale c-2"
    })
    .to_string()
}

fn planning_answer() -> String {
    format!(
        "```json\n{}\n```",
        json!({
            "quick_wins": [{
                "title": "Lower mobile bids on c-1",
                "description": "Apply a -30% mobile bid adjustment",
                "effort_level": "high",
                "expected_impact": "+0.3 ROAS",
                "implementation_steps": ["open c-1", "set device adjustment"]
            }],
            "medium_effort": [{
                "title": "Shift budget to c-2",
                "description": "Move 20% of c-1 budget",
                "expected_impact": "+0.5 ROAS"
            }],
            "high_effort": [],
            "metrics_to_track": ["ROAS", "CPA"],
            "timeline": "30 days",
            "executive_summary": "Reallocate spend from mobile-heavy campaigns."
        })
    )
}

fn happy_path_script() -> Vec<ModelReply> {
    vec![
        ModelReply::ToolCalls(vec![call("i-1", "get_current_metrics", json!({}))]),
        ModelReply::Final(insights_answer()),
        ModelReply::ToolCalls(vec![
            call("r-1", "compare_segment_efficiency", json!({})),
            call("r-2", "get_time_series", json!({"start_date": "2024-07-01"})),
        ]),
        ModelReply::Final(research_answer()),
        ModelReply::Final(planning_answer()),
    ]
}

/// 前 `failures` 次查询返回瞬时错误
struct FlakyWarehouse {
    inner: FixtureWarehouse,
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Warehouse for FlakyWarehouse {
    async fn execute(&self, query: &WarehouseQuery) -> Result<Vec<Row>, DataAccessError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(DataAccessError::Unavailable("503 backend error".to_string()));
        }
        self.inner.execute(query).await
    }
}

#[tokio::test]
async fn test_roas_scenario_completes() {
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(test_config(), reasoner.clone(), fixture());

    let output = run_pipeline(&context).await.unwrap();
    let PipelineOutput::Completed(report) = &output else {
        panic!("pipeline failed: {:?}", output);
    };

    let gap = &report.insights["gap_analysis"];
    assert!((gap["gap"].as_f64().unwrap() - 1.9).abs() < 1e-9);
    assert_eq!(gap["target_met"], json!(false));
    assert_eq!(gap["unit"], json!("x"));
    assert_eq!(gap["top_drivers"], json!(["c-1 mobile spend"]));

    let state = &report.insights["current_state"];
    assert_eq!(state["roas"], json!(2.1));
    assert_eq!(state["value"], json!(2.1));
    assert_eq!(state["cost"], json!(10000.0));
    assert_eq!(state["cpa"], json!(200.0));

    assert_eq!(report.strategy_plan["quick_wins"][0]["effort_level"], json!("low"));
    assert_eq!(report.strategy_plan["medium_effort"][0]["effort_level"], json!("medium"));
    assert_eq!(reasoner.call_count(), 5);
    assert_eq!(reasoner.remaining(), 0);
}

#[tokio::test]
async fn test_completed_output_has_exactly_four_fields() {
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(test_config(), reasoner, fixture());

    let output = run_pipeline(&context).await.unwrap();
    let document: Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
    let mut keys: Vec<&str> = document.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, vec!["insights", "research", "strategy_plan", "timing"]);

    let timing = &document["timing"];
    for field in ["insights_ms", "research_ms", "planning_ms", "total_ms"] {
        assert!(timing[field].is_u64(), "{} should be recorded", field);
    }
}

#[tokio::test]
async fn test_stages_receive_prior_artifacts_and_scoped_tools() {
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(test_config(), reasoner.clone(), fixture());
    run_pipeline(&context).await.unwrap();

    let requests = reasoner.requests();
    let tool_names = |index: usize| -> Vec<String> {
        requests[index].tools.iter().map(|t| t.name.clone()).collect()
    };
    assert_eq!(tool_names(0), vec!["get_current_metrics", "get_segment_breakdown"]);
    assert_eq!(
        tool_names(2),
        vec!["get_time_series", "get_segment_breakdown", "compare_segment_efficiency"]
    );
    assert!(tool_names(4).is_empty());

    let task_prompt = |index: usize| match &requests[index].conversation[0].content {
        TurnContent::Text(text) => text.clone(),
        other => panic!("unexpected first turn: {:?}", other),
    };
    assert!(!task_prompt(0).contains("Output of the insights stage"));
    assert!(task_prompt(2).contains("Output of the insights stage"));
    assert!(task_prompt(4).contains("Output of the research stage"));

    let log = context.artifact_log_snapshot().await;
    assert_eq!(log.artifacts().len(), 3);
    assert_eq!(log.traces().len(), 3);
    let research_trace = log.trace(StageName::Research).unwrap();
    assert_eq!(research_trace.model_calls, 2);
    assert_eq!(research_trace.successful_results("compare_segment_efficiency").count(), 1);
}

#[tokio::test]
async fn test_transient_warehouse_failures_are_retried() {
    let warehouse = Arc::new(FlakyWarehouse {
        inner: FixtureWarehouse::new(sample_records()),
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(test_config(), reasoner, warehouse.clone());

    let output = run_pipeline(&context).await.unwrap();
    assert!(output.is_completed());
    // 2次失败 + Insights 1次 + efficiency 2次 + time series 1次
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_exhausted_warehouse_retries_fail_the_stage() {
    let warehouse = Arc::new(FlakyWarehouse {
        inner: FixtureWarehouse::new(sample_records()),
        failures: 10,
        calls: AtomicU32::new(0),
    });
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(test_config(), reasoner.clone(), warehouse.clone());

    let state = Orchestrator.run(&context).await;
    let PipelineStatus::Failed(failure) = state.status() else {
        panic!("expected failure, got {:?}", state.status());
    };
    assert_eq!(failure.stage, StageName::Insights);
    assert_eq!(failure.kind, FailureKind::DataAccess);
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 3);
    assert_eq!(reasoner.call_count(), 1);
}

#[tokio::test]
async fn test_insights_failure_halts_pipeline() {
    let reasoner = Arc::new(ScriptedReasoner::from_outcomes(vec![
        Err(ReasoningError::InvalidRequest("context window exceeded".to_string())),
        Ok(ModelReply::Final(research_answer())),
        Ok(ModelReply::Final(planning_answer())),
    ]));
    let context = context_with(test_config(), reasoner.clone(), fixture());

    let state = Orchestrator.run(&context).await;
    assert!(state.artifacts().is_empty());
    assert_eq!(reasoner.call_count(), 1);
    assert_eq!(reasoner.remaining(), 2);

    let document = serde_json::to_value(state.output().unwrap()).unwrap();
    assert_eq!(document["status"], json!("failed"));
    assert_eq!(document["failed_stage"], json!("insights"));
    assert_eq!(document["error_kind"], json!("model"));
    assert!(document.get("insights").is_none());
    assert_eq!(document["timing"]["research_ms"], Value::Null);
}

#[tokio::test]
async fn test_tool_loop_is_bounded() {
    let mut config = test_config();
    config.runner.max_turns = 3;
    let reasoner = Arc::new(ScriptedReasoner::repeating(ModelReply::ToolCalls(vec![call(
        "loop",
        "get_current_metrics",
        json!({}),
    )])));
    let warehouse = Arc::new(FlakyWarehouse {
        inner: FixtureWarehouse::new(sample_records()),
        failures: 0,
        calls: AtomicU32::new(0),
    });
    let context = context_with(config, reasoner.clone(), warehouse.clone());

    let state = Orchestrator.run(&context).await;
    let PipelineStatus::Failed(failure) = state.status() else {
        panic!("expected failure, got {:?}", state.status());
    };
    assert_eq!(failure.kind, FailureKind::NonTermination);
    assert_eq!(reasoner.call_count(), 3);
    // 第3轮请求的查询没有剩余轮数读取，不会执行
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_correction_recovers_malformed_output() {
    let mut script = happy_path_script();
    script.insert(1, ModelReply::Final("ROAS is 2.1, well below target.".to_string()));
    let reasoner = Arc::new(ScriptedReasoner::new(script));
    let context = context_with(test_config(), reasoner.clone(), fixture());

    let output = run_pipeline(&context).await.unwrap();
    assert!(output.is_completed());

    let correction = &reasoner.requests()[2].conversation;
    let last = correction.last().unwrap();
    assert!(matches!(&last.content, TurnContent::Text(t) if t.contains("could not be accepted")));
}

#[tokio::test]
async fn test_second_malformed_output_is_schema_violation() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        ModelReply::Final("no json".to_string()),
        ModelReply::Final(json!({"current_state": {}, "key_insights": [" "]}).to_string()),
    ]));
    let context = context_with(test_config(), reasoner, fixture());

    let state = Orchestrator.run(&context).await;
    let PipelineStatus::Failed(failure) = state.status() else {
        panic!("expected failure, got {:?}", state.status());
    };
    assert_eq!(failure.stage, StageName::Insights);
    assert_eq!(failure.kind, FailureKind::SchemaViolation);
}

#[tokio::test]
async fn test_pipeline_deadline() {
    let mut config = test_config();
    config.pipeline.deadline_seconds = Some(0);
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(config, reasoner, fixture());

    let state = Orchestrator.run(&context).await;
    let PipelineStatus::Failed(failure) = state.status() else {
        panic!("expected failure, got {:?}", state.status());
    };
    assert_eq!(failure.kind, FailureKind::DeadlineExceeded);
    assert!(failure.reason.contains("deadline"));
}

#[tokio::test]
async fn test_identical_runs_dispatch_identical_rows() {
    let mut payloads = Vec::new();
    for _ in 0..2 {
        let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
        let context = context_with(test_config(), reasoner, fixture());
        run_pipeline(&context).await.unwrap();

        let log = context.artifact_log_snapshot().await;
        let results: Vec<Value> = log
            .traces()
            .iter()
            .flat_map(|trace| trace.turns.iter())
            .filter_map(|turn| match &turn.content {
                TurnContent::ToolResult(result) => Some(result.payload.clone()),
                _ => None,
            })
            .collect();
        payloads.push(results);
    }
    assert_eq!(payloads[0].len(), 3);
    assert_eq!(payloads[0], payloads[1]);
}

#[tokio::test]
async fn test_report_files_are_written() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.output_path = Some(temp_dir.path().to_path_buf());
    let reasoner = Arc::new(ScriptedReasoner::new(happy_path_script()));
    let context = context_with(config, reasoner, fixture());

    run_pipeline(&context).await.unwrap();

    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(temp_dir.path().join("kpi_report.json")).unwrap())
            .unwrap();
    assert!(report.get("strategy_plan").is_some());
    let log: Value =
        serde_json::from_str(&std::fs::read_to_string(temp_dir.path().join("artifact_log.json")).unwrap())
            .unwrap();
    assert_eq!(log["traces"].as_array().unwrap().len(), 3);
}
