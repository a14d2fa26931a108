//! End-to-end orchestration scenarios against a scripted generation port.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodes::PipelineExecutor;
use pipeline::{
    ChatMessage, DocumentId, DocumentStore, GenerationError, GenerationPort, IndexingError,
    PipelineConfig, PipelineError, RunStatus, RunSummary, Stage, TrendCount,
};
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(GenerationError),
    /// Never returns; signals `ScriptedPort::hung` when reached.
    Hang,
}

/// Answers each stage from its own script. The last reply of a script is
/// repeated once the script is exhausted.
#[derive(Default)]
struct ScriptedPort {
    scripts: Mutex<BTreeMap<Stage, VecDeque<Reply>>>,
    calls: Mutex<Vec<(Stage, Vec<ChatMessage>)>>,
    hung: Notify,
}

impl ScriptedPort {
    fn new() -> Self {
        Self::default()
    }

    fn script(self, stage: Stage, replies: Vec<Reply>) -> Self {
        self.scripts.lock().unwrap().insert(stage, replies.into());
        self
    }

    fn calls_for(&self, stage: Stage) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn stage_of(context: &[ChatMessage]) -> Stage {
    let marker = context
        .iter()
        .find_map(|m| m.content.strip_prefix("STAGE:"))
        .and_then(|rest| rest.split_whitespace().next())
        .expect("stage marker in prompt");
    *Stage::ALL
        .iter()
        .find(|s| s.as_str() == marker)
        .expect("known stage")
}

#[async_trait]
impl GenerationPort for ScriptedPort {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, GenerationError> {
        let stage = stage_of(context);
        self.calls.lock().unwrap().push((stage, context.to_vec()));
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.get_mut(&stage).expect("script for stage");
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().expect("non-empty script")
            }
        };
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                self.hung.notify_one();
                std::future::pending().await
            }
        }
    }
}

struct ChannelStore(mpsc::UnboundedSender<RunSummary>);

#[async_trait]
impl DocumentStore for ChannelStore {
    async fn index(&self, summary: &RunSummary) -> Result<DocumentId, IndexingError> {
        let _ = self.0.send(summary.clone());
        Ok(DocumentId::new("doc-1").unwrap())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const CONFIG: &str = r#"
[model]
name = "test-model"
temperature = 0.2
max_tokens = 256

[prompts]
system = "You are a market analyst."
trend_analysis = "STAGE:trend q={user_input} k={k} leak=[{opportunity_analysis}{competitor_analysis}{synthesis}]"
opportunity_analysis = "STAGE:opportunity {trend_analysis} leak=[{competitor_analysis}{synthesis}]"
competitor_analysis = "STAGE:competitor {opportunity_analysis} leak=[{trend_analysis}{synthesis}]"
synthesis = "STAGE:synthesis {trend_analysis} | {opportunity_analysis} | {competitor_analysis}"
refinement = "Your previous answer was insufficient."
"#;

fn config() -> PipelineConfig {
    PipelineConfig::from_toml_str(CONFIG).unwrap()
}

fn entry(i: usize) -> serde_json::Value {
    json!({
        "name": format!("Trend {i}"),
        "description": "TREND-MARK rising demand for local food production",
        "Year_2025": 10, "Year_2026": 20, "Year_2027": 30,
        "Year_2028": 40, "Year_2029": 50, "Year_2030": 60,
        "Startup_Name": format!("Startup {i}"),
        "Startup_Opportunity": "Vertical farm kits",
        "Growth_rate_WoW": 4.5,
        "YC_chances": 35,
        "Related_trends": "Sustainability, AgTech"
    })
}

fn trends_json(n: usize) -> String {
    json!({ "trends": (0..n).map(entry).collect::<Vec<_>>() }).to_string()
}

fn long_text(marker: &str) -> String {
    format!("{marker} {}", "detailed analysis ".repeat(10))
}

fn text(s: impl Into<String>) -> Reply {
    Reply::Text(s.into())
}

/// A port whose every stage succeeds first time.
fn happy_port(synthesis_entries: usize) -> ScriptedPort {
    ScriptedPort::new()
        .script(Stage::Trend, vec![text(trends_json(3))])
        .script(Stage::Opportunity, vec![text(long_text("OPP-MARK"))])
        .script(Stage::Competitor, vec![text("COMP-MARK incumbents are slow")])
        .script(Stage::Synthesis, vec![text(trends_json(synthesis_entries))])
}

fn executor(port: &Arc<ScriptedPort>) -> PipelineExecutor {
    PipelineExecutor::new(config(), port.clone() as Arc<dyn GenerationPort>).unwrap()
}

fn k(n: u32) -> Option<TrendCount> {
    TrendCount::new(n)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_runs_each_stage_once() {
    let port = Arc::new(happy_port(3));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert!(outcome.error.is_none());
    for stage in Stage::ALL {
        assert_eq!(port.calls_for(stage).len(), 1, "{stage}");
        assert!(outcome.state.accepted(stage).is_some(), "{stage}");
    }
    assert_eq!(outcome.state.final_result().unwrap().len(), 3);
    assert_eq!(outcome.state.refinement_log().count(), 0);
    assert!(outcome.state.elapsed_time().is_some());

    let report = serde_json::to_value(outcome.report()).unwrap();
    assert_eq!(report["status"], "succeeded");
    assert_eq!(report["final_result"][0]["Year_2030"], 60);
    assert_eq!(report["refinement_steps"], json!([]));
}

#[tokio::test]
async fn short_trend_output_is_refined_three_times_then_forced_through() {
    let short = "x".repeat(40);
    let port = Arc::new(happy_port(3).script(Stage::Trend, vec![text(short.clone())]));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    let trend_calls = port.calls_for(Stage::Trend);
    assert_eq!(trend_calls.len(), 4);
    assert_eq!(outcome.state.retry_count(Stage::Trend), 3);
    assert_eq!(outcome.state.accepted(Stage::Trend).unwrap().raw_output(), short);

    let refinements: Vec<_> = outcome.state.refinement_log().collect();
    assert_eq!(refinements.len(), 3);
    assert_eq!(
        refinements.iter().map(|r| r.refinement_index()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // Only refinement attempts carry the refinement prompt.
    assert_eq!(trend_calls[0].len(), 2);
    assert!(trend_calls[1..].iter().all(|c| c.len() == 3));
    assert_eq!(outcome.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn unparseable_trend_output_is_refined_until_it_parses() {
    let port = Arc::new(happy_port(3).script(
        Stage::Trend,
        vec![text(long_text("not json at all")), text(trends_json(2))],
    ));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(port.calls_for(Stage::Trend).len(), 2);
    let accepted = outcome.state.accepted(Stage::Trend).unwrap();
    assert_eq!(accepted.refinement_index(), 1);
    assert!(accepted.is_refinement());
}

#[tokio::test]
async fn opportunity_stage_is_gated_on_length_only() {
    let port = Arc::new(happy_port(3).script(
        Stage::Opportunity,
        vec![text("too short"), text(long_text("plain prose, no json"))],
    ));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(port.calls_for(Stage::Opportunity).len(), 2);
    assert_eq!(outcome.state.retry_count(Stage::Opportunity), 1);
    assert_eq!(outcome.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn competitor_and_synthesis_are_never_refined() {
    let port = Arc::new(happy_port(3).script(Stage::Competitor, vec![text("tiny")]));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(port.calls_for(Stage::Competitor).len(), 1);
    assert_eq!(port.calls_for(Stage::Synthesis).len(), 1);
    assert_eq!(outcome.state.accepted(Stage::Competitor).unwrap().raw_output(), "tiny");
}

#[tokio::test]
async fn synthesis_with_no_valid_entry_fails_and_keeps_raw_text() {
    let mut broken = entry(0);
    broken.as_object_mut().unwrap().remove("Year_2027");
    let raw = json!({ "trends": [broken] }).to_string();
    let port = Arc::new(happy_port(3).script(Stage::Synthesis, vec![text(raw.clone())]));

    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.state.final_result().is_none());
    assert!(matches!(outcome.error, Some(PipelineError::FinalParse(_))));
    assert_eq!(outcome.fallback_output.as_deref(), Some(raw.as_str()));
    for stage in [Stage::Trend, Stage::Opportunity, Stage::Competitor] {
        assert!(outcome.state.accepted(stage).is_some(), "{stage}");
    }

    let report = outcome.report();
    assert_eq!(report.final_result, None);
    assert!(report.error.unwrap().contains("could not be parsed"));
}

#[tokio::test]
async fn final_result_is_truncated_to_k_in_generation_order() {
    let port = Arc::new(happy_port(8));
    let outcome = executor(&port)
        .run("urban farming", k(5), CancellationToken::new())
        .await;

    let names: Vec<_> = outcome
        .state
        .final_result()
        .unwrap()
        .iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, ["Trend 0", "Trend 1", "Trend 2", "Trend 3", "Trend 4"]);
}

#[tokio::test]
async fn largest_k_keeps_fifty_valid_entries() {
    let port = Arc::new(happy_port(60));
    let outcome = executor(&port)
        .run("urban farming", k(50), CancellationToken::new())
        .await;

    let trends = outcome.state.final_result().unwrap();
    assert_eq!(trends.len(), 50);
    assert_eq!(trends[49].name.as_str(), "Trend 49");
    for entry in trends {
        assert!(entry.adoption.iter().all(|(_, p)| (1..=100).contains(&p.as_u8())));
        assert!(entry.week_over_week_growth_pct.as_f64() >= 0.0);
        assert!((0.0..=100.0).contains(&entry.acceptance_probability_pct.as_f64()));
    }
}

#[tokio::test]
async fn short_opportunity_output_is_forced_through_at_the_ceiling() {
    let port = Arc::new(happy_port(3).script(Stage::Opportunity, vec![text("too short")]));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(port.calls_for(Stage::Opportunity).len(), 4);
    assert_eq!(outcome.state.retry_count(Stage::Opportunity), 3);
    assert_eq!(
        outcome.state.accepted(Stage::Opportunity).unwrap().raw_output(),
        "too short"
    );
    assert_eq!(port.calls_for(Stage::Competitor).len(), 1);
    assert_eq!(outcome.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn configured_default_k_applies_when_request_omits_it() {
    let mut config = config();
    config.pipeline.default_trend_count = 2;
    let port = Arc::new(happy_port(6));
    let executor = PipelineExecutor::new(config, port.clone() as Arc<dyn GenerationPort>).unwrap();

    let outcome = executor.run("urban farming", None, CancellationToken::new()).await;
    assert_eq!(outcome.state.final_result().unwrap().len(), 2);
    assert!(port.calls_for(Stage::Trend)[0][1].content.contains("k=2"));
}

#[tokio::test]
async fn prompts_never_see_later_stage_output() {
    let port = Arc::new(happy_port(3));
    executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    let prompt = |stage| {
        port.calls_for(stage)[0]
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    };

    let trend = prompt(Stage::Trend);
    assert!(trend.contains("leak=[]"));
    assert!(!trend.contains("OPP-MARK") && !trend.contains("COMP-MARK"));

    let competitor = prompt(Stage::Competitor);
    assert!(competitor.contains("OPP-MARK"));
    assert!(competitor.contains("leak=[]"));
    assert!(!competitor.contains("TREND-MARK"));

    let synthesis = prompt(Stage::Synthesis);
    for marker in ["TREND-MARK", "OPP-MARK", "COMP-MARK"] {
        assert!(synthesis.contains(marker), "{marker}");
    }
}

#[tokio::test]
async fn exhausted_port_fails_run_and_preserves_accepted_records() {
    let port = Arc::new(happy_port(3).script(
        Stage::Competitor,
        vec![Reply::Fail(GenerationError::transient("connection reset"))],
    ));
    let outcome = executor(&port)
        .run("urban farming", k(10), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::StageExecution { stage: Stage::Competitor, .. })
    ));
    assert!(outcome.state.accepted(Stage::Trend).is_some());
    assert!(outcome.state.accepted(Stage::Opportunity).is_some());
    assert!(outcome.state.accepted(Stage::Competitor).is_none());
    assert!(outcome.state.final_result().is_none());
    assert!(port.calls_for(Stage::Synthesis).is_empty());
    assert!(outcome.state.elapsed_time().is_some());
    assert!(outcome
        .report()
        .error
        .unwrap()
        .starts_with("stage 'competitor' failed"));
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let port = Arc::new(happy_port(3));
    let token = CancellationToken::new();
    token.cancel();

    let outcome = executor(&port).run("urban farming", k(10), token).await;
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(port.total_calls(), 0);
    assert!(outcome.state.stage_log().is_empty());
    assert_eq!(
        outcome.error.unwrap().to_string(),
        "run cancelled during trend"
    );
}

#[tokio::test]
async fn cancellation_mid_call_is_not_counted_as_a_refinement() {
    let port = Arc::new(happy_port(3).script(Stage::Trend, vec![text("short"), Reply::Hang]));
    let token = CancellationToken::new();
    let canceller = {
        let port = port.clone();
        let token = token.clone();
        tokio::spawn(async move {
            port.hung.notified().await;
            token.cancel();
        })
    };

    let outcome = executor(&port).run("urban farming", k(10), token).await;
    canceller.await.unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(port.calls_for(Stage::Trend).len(), 2);
    // One record for the short attempt; none for the cancelled call.
    assert_eq!(outcome.state.stage_log().len(), 1);
    assert_eq!(outcome.state.retry_count(Stage::Trend), 1);
    assert!(outcome.state.final_result().is_none());
}

#[tokio::test]
async fn successful_run_is_handed_to_document_store() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let port = Arc::new(happy_port(3));
    let executor = executor(&port).with_document_store(Arc::new(ChannelStore(tx)));

    let outcome = executor
        .run("urban farming", k(10), CancellationToken::new())
        .await;
    executor.drain_hand_offs().await;
    let summary = rx.try_recv().unwrap();

    assert_eq!(summary.run_id, outcome.run_id);
    assert_eq!(summary.query, "urban farming");
    assert_eq!(summary.trends.len(), 3);
    assert_eq!(summary.stage_outputs.len(), 4);
}

#[tokio::test]
async fn failed_run_is_not_indexed() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let port = Arc::new(happy_port(3).script(Stage::Synthesis, vec![text("no json here")]));
    let executor = executor(&port).with_document_store(Arc::new(ChannelStore(tx)));

    let outcome = executor
        .run("urban farming", k(10), CancellationToken::new())
        .await;
    assert_eq!(outcome.status, RunStatus::Failed);
    executor.drain_hand_offs().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn blank_query_is_rejected_without_generation() {
    let port = Arc::new(happy_port(3));
    let outcome = executor(&port).run("   ", k(10), CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(outcome.error, Some(PipelineError::InvalidRequest { .. })));
    assert_eq!(port.total_calls(), 0);
}

#[test]
fn missing_stage_template_is_rejected_at_construction() {
    let mut config = config();
    config.prompts.synthesis = String::new();
    let port: Arc<dyn GenerationPort> = Arc::new(happy_port(3));

    let err = PipelineExecutor::new(config, port).err().unwrap();
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert!(err.to_string().contains("prompts.synthesis"));
}

#[tokio::test]
async fn concurrent_runs_do_not_share_state() {
    let port = Arc::new(happy_port(3));
    let executor = executor(&port);

    let (a, b) = tokio::join!(
        executor.run("urban farming", k(1), CancellationToken::new()),
        executor.run("space tourism", k(2), CancellationToken::new()),
    );

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.state.user_query(), "urban farming");
    assert_eq!(b.state.user_query(), "space tourism");
    assert_eq!(a.state.final_result().unwrap().len(), 1);
    assert_eq!(b.state.final_result().unwrap().len(), 2);
    assert_eq!(a.state.stage_log().len(), 4);
    assert_eq!(b.state.stage_log().len(), 4);
    assert_eq!(port.total_calls(), 8);
}
