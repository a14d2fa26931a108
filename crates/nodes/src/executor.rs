//! Pipeline orchestrator.
//!
//! Drives one run through the [`RunPhase`] transition table:
//!
//! ```text
//! trend ⟲ refine ─accept→ opportunity ⟲ refine ─accept→ competitor ─→ synthesis ─→ done
//!                                                                           └─ parse failure → failed
//! ```
//!
//! Any stage that cannot execute (port exhausted, fatal provider error,
//! cancellation) moves the run to `failed`. The caller always receives a
//! [`PipelineOutcome`]; errors never cross this boundary as `Err`.

use std::collections::BTreeMap;
use std::sync::Arc;

use pipeline::{
    parse_trends, DocumentStore, GateDecision, GenerationPort, PhaseEvent, PipelineConfig,
    PipelineError, PipelineOutcome, PipelineRunId, PipelineState, QualityGate, RunPhase,
    RunStatus, RunSummary, Stage, StageRecord, Timestamp, TrendCount,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use crate::StageExecutor;

/// Runs analysis pipelines against one immutable configuration.
///
/// The executor holds no per-run state, so one instance may drive any number
/// of concurrent runs.
pub struct PipelineExecutor {
    config: Arc<PipelineConfig>,
    stages: StageExecutor,
    document_store: Option<Arc<dyn DocumentStore>>,
    hand_offs: TaskTracker,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    /// Validates `config` and binds it to `port`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Configuration`] when a required template or model
    /// setting is missing or out of range.
    pub fn new(config: PipelineConfig, port: Arc<dyn GenerationPort>) -> Result<Self, PipelineError> {
        config.validate()?;
        let stages = StageExecutor::new(port, config.prompts.clone());
        Ok(Self {
            config: Arc::new(config),
            stages,
            document_store: None,
            hand_offs: TaskTracker::new(),
        })
    }

    /// Hands the summary of every successful run to `store`.
    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Waits for every document store hand-off spawned so far.
    pub async fn drain_hand_offs(&self) {
        self.hand_offs.close();
        self.hand_offs.wait().await;
        self.hand_offs.reopen();
    }

    fn gate(&self) -> &QualityGate {
        &self.config.gate
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Why a run stopped before `done`.
struct Stopped {
    status: RunStatus,
    error: PipelineError,
}

impl PipelineExecutor {
    /// Runs the full pipeline for `query`, returning `k` trends at most.
    ///
    /// `k = None` uses the configured default. A blank query fails the run
    /// without calling the generation port.
    pub async fn run(
        &self,
        query: &str,
        k: Option<TrendCount>,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let run_id = PipelineRunId::new_random();
        let k = match k {
            Some(k) => k,
            None => self.config.default_trend_count().unwrap_or_default(),
        };
        let span = info_span!("run", %run_id, k = k.as_u32());
        self.drive(run_id, query, k, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        run_id: PipelineRunId,
        query: &str,
        k: TrendCount,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let mut state = PipelineState::new(query, k, self.gate().retry_ceiling);
        let mut fallback_output = None;
        info!(query, "pipeline run started");

        let stopped = if query.trim().is_empty() {
            Some(Stopped {
                status: RunStatus::Failed,
                error: PipelineError::InvalidRequest {
                    message: "query must not be empty".into(),
                },
            })
        } else {
            self.step_until_terminal(&mut state, &mut fallback_output, &cancel)
                .await
        };

        state.stamp_elapsed(started.elapsed());
        let (status, error) = match stopped {
            None => (RunStatus::Succeeded, None),
            Some(Stopped { status, error }) => (status, Some(error)),
        };

        match &error {
            None => info!(
                trends = state.final_result().map_or(0, <[_]>::len),
                refinements = state.refinement_log().count(),
                elapsed_ms = state.elapsed_time().unwrap_or_default().as_millis() as u64,
                "pipeline run succeeded"
            ),
            Some(e) => warn!(?status, error = %e, "pipeline run did not succeed"),
        }

        let outcome = PipelineOutcome {
            run_id,
            status,
            state,
            error,
            fallback_output,
        };
        if outcome.is_success() {
            self.hand_off(&outcome);
        }
        outcome
    }

    /// Steps the phase machine until it reaches a terminal phase. Returns
    /// `None` when the run reached `done`.
    async fn step_until_terminal(
        &self,
        state: &mut PipelineState,
        fallback_output: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Option<Stopped> {
        let mut phase = RunPhase::INITIAL;
        let mut stopped = None;

        while let Some(stage) = phase.stage() {
            let record = match self.attempt(stage, state, cancel).await {
                Ok(record) => record,
                Err(error) => {
                    let status = match error {
                        PipelineError::Cancelled { .. } => RunStatus::Cancelled,
                        _ => RunStatus::Failed,
                    };
                    stopped = Some(Stopped { status, error });
                    phase = phase.next(PhaseEvent::Abort).unwrap_or(RunPhase::Failed);
                    continue;
                }
            };

            state.record_attempt(record.clone());
            let event = match stage {
                Stage::Trend | Stage::Opportunity => self.apply_gate(state, record),
                Stage::Competitor => {
                    state.accept(record);
                    PhaseEvent::Accept
                }
                Stage::Synthesis => match parse_trends(record.raw_output()) {
                    Ok(trends) => {
                        state.accept(record);
                        state.set_final_result(trends);
                        PhaseEvent::Accept
                    }
                    Err(failure) => {
                        warn!(reason = %failure, "synthesis output unusable, keeping raw text");
                        *fallback_output = Some(record.raw_output().to_string());
                        stopped = Some(Stopped {
                            status: RunStatus::Failed,
                            error: PipelineError::FinalParse(failure),
                        });
                        PhaseEvent::ParseFailed
                    }
                },
            };

            phase = match phase.next(event) {
                Ok(next) => next,
                Err(invalid) => {
                    stopped = Some(Stopped {
                        status: RunStatus::Failed,
                        error: invalid.into(),
                    });
                    RunPhase::Failed
                }
            };
        }

        match phase {
            RunPhase::Done => None,
            _ => stopped,
        }
    }

    /// One Stage Executor call, raced against cancellation.
    async fn attempt(
        &self,
        stage: Stage,
        state: &PipelineState,
        cancel: &CancellationToken,
    ) -> Result<StageRecord, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        let span = info_span!("stage", %stage, attempt = state.retry_count(stage));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
            result = self.stages.run(stage, state).instrument(span) => result,
        }
    }

    /// Gate check for a gated stage; accepts or counts a refinement.
    fn apply_gate(&self, state: &mut PipelineState, record: StageRecord) -> PhaseEvent {
        let stage = record.stage();
        match self.gate().evaluate(&record, state.retry_count(stage)) {
            GateDecision::Accept => {
                state.accept(record);
                PhaseEvent::Accept
            }
            GateDecision::Refine => {
                let retries = state.increment_retry(stage);
                info!(%stage, retries, "refining stage output");
                PhaseEvent::Refine
            }
        }
    }

    /// Spawns the document store hand-off; the run never waits on it.
    fn hand_off(&self, outcome: &PipelineOutcome) {
        let Some(store) = self.document_store.clone() else {
            return;
        };
        let state = &outcome.state;
        let summary = RunSummary {
            run_id: outcome.run_id,
            query: state.user_query().to_string(),
            timestamp: Timestamp::now(),
            stage_outputs: state
                .accepted_by_stage()
                .iter()
                .map(|(stage, record)| (*stage, record.raw_output().to_string()))
                .collect::<BTreeMap<_, _>>(),
            trends: state.final_result().map(<[_]>::to_vec).unwrap_or_default(),
        };

        let span = info_span!("index", run_id = %outcome.run_id);
        self.hand_offs.spawn(
            async move {
                match store.index(&summary).await {
                    Ok(id) => info!(document_id = %id, "run summary indexed"),
                    Err(e) => warn!(error = %e, "run summary indexing failed"),
                }
            }
            .instrument(span),
        );
    }
}
