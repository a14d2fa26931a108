//! Run state machine and the per-run working memory it drives.
//!
//! [`RunPhase::next`] is the complete transition table. [`PipelineState`] is
//! owned by exactly one orchestrator for the duration of a run; every
//! mutation goes through its methods, and only the orchestrator calls them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PipelineError, PipelineRunId, Stage, StageRecord, TrendCount, TrendEntry};

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Position of a run in the stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Trend,
    Opportunity,
    Competitor,
    Synthesis,
    Done,
    Failed,
}

/// Input to the transition table, produced after each stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    /// The attempt was accepted (by the gate, or unconditionally for an
    /// ungated stage).
    Accept,
    /// The gate asked for another attempt at the same stage.
    Refine,
    /// The synthesis output did not yield a final trend collection.
    ParseFailed,
    /// A stage could not execute (port exhausted, fatal error, cancellation).
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: RunPhase,
    pub event: PhaseEvent,
}

impl RunPhase {
    pub const INITIAL: RunPhase = RunPhase::Trend;

    /// Stage executed in this phase; `None` for terminal phases.
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunPhase::Trend => Some(Stage::Trend),
            RunPhase::Opportunity => Some(Stage::Opportunity),
            RunPhase::Competitor => Some(Stage::Competitor),
            RunPhase::Synthesis => Some(Stage::Synthesis),
            RunPhase::Done | RunPhase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    pub fn next(self, event: PhaseEvent) -> Result<RunPhase, InvalidTransition> {
        use PhaseEvent::*;
        use RunPhase::*;

        let to = match (self, event) {
            (Trend, Refine) => Trend,
            (Trend, Accept) => Opportunity,
            (Opportunity, Refine) => Opportunity,
            (Opportunity, Accept) => Competitor,
            (Competitor, Accept) => Synthesis,
            (Synthesis, Accept) => Done,
            (Synthesis, ParseFailed) => Failed,
            (Trend | Opportunity | Competitor | Synthesis, Abort) => Failed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(to)
    }
}

// ---------------------------------------------------------------------------
// Per-run working memory
// ---------------------------------------------------------------------------

/// Working memory of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    user_query: String,
    requested_trend_count: TrendCount,
    retry_ceiling: u32,
    stage_log: Vec<StageRecord>,
    accepted_by_stage: BTreeMap<Stage, StageRecord>,
    retry_count_by_stage: BTreeMap<Stage, u32>,
    final_result: Option<Vec<TrendEntry>>,
    elapsed_time: Option<Duration>,
}

impl PipelineState {
    pub fn new(user_query: impl Into<String>, k: TrendCount, retry_ceiling: u32) -> Self {
        Self {
            user_query: user_query.into(),
            requested_trend_count: k,
            retry_ceiling,
            stage_log: Vec::new(),
            accepted_by_stage: BTreeMap::new(),
            retry_count_by_stage: BTreeMap::new(),
            final_result: None,
            elapsed_time: None,
        }
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn requested_trend_count(&self) -> TrendCount {
        self.requested_trend_count
    }

    /// Every attempt in execution order, superseded refinements included.
    pub fn stage_log(&self) -> &[StageRecord] {
        &self.stage_log
    }

    /// Attempts that were refinements of an earlier attempt, in order.
    pub fn refinement_log(&self) -> impl Iterator<Item = &StageRecord> {
        self.stage_log.iter().filter(|r| r.is_refinement())
    }

    pub fn accepted(&self, stage: Stage) -> Option<&StageRecord> {
        self.accepted_by_stage.get(&stage)
    }

    pub fn accepted_by_stage(&self) -> &BTreeMap<Stage, StageRecord> {
        &self.accepted_by_stage
    }

    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_count_by_stage.get(&stage).copied().unwrap_or(0)
    }

    pub fn final_result(&self) -> Option<&[TrendEntry]> {
        self.final_result.as_deref()
    }

    pub fn elapsed_time(&self) -> Option<Duration> {
        self.elapsed_time
    }

    pub fn record_attempt(&mut self, record: StageRecord) {
        self.stage_log.push(record);
    }

    /// Marks `record` as the accepted output of its stage.
    pub fn accept(&mut self, record: StageRecord) {
        self.accepted_by_stage.insert(record.stage(), record);
    }

    /// Counts one more refinement of `stage`, saturating at the ceiling.
    /// Returns the new count.
    pub fn increment_retry(&mut self, stage: Stage) -> u32 {
        let count = self.retry_count_by_stage.entry(stage).or_insert(0);
        *count = (*count + 1).min(self.retry_ceiling);
        *count
    }

    /// Stores the final trend list, keeping at most `k` entries in generation
    /// order.
    pub fn set_final_result(&mut self, mut trends: Vec<TrendEntry>) {
        trends.truncate(self.requested_trend_count.as_usize());
        self.final_result = Some(trends);
    }

    /// Records the run's wall-clock duration. Only the first call has effect.
    pub fn stamp_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_time.get_or_insert(elapsed);
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Everything a caller receives from one run. Always produced, even when the
/// run fails.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run_id: PipelineRunId,
    pub status: RunStatus,
    pub state: PipelineState,
    /// Why the run did not succeed.
    pub error: Option<PipelineError>,
    /// Raw synthesis text kept when it could not be parsed.
    pub fallback_output: Option<String>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// JSON-compatible view of the outcome.
    pub fn report(&self) -> RunReport {
        let accepted = |stage| self.state.accepted(stage).cloned();
        RunReport {
            run_id: self.run_id,
            status: self.status,
            query: self.state.user_query().to_string(),
            k: self.state.requested_trend_count(),
            trend: accepted(Stage::Trend),
            opportunity: accepted(Stage::Opportunity),
            competitor: accepted(Stage::Competitor),
            synthesis: accepted(Stage::Synthesis),
            refinement_steps: self.state.refinement_log().cloned().collect(),
            final_result: self.state.final_result().map(<[TrendEntry]>::to_vec),
            elapsed_secs: self
                .state
                .elapsed_time()
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
            error: self.error.as_ref().map(ToString::to_string),
            fallback_output: self.fallback_output.clone(),
        }
    }
}

/// Serialisable result object returned to request-handling layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: PipelineRunId,
    pub status: RunStatus,
    pub query: String,
    pub k: TrendCount,
    pub trend: Option<StageRecord>,
    pub opportunity: Option<StageRecord>,
    pub competitor: Option<StageRecord>,
    pub synthesis: Option<StageRecord>,
    pub refinement_steps: Vec<StageRecord>,
    pub final_result: Option<Vec<TrendEntry>>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
    pub fallback_output: Option<String>,
}
