//! Stage executor: one generation call per invocation.
//!
//! Builds the context for a stage from the accepted outputs that stage is
//! allowed to see, calls the [`GenerationPort`] once and wraps the text in a
//! [`StageRecord`]. The executor reads [`PipelineState`] but never writes it.

use std::sync::Arc;

use pipeline::{
    format_instructions, render, ChatMessage, GenerationError, GenerationPort, PipelineError,
    PipelineState, PromptTemplates, PromptVars, Stage, StageRecord,
};
use tracing::debug;

pub struct StageExecutor {
    port: Arc<dyn GenerationPort>,
    prompts: PromptTemplates,
}

impl StageExecutor {
    pub fn new(port: Arc<dyn GenerationPort>, prompts: PromptTemplates) -> Self {
        Self { port, prompts }
    }

    /// Ordered generation context for the next attempt of `stage`.
    ///
    /// Only the accepted outputs of `stage.inputs()` are exposed as template
    /// variables; placeholders naming any other stage render empty. A
    /// refinement attempt additionally gets the `refinement` template, which
    /// may refer to the stage's previous attempt as `{previous_output}`.
    pub fn build_context(&self, stage: Stage, state: &PipelineState) -> Vec<ChatMessage> {
        let k = state.requested_trend_count().to_string();
        let mut vars = PromptVars::new();
        vars.set("user_input", state.user_query())
            .set("k", &k)
            .set("format_instructions", format_instructions());
        for input in stage.inputs() {
            if let Some(record) = state.accepted(*input) {
                vars.set(input.output_variable(), record.raw_output());
            }
        }

        let mut context = Vec::with_capacity(3);
        if !self.prompts.system.trim().is_empty() {
            context.push(ChatMessage::system(render(&self.prompts.system, &vars)));
        }
        context.push(ChatMessage::user(render(
            self.prompts.for_stage(stage),
            &vars,
        )));

        let is_refinement = state.retry_count(stage) > 0;
        if is_refinement && !self.prompts.refinement.trim().is_empty() {
            let previous = state
                .stage_log()
                .iter()
                .rev()
                .find(|r| r.stage() == stage)
                .map(StageRecord::raw_output)
                .unwrap_or_default();
            vars.set("previous_output", previous);
            context.push(ChatMessage::user(render(&self.prompts.refinement, &vars)));
        }
        context
    }

    /// Runs one attempt of `stage`. The record's refinement index is the
    /// stage's retry count at the time of the call.
    pub async fn run(&self, stage: Stage, state: &PipelineState) -> Result<StageRecord, PipelineError> {
        let refinement_index = state.retry_count(stage);
        let context = self.build_context(stage, state);
        debug!(%stage, refinement_index, messages = context.len(), "invoking generation port");

        let text = self.port.generate(&context).await.map_err(|e| match e {
            GenerationError::Cancelled => PipelineError::Cancelled { stage },
            source => PipelineError::StageExecution { stage, source },
        })?;
        Ok(StageRecord::new(stage, text, refinement_index))
    }
}
