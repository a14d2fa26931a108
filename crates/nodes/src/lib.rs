//! SpyGlass stage executor and pipeline orchestrator.
//!
//! [`StageExecutor`] turns one stage of a run into one generation call.
//! [`PipelineExecutor`] sequences the four stages, applies the quality gate to
//! the gated ones and produces the run's [`pipeline::PipelineOutcome`].
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** This crate sequences calls between business logic
//! in the [`pipeline`] crate and the port traits it defines. It contains no
//! domain rules of its own and no concrete infrastructure.

mod executor;
mod stage;

pub use executor::PipelineExecutor;
pub use stage::StageExecutor;
