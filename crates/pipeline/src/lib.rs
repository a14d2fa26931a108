//! Core analysis domain for SpyGlass.
//!
//! This crate contains every domain concept of the trend-analysis pipeline:
//! the stage records a run accumulates, the trend entries it produces, the
//! parser and quality gate that judge stage output, and the state machine
//! that sequences stages. Infrastructure crates implement the port traits
//! defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`PipelineRunId`, `TrendName`, etc.) |
//! | [`types`] | Range-checked value types (`TrendCount`, `AdoptionPct`, etc.) |
//! | [`trend`] | `TrendEntry` and its wire format |
//! | [`stage`] | `Stage` and `StageRecord` |
//! | [`parser`] | Structured parser for trend collections |
//! | [`gate`] | Quality gate |
//! | [`state`] | Run phase transition table, `PipelineState`, run outcome |
//! | [`prompt`] | Prompt template rendering |
//! | [`config`] | Immutable pipeline configuration |
//! | [`ports`] | `GenerationPort` and `DocumentStore` traits |
//! | [`errors`] | Error and retry-policy types |

pub mod config;
pub mod errors;
pub mod gate;
pub mod identifiers;
pub mod parser;
pub mod ports;
pub mod prompt;
pub mod stage;
pub mod state;
pub mod trend;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{ModelSettings, PipelineConfig, PromptTemplates, RunDefaults, DEFAULT_BASE_URL};
pub use errors::{GenerationError, IndexingError, PipelineError, RetryPolicy};
pub use gate::{GateDecision, QualityGate};
pub use identifiers::{DocumentId, ModelName, PipelineRunId, TrendName};
pub use parser::{format_instructions, parse_trends, ParseFailure};
pub use ports::{ChatMessage, DocumentStore, GenerationPort, MessageRole, RunSummary};
pub use prompt::{render, PromptVars};
pub use stage::{OutputShape, Stage, StageRecord};
pub use state::{
    InvalidTransition, PhaseEvent, PipelineOutcome, PipelineState, RunPhase, RunReport, RunStatus,
};
pub use trend::{
    AdoptionSeries, TrendEntry, TrendEntryError, TrendEntryWire, FIRST_PROJECTION_YEAR,
    PROJECTION_YEARS,
};
pub use types::{AcceptanceProbability, AdoptionPct, GrowthRate, Timestamp, TrendCount};
