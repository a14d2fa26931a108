//! Quality gate: decides whether a gated stage's latest attempt may advance.
//!
//! Rules, in priority order:
//!
//! 1. At or beyond the retry ceiling the attempt is accepted regardless of
//!    content (best effort, no infinite loops).
//! 2. Output shorter than the minimum length is refined.
//! 3. Trend-collection stages must additionally parse into at least one valid
//!    entry; free-text stages pass on length alone.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{parse_trends, OutputShape, StageRecord};

/// Outcome of a quality gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Accept,
    Refine,
}

/// Quality gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Refinements allowed per gated stage before forced acceptance.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Minimum output length, in characters.
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,
}

fn default_retry_ceiling() -> u32 {
    QualityGate::DEFAULT_RETRY_CEILING
}

fn default_min_output_chars() -> usize {
    QualityGate::DEFAULT_MIN_OUTPUT_CHARS
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            retry_ceiling: Self::DEFAULT_RETRY_CEILING,
            min_output_chars: Self::DEFAULT_MIN_OUTPUT_CHARS,
        }
    }
}

impl QualityGate {
    pub const DEFAULT_RETRY_CEILING: u32 = 3;
    pub const DEFAULT_MIN_OUTPUT_CHARS: usize = 100;

    /// Evaluates `latest` given the number of refinements already spent on
    /// its stage.
    pub fn evaluate(&self, latest: &StageRecord, retry_count: u32) -> GateDecision {
        let stage = latest.stage();
        if retry_count >= self.retry_ceiling {
            debug!(%stage, retry_count, "retry ceiling reached, accepting best effort");
            return GateDecision::Accept;
        }

        let chars = latest.raw_output().chars().count();
        if chars < self.min_output_chars {
            debug!(%stage, chars, min = self.min_output_chars, "output too short");
            return GateDecision::Refine;
        }

        match stage.output_shape() {
            OutputShape::FreeText => GateDecision::Accept,
            OutputShape::TrendCollection => match parse_trends(latest.raw_output()) {
                Ok(_) => GateDecision::Accept,
                Err(e) => {
                    debug!(%stage, reason = %e, "output did not parse");
                    GateDecision::Refine
                }
            },
        }
    }
}
