//! Pipeline stages and the immutable record each stage attempt produces.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// One named unit of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Market trend discovery.
    Trend,
    /// Startup opportunity analysis over the accepted trends.
    Opportunity,
    /// Competitor landscape for the accepted opportunities.
    Competitor,
    /// Final synthesis into a structured trend collection.
    Synthesis,
}

/// Shape of the text a stage is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// A JSON trend collection understood by [`crate::parse_trends`].
    TrendCollection,
    /// Free-form prose.
    FreeText,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [
        Stage::Trend,
        Stage::Opportunity,
        Stage::Competitor,
        Stage::Synthesis,
    ];

    /// Upstream stages whose accepted output this stage's prompt may read.
    ///
    /// Only earlier stages ever appear here.
    pub fn inputs(self) -> &'static [Stage] {
        match self {
            Stage::Trend => &[],
            Stage::Opportunity => &[Stage::Trend],
            Stage::Competitor => &[Stage::Opportunity],
            Stage::Synthesis => &[Stage::Trend, Stage::Opportunity, Stage::Competitor],
        }
    }

    /// Whether the quality gate may send this stage back for refinement.
    pub fn is_gated(self) -> bool {
        matches!(self, Stage::Trend | Stage::Opportunity)
    }

    pub fn output_shape(self) -> OutputShape {
        match self {
            Stage::Trend | Stage::Synthesis => OutputShape::TrendCollection,
            Stage::Opportunity | Stage::Competitor => OutputShape::FreeText,
        }
    }

    /// Template variable under which this stage's accepted output is exposed
    /// to downstream prompts.
    pub fn output_variable(self) -> &'static str {
        match self {
            Stage::Trend => "trend_analysis",
            Stage::Opportunity => "opportunity_analysis",
            Stage::Competitor => "competitor_analysis",
            Stage::Synthesis => "synthesis",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Trend => "trend",
            Stage::Opportunity => "opportunity",
            Stage::Competitor => "competitor",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed stage attempt. Never mutated after creation.
///
/// A later refinement of the same stage supersedes a record without
/// replacing it; both stay in the run's stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    stage_name: Stage,
    raw_output: String,
    timestamp: Timestamp,
    is_refinement: bool,
    refinement_index: u32,
}

impl StageRecord {
    /// Creates a record for attempt number `refinement_index` (0-based) of
    /// `stage`.
    pub fn new(stage: Stage, raw_output: impl Into<String>, refinement_index: u32) -> Self {
        Self::at(stage, raw_output, refinement_index, Timestamp::now())
    }

    /// Creates a record with an explicit creation instant.
    pub fn at(
        stage: Stage,
        raw_output: impl Into<String>,
        refinement_index: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            stage_name: stage,
            raw_output: raw_output.into(),
            timestamp,
            is_refinement: refinement_index > 0,
            refinement_index,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage_name
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_refinement(&self) -> bool {
        self.is_refinement
    }

    /// Number of attempts at this stage that preceded this one.
    pub fn refinement_index(&self) -> u32 {
        self.refinement_index
    }
}
