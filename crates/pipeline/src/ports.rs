//! Port traits implemented by infrastructure crates.
//!
//! The domain defines *what* it needs from the outside world; the `llm` and
//! `document-store` crates define *how* to supply it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    DocumentId, GenerationError, IndexingError, PipelineRunId, Stage, Timestamp, TrendEntry,
};

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Produces text for an ordered, role-tagged context.
///
/// Implementations retain no state between calls and may be shared across
/// concurrent runs.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, GenerationError>;
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// Serialised summary of a successful run, handed to a document store for
/// later similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: PipelineRunId,
    pub query: String,
    pub timestamp: Timestamp,
    /// Accepted raw output per stage.
    pub stage_outputs: BTreeMap<Stage, String>,
    pub trends: Vec<TrendEntry>,
}

impl RunSummary {
    /// Plain-text body suitable for embedding.
    pub fn document_text(&self) -> String {
        let mut text = format!("Query: {}\n", self.query);
        for entry in &self.trends {
            text.push_str(&format!(
                "\nTrend: {}\n{}\nStartup: {} - {}\nRelated: {}\n",
                entry.name,
                entry.description,
                entry.startup_name,
                entry.startup_opportunity,
                entry.related_trends
            ));
        }
        for (stage, output) in &self.stage_outputs {
            if matches!(stage, Stage::Opportunity | Stage::Competitor) {
                text.push_str(&format!("\n[{stage}]\n{output}\n"));
            }
        }
        text
    }
}

/// Indexes run summaries for later retrieval.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn index(&self, summary: &RunSummary) -> Result<DocumentId, IndexingError>;
}
