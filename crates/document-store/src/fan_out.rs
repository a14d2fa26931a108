//! One document store in front of several, for runs that are both saved
//! locally and indexed remotely.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{DocumentId, DocumentStore, IndexingError, RunSummary};
use tracing::warn;

/// Indexes every summary into each inner store in turn.
///
/// Succeeds with the first inner store's id when at least one store accepts
/// the summary; otherwise returns the last error.
pub struct FanOutStore {
    stores: Vec<Arc<dyn DocumentStore>>,
}

impl FanOutStore {
    pub fn new(stores: Vec<Arc<dyn DocumentStore>>) -> Self {
        Self { stores }
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[async_trait]
impl DocumentStore for FanOutStore {
    async fn index(&self, summary: &RunSummary) -> Result<DocumentId, IndexingError> {
        let mut first_id = None;
        let mut last_error = None;
        for store in &self.stores {
            match store.index(summary).await {
                Ok(id) => {
                    first_id.get_or_insert(id);
                }
                Err(e) => {
                    warn!(error = %e, "document store rejected run summary");
                    last_error = Some(e);
                }
            }
        }
        match (first_id, last_error) {
            (Some(id), _) => Ok(id),
            (None, Some(e)) => Err(e),
            (None, None) => Err(IndexingError::Unavailable("no document store configured".into())),
        }
    }
}
