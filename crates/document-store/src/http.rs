//! Hand-off of run summaries to a remote indexing service.
//!
//! Protocol: `POST <base_url>/documents` with a JSON body
//! `{ "collection", "content", "metadata" }`; the service answers
//! `{ "id": "<document id>" }`. Embedding and similarity search happen on the
//! service side.

use async_trait::async_trait;
use pipeline::{DocumentId, DocumentStore, IndexingError, RunSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "spy_glass";

pub struct HttpDocumentStore {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
}

#[derive(Debug, Serialize)]
struct IndexRequest<'a> {
    collection: &'a str,
    content: String,
    metadata: &'a RunSummary,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    id: String,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/documents", base_url.trim_end_matches('/')),
            collection: collection.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, summary: &'a RunSummary) -> IndexRequest<'a> {
        IndexRequest {
            collection: &self.collection,
            content: summary.document_text(),
            metadata: summary,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    #[instrument(skip_all, fields(run_id = %summary.run_id, endpoint = %self.endpoint))]
    async fn index(&self, summary: &RunSummary) -> Result<DocumentId, IndexingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(summary))
            .send()
            .await
            .map_err(|e| IndexingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexingError::Rejected(format!("HTTP {status}: {body}")));
        }

        let parsed: IndexResponse = response
            .json()
            .await
            .map_err(|e| IndexingError::Rejected(format!("unreadable response: {e}")))?;
        let id = DocumentId::new(parsed.id)
            .ok_or_else(|| IndexingError::Rejected("empty document id".into()))?;
        debug!(document_id = %id, "run summary indexed");
        Ok(id)
    }
}
