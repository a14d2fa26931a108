//! Run summaries persisted as pretty-printed JSON files in a results
//! directory.
//!
//! File name: `<YYYYmmdd_HHMMSS>_<query-slug>_<run8>.json`. The file name is
//! the returned document id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{DocumentId, DocumentStore, IndexingError, RunSummary};
use tracing::info;

/// Longest query slug kept in a file name.
const MAX_SLUG_CHARS: usize = 48;

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(summary: &RunSummary) -> String {
        format!(
            "{}_{}_{}.json",
            summary.timestamp.file_stamp(),
            slug(&summary.query),
            summary.run_id.short()
        )
    }
}

/// Lower-case alphanumerics joined by single underscores.
fn slug(text: &str) -> String {
    let mut out = String::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push('_');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
        if out.chars().count() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let out: String = out.chars().take(MAX_SLUG_CHARS).collect();
    if out.is_empty() {
        "query".to_string()
    } else {
        out
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn index(&self, summary: &RunSummary) -> Result<DocumentId, IndexingError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = Self::file_name(summary);
        let path = self.dir.join(&name);
        let body = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), "saved run summary");
        DocumentId::new(name).ok_or_else(|| IndexingError::Rejected("empty file name".into()))
    }
}
