//! SpyGlass document store adapters.
//!
//! Implements the [`pipeline::DocumentStore`] trait twice: over HTTP for a
//! remote similarity-search service ([`HttpDocumentStore`]) and as JSON files
//! in a local results directory ([`JsonFileStore`]). [`FanOutStore`] combines
//! several stores behind one.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport and file formats live here; the pipeline
//! only hands over a [`pipeline::RunSummary`] and never waits on the result.

mod fan_out;
mod file;
mod http;

pub use fan_out::FanOutStore;
pub use file::JsonFileStore;
pub use http::{HttpDocumentStore, DEFAULT_COLLECTION};
