//! SpyGlass generation provider infrastructure adapter.
//!
//! Implements the [`pipeline::GenerationPort`] trait for OpenAI-compatible
//! chat-completions endpoints (Together AI by default), and provides the
//! timeout/retry wrapper that every production port is composed with.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response parsing,
//! error classification and back-off live here. The [`pipeline`] crate sees only
//! [`pipeline::GenerationPort`].

mod provider;
mod retry;

pub use provider::ChatCompletionsProvider;
pub use retry::RetryingGenerator;
