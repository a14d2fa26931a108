//! Immutable run configuration: model parameters, quality gate thresholds,
//! and stage prompt templates.
//!
//! Loaded once (by the composition root) and passed explicitly to the
//! executors. Nothing in the workspace reads configuration from globals.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ModelName, PipelineError, QualityGate, Stage, TrendCount};

/// Default OpenAI-compatible endpoint (Together AI).
pub const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";

/// Complete configuration for the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub model: ModelSettings,
    #[serde(default)]
    pub gate: QualityGate,
    #[serde(default)]
    pub pipeline: RunDefaults,
    pub prompts: PromptTemplates,
}

/// Generation provider parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub name: ModelName,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Additional attempts after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay of the exponential back-off between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl ModelSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "TOGETHERAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Run-level defaults applied when a request leaves a value unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunDefaults {
    /// Raw value; validated into a [`TrendCount`] by [`PipelineConfig::validate`].
    #[serde(default = "default_trend_count")]
    pub default_trend_count: u32,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            default_trend_count: TrendCount::DEFAULT,
        }
    }
}

fn default_trend_count() -> u32 {
    TrendCount::DEFAULT
}

/// Stage prompt templates. See [`crate::prompt`] for placeholder syntax.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplates {
    /// System instructions sent ahead of every stage prompt. Optional.
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub trend_analysis: String,
    #[serde(default)]
    pub opportunity_analysis: String,
    #[serde(default)]
    pub competitor_analysis: String,
    #[serde(default)]
    pub synthesis: String,
    /// Extra instruction appended on refinement attempts. Optional.
    #[serde(default)]
    pub refinement: String,
    /// Unrecognised keys are kept so that templates added for newer versions
    /// do not break loading.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl PromptTemplates {
    /// Template for `stage`.
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Trend => &self.trend_analysis,
            Stage::Opportunity => &self.opportunity_analysis,
            Stage::Competitor => &self.competitor_analysis,
            Stage::Synthesis => &self.synthesis,
        }
    }

    fn key(stage: Stage) -> &'static str {
        match stage {
            Stage::Trend => "trend_analysis",
            Stage::Opportunity => "opportunity_analysis",
            Stage::Competitor => "competitor_analysis",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl PipelineConfig {
    /// Parses a TOML document. Does not validate; call [`Self::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::configuration(e.to_string()))
    }

    /// Checks every required setting. A config that passes can start runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            if self.prompts.for_stage(stage).trim().is_empty() {
                return Err(PipelineError::configuration(format!(
                    "prompt template 'prompts.{}' is missing or empty",
                    PromptTemplates::key(stage)
                )));
            }
        }

        let model = &self.model;
        if model.base_url.trim().is_empty() {
            return Err(PipelineError::configuration("model.base_url is empty"));
        }
        if !(0.0..=2.0).contains(&model.temperature) {
            return Err(PipelineError::configuration(format!(
                "model.temperature {} outside 0.0..=2.0",
                model.temperature
            )));
        }
        if model.max_tokens == 0 {
            return Err(PipelineError::configuration("model.max_tokens must be positive"));
        }
        if model.timeout_secs == 0 {
            return Err(PipelineError::configuration("model.timeout_secs must be positive"));
        }
        if self.gate.retry_ceiling == 0 {
            return Err(PipelineError::configuration("gate.retry_ceiling must be positive"));
        }
        self.default_trend_count()?;
        Ok(())
    }

    /// The configured default `k`.
    pub fn default_trend_count(&self) -> Result<TrendCount, PipelineError> {
        TrendCount::new(self.pipeline.default_trend_count).ok_or_else(|| {
            PipelineError::configuration(format!(
                "pipeline.default_trend_count {} outside {}..={}",
                self.pipeline.default_trend_count,
                TrendCount::MIN,
                TrendCount::MAX
            ))
        })
    }
}
