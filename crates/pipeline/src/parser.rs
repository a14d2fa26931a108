//! Structured parser: raw stage output → validated [`TrendEntry`] list.
//!
//! The input must be a JSON object with a `trends` array, either bare or in
//! the first Markdown code fence of the text. Prose before a fence is
//! ignored; prose around bare JSON is a syntax failure. Each array element is
//! validated independently; malformed elements are dropped and logged. The
//! batch as a whole only fails when nothing survives.
//!
//! Parsing is a pure function of its input.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::TrendEntry;

/// Why a stage's raw output could not be turned into a trend collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// The text is not a syntactically valid JSON document.
    #[error("output is not valid JSON: {0}")]
    InvalidSyntax(String),

    /// The document is not an object with a `trends` array.
    #[error("output has no `trends` collection")]
    MissingTrends,

    /// Every element of `trends` failed validation (or the array was empty).
    #[error("no valid trend entries ({dropped} dropped)")]
    NoValidEntries {
        /// Number of elements rejected by validation.
        dropped: usize,
    },
}

/// Parses `raw` into the trend entries that pass validation, preserving
/// generation order.
pub fn parse_trends(raw: &str) -> Result<Vec<TrendEntry>, ParseFailure> {
    let body = fenced_body(raw);

    let document: Value =
        serde_json::from_str(body).map_err(|e| ParseFailure::InvalidSyntax(e.to_string()))?;
    let elements = match document {
        Value::Object(mut fields) => match fields.remove("trends") {
            Some(Value::Array(items)) => items,
            _ => return Err(ParseFailure::MissingTrends),
        },
        _ => return Err(ParseFailure::MissingTrends),
    };

    let total = elements.len();
    let mut accepted = Vec::with_capacity(total);
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<TrendEntry>(element) {
            Ok(entry) => accepted.push(entry),
            Err(e) => warn!(index, reason = %e, "dropping invalid trend entry"),
        }
    }

    if accepted.is_empty() {
        return Err(ParseFailure::NoValidEntries { dropped: total });
    }

    debug!(accepted = accepted.len(), dropped = total - accepted.len(), "parsed trend collection");
    Ok(accepted)
}

/// Body of the first Markdown code fence in `raw` (info string such as
/// `json` dropped), or the whole trimmed text when there is no complete fence.
fn fenced_body(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[open + 3..];
    let body = after.split_once('\n').map_or(after, |(_, rest)| rest);
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => trimmed,
    }
}

/// Instructions substituted into `{format_instructions}` for stages that must
/// return a trend collection.
pub fn format_instructions() -> &'static str {
    r#"Respond with a single JSON object and nothing else. The object must have a "trends" array; every element must have exactly these fields:

{
  "trends": [
    {
      "name": "Remote Work Tools",
      "description": "Demand for advanced remote work tools",
      "Year_2025": 65,
      "Year_2026": 72,
      "Year_2027": 81,
      "Year_2028": 88,
      "Year_2029": 92,
      "Year_2030": 96,
      "Startup_Name": "WorkFlow AI",
      "Startup_Opportunity": "Create user-friendly, secure remote work platforms",
      "Growth_rate_WoW": 7,
      "YC_chances": 65,
      "Related_trends": "Digital Transformation, Gig Economy"
    }
  ]
}

Year_2025 through Year_2030 are integer adoption percentages between 1 and 100.
Growth_rate_WoW is a week-over-week growth percentage of at least 0.
YC_chances is a percentage between 0 and 100.
Related_trends is a comma-separated list."#
}
