//! [`TrendEntry`]: one market trend paired with the startup opportunity it
//! suggests.
//!
//! Generation stages are asked to emit entries in the field naming of
//! [`TrendEntryWire`] (`Year_2025`, `Startup_Name`, `YC_chances`, ...). The
//! domain type converts from that shape through [`TrendEntry::from_wire`], so
//! every range invariant is checked exactly once, at construction. Entries
//! that violate an invariant are rejected, never coerced.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AcceptanceProbability, AdoptionPct, GrowthRate, TrendName};

/// First year of the adoption projection series.
pub const FIRST_PROJECTION_YEAR: u16 = 2025;

/// Number of consecutive yearly projections carried by every entry.
pub const PROJECTION_YEARS: usize = 6;

/// Reason a candidate entry was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrendEntryError {
    #[error("trend name is empty")]
    EmptyName,

    #[error("Year_{year} = {value} is outside 1..=100")]
    AdoptionOutOfRange { year: u16, value: i64 },

    #[error("Growth_rate_WoW = {0} is negative or not finite")]
    InvalidGrowthRate(f64),

    #[error("YC_chances = {0} is outside 0..=100")]
    InvalidAcceptanceProbability(f64),
}

/// Projected yearly adoption for [`PROJECTION_YEARS`] consecutive years
/// starting at [`FIRST_PROJECTION_YEAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdoptionSeries([AdoptionPct; PROJECTION_YEARS]);

impl AdoptionSeries {
    /// Validates six raw yearly values in order.
    pub fn from_raw(values: [i64; PROJECTION_YEARS]) -> Result<Self, TrendEntryError> {
        let mut out = [AdoptionPct::MIN; PROJECTION_YEARS];
        for (offset, value) in values.into_iter().enumerate() {
            out[offset] = AdoptionPct::new(value).ok_or(TrendEntryError::AdoptionOutOfRange {
                year: FIRST_PROJECTION_YEAR + offset as u16,
                value,
            })?;
        }
        Ok(Self(out))
    }

    /// Adoption for `year`, if it falls inside the series.
    pub fn for_year(&self, year: u16) -> Option<AdoptionPct> {
        let offset = year.checked_sub(FIRST_PROJECTION_YEAR)? as usize;
        self.0.get(offset).copied()
    }

    /// `(year, adoption)` pairs in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, AdoptionPct)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(offset, pct)| (FIRST_PROJECTION_YEAR + offset as u16, *pct))
    }
}

/// One market-trend / startup-opportunity unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrendEntryWire", into = "TrendEntryWire")]
pub struct TrendEntry {
    pub name: TrendName,
    pub description: String,
    pub adoption: AdoptionSeries,
    pub startup_name: String,
    pub startup_opportunity: String,
    pub week_over_week_growth_pct: GrowthRate,
    pub acceptance_probability_pct: AcceptanceProbability,
    /// Comma-joined free text.
    pub related_trends: String,
}

impl TrendEntry {
    /// Validates a wire record into a domain entry.
    pub fn from_wire(wire: TrendEntryWire) -> Result<Self, TrendEntryError> {
        let name = TrendName::new(wire.name).ok_or(TrendEntryError::EmptyName)?;
        let adoption = AdoptionSeries::from_raw([
            wire.year_2025,
            wire.year_2026,
            wire.year_2027,
            wire.year_2028,
            wire.year_2029,
            wire.year_2030,
        ])?;
        let week_over_week_growth_pct = GrowthRate::new(wire.growth_rate_wow)
            .ok_or(TrendEntryError::InvalidGrowthRate(wire.growth_rate_wow))?;
        let acceptance_probability_pct = AcceptanceProbability::new(wire.yc_chances)
            .ok_or(TrendEntryError::InvalidAcceptanceProbability(wire.yc_chances))?;

        Ok(Self {
            name,
            description: wire.description,
            adoption,
            startup_name: wire.startup_name,
            startup_opportunity: wire.startup_opportunity,
            week_over_week_growth_pct,
            acceptance_probability_pct,
            related_trends: wire.related_trends,
        })
    }

    /// Related trend names, split on commas with blanks removed.
    pub fn related_trend_names(&self) -> Vec<&str> {
        self.related_trends
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl TryFrom<TrendEntryWire> for TrendEntry {
    type Error = TrendEntryError;

    fn try_from(wire: TrendEntryWire) -> Result<Self, Self::Error> {
        Self::from_wire(wire)
    }
}

/// Field layout of a trend entry as emitted by generation stages.
///
/// Year fields are signed so that negative model output reaches validation
/// and is reported as out of range instead of as a type error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntryWire {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "Year_2025")]
    pub year_2025: i64,
    #[serde(rename = "Year_2026")]
    pub year_2026: i64,
    #[serde(rename = "Year_2027")]
    pub year_2027: i64,
    #[serde(rename = "Year_2028")]
    pub year_2028: i64,
    #[serde(rename = "Year_2029")]
    pub year_2029: i64,
    #[serde(rename = "Year_2030")]
    pub year_2030: i64,
    #[serde(rename = "Startup_Name", default)]
    pub startup_name: String,
    #[serde(rename = "Startup_Opportunity", default)]
    pub startup_opportunity: String,
    #[serde(rename = "Growth_rate_WoW")]
    pub growth_rate_wow: f64,
    #[serde(rename = "YC_chances")]
    pub yc_chances: f64,
    #[serde(rename = "Related_trends", default)]
    pub related_trends: String,
}

impl From<TrendEntry> for TrendEntryWire {
    fn from(entry: TrendEntry) -> Self {
        let adoption = entry.adoption;
        let year = |y: u16| {
            adoption
                .for_year(y)
                .map(|p| p.as_u8() as i64)
                .unwrap_or_default()
        };
        Self {
            year_2025: year(2025),
            year_2026: year(2026),
            year_2027: year(2027),
            year_2028: year(2028),
            year_2029: year(2029),
            year_2030: year(2030),
            name: entry.name.into(),
            description: entry.description,
            startup_name: entry.startup_name,
            startup_opportunity: entry.startup_opportunity,
            growth_rate_wow: entry.week_over_week_growth_pct.as_f64(),
            yc_chances: entry.acceptance_probability_pct.as_f64(),
            related_trends: entry.related_trends,
        }
    }
}
