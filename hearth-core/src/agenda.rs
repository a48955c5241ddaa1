//! The published aggregation result and its projections.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::{ProfileId, SourceId};
use crate::occurrence::Occurrence;

/// Everything a display needs to render the agenda, built once per refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub generated_at: DateTime<Utc>,
    /// Display time zone the day keys and countdowns were computed in.
    pub timezone: Tz,
    /// Local date `days_until` values are relative to. Once the display's
    /// date moves past this, every countdown is off by the difference.
    pub days_until_as_of: NaiveDate,
    pub day_groups: Vec<DayGroup>,
    pub upcoming: Vec<Countdown>,
    /// Occurrences keyed to today, before any visibility filtering.
    pub today_count: usize,
    pub sources: Vec<SourceStatus>,
    /// Set only when no agenda could be produced at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregationResult {
    /// The explicit "unavailable" state: nothing to show, and why.
    pub fn unavailable(reason: impl Into<String>, now: DateTime<Utc>, tz: Tz) -> Self {
        AggregationResult {
            generated_at: now,
            timezone: tz,
            days_until_as_of: now.with_timezone(&tz).date_naive(),
            day_groups: Vec::new(),
            upcoming: Vec::new(),
            today_count: 0,
            sources: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.error.is_some()
    }

    /// Sources whose contribution did not come from this cycle's fetch.
    pub fn degraded_sources(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .filter(|s| s.state != SourceState::Fresh)
            .map(|s| s.source_id.clone())
            .collect()
    }
}

/// Occurrences keyed to one local calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub label: String,
    pub occurrences: Vec<Occurrence>,
}

/// A countdown-list entry. `days_until` is a snapshot taken at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    pub occurrence: Occurrence,
    pub days_until: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Fetched and expanded this cycle.
    Fresh,
    /// Failed this cycle; last good occurrences were substituted.
    Stale,
    /// Failed this cycle with nothing cached to substitute.
    Missing,
}

/// How one source fared in the cycle that produced a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub profile_id: ProfileId,
    pub state: SourceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this source last fetched successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}
