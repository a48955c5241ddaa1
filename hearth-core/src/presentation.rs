//! Client-side view of a published result: hidden profiles and the grace window.
//!
//! Applying the filter never touches the result it reads, so it can be re-run
//! whenever the hidden set or the clock changes.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::agenda::{AggregationResult, Countdown, DayGroup};
use crate::config::ProfileId;
use crate::constants::GRACE_PERIOD_MINUTES;
use crate::occurrence::{Occurrence, OccurrenceTime};

/// What a display shows after local preferences are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleAgenda {
    pub day_groups: Vec<DayGroup>,
    pub upcoming: Vec<Countdown>,
    /// Unfiltered; counts what exists, not what is shown.
    pub today_count: usize,
}

/// Filter `result` for display at `now`.
pub fn visible_view(
    result: &AggregationResult,
    hidden: &HashSet<ProfileId>,
    now: DateTime<Utc>,
) -> VisibleAgenda {
    let tz = result.timezone;
    let today = now.with_timezone(&tz).date_naive();
    let grace = Duration::minutes(GRACE_PERIOD_MINUTES);

    let day_groups = result
        .day_groups
        .iter()
        .filter(|group| group.date >= today)
        .filter_map(|group| {
            let occurrences: Vec<Occurrence> = group
                .occurrences
                .iter()
                .filter(|o| !hidden.contains(&o.profile_id))
                .filter(|o| group.date != today || !ended_before_grace(o, now, grace))
                .cloned()
                .collect();
            (!occurrences.is_empty()).then(|| DayGroup {
                date: group.date,
                label: group.label.clone(),
                occurrences,
            })
        })
        .collect();

    let upcoming = result
        .upcoming
        .iter()
        .filter(|c| !hidden.contains(&c.occurrence.profile_id))
        .cloned()
        .collect();

    VisibleAgenda {
        day_groups,
        upcoming,
        today_count: result.today_count,
    }
}

/// Timed occurrences that ended more than `grace` ago. All-day ones never expire here.
fn ended_before_grace(occurrence: &Occurrence, now: DateTime<Utc>, grace: Duration) -> bool {
    match &occurrence.time {
        OccurrenceTime::AllDay { .. } => false,
        OccurrenceTime::Timed { end, .. } => now - *end > grace,
    }
}
