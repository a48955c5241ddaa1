//! Concrete event instances, the unit every pipeline stage works on.
//!
//! A recurrence rule never travels past the expander; downstream code only
//! ever sees `Occurrence`s.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ProfileId, SourceId};

/// Semantic type of an occurrence, ordered from least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Regular,
    Holiday,
    Anniversary,
    Birthday,
}

impl EventKind {
    /// Whether this kind belongs in the countdown list on its own.
    pub fn is_countdown_worthy(self) -> bool {
        self != EventKind::Regular
    }
}

/// Deterministic key of one occurrence: same feed item + same start, same id.
///
/// The owning source and profile are deliberately not part of the key, so a
/// feed subscribed twice collapses to one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceId(String);

impl OccurrenceId {
    pub fn new(uid: &str, start: &OccurrenceTime) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(uid.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(start.start_key().as_bytes());
        let hex = hasher.finalize().to_hex();
        OccurrenceId(hex[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When an occurrence happens.
///
/// Timed occurrences are normalised to UTC instants. All-day occurrences keep
/// calendar dates only; `end` is exclusive, as in iCalendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OccurrenceTime {
    AllDay { start: NaiveDate, end: NaiveDate },
    Timed { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl OccurrenceTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, OccurrenceTime::AllDay { .. })
    }

    /// Canonical string fed into the stable identity.
    fn start_key(&self) -> String {
        match self {
            OccurrenceTime::AllDay { start, .. } => start.format("%Y-%m-%d").to_string(),
            OccurrenceTime::Timed { start, .. } => {
                start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            }
        }
    }

    /// Start as an instant; all-day occurrences start at local midnight.
    pub fn start_instant(&self, tz: Tz) -> DateTime<Utc> {
        match self {
            OccurrenceTime::AllDay { start, .. } => local_midnight(*start, tz),
            OccurrenceTime::Timed { start, .. } => *start,
        }
    }

    /// End as an instant; all-day occurrences end at local midnight of `end`.
    pub fn end_instant(&self, tz: Tz) -> DateTime<Utc> {
        match self {
            OccurrenceTime::AllDay { end, .. } => local_midnight(*end, tz),
            OccurrenceTime::Timed { end, .. } => *end,
        }
    }

    /// Calendar date the occurrence starts on in `tz`.
    pub fn start_date(&self, tz: Tz) -> NaiveDate {
        match self {
            OccurrenceTime::AllDay { start, .. } => *start,
            OccurrenceTime::Timed { start, .. } => start.with_timezone(&tz).date_naive(),
        }
    }

    /// Last calendar date the occurrence covers in `tz`.
    pub fn last_date(&self, tz: Tz) -> NaiveDate {
        match self {
            OccurrenceTime::AllDay { start, end } => {
                (*end - Duration::days(1)).max(*start)
            }
            OccurrenceTime::Timed { start, end } => {
                let end_local = end.with_timezone(&tz);
                let start_local = start.with_timezone(&tz);
                // An event ending exactly at midnight does not cover that day.
                if end_local > start_local && end_local.time() == chrono::NaiveTime::MIN {
                    end_local.date_naive() - Duration::days(1)
                } else {
                    end_local.date_naive()
                }
            }
        }
    }

    /// Human-readable length: `30m`, `1h 30m`, `All day`, `3 days`.
    pub fn duration_label(&self) -> String {
        match self {
            OccurrenceTime::AllDay { start, end } => {
                let days = (*end - *start).num_days().max(1);
                if days == 1 {
                    "All day".to_string()
                } else {
                    format!("{days} days")
                }
            }
            OccurrenceTime::Timed { start, end } => {
                let secs = (*end - *start).num_seconds().max(0) as u64;
                if secs == 0 {
                    return "0m".to_string();
                }
                // Sub-minute precision is noise on an agenda.
                let rounded = std::time::Duration::from_secs(secs / 60 * 60);
                if rounded.is_zero() {
                    "1m".to_string()
                } else {
                    humantime::format_duration(rounded).to_string()
                }
            }
        }
    }
}

/// Midnight of `date` in `tz`, as a UTC instant.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        // Zones that skip midnight on DST change start the day at 01:00.
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// One concrete calendar event instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    /// UID of the feed item this was expanded from.
    pub uid: String,
    pub title: String,
    #[serde(flatten)]
    pub time: OccurrenceTime,
    pub location: Option<String>,
    pub profile_id: ProfileId,
    pub source_id: SourceId,
    /// Own colour from the feed, or the profile colour after classification.
    pub color: Option<String>,
    pub kind: EventKind,
    /// Regular occurrences explicitly flagged for the countdown list.
    pub important: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// iCalendar PRIORITY, 1 (highest) to 9.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    pub duration: String,
}

impl Occurrence {
    pub fn is_all_day(&self) -> bool {
        self.time.is_all_day()
    }

    /// Whether this belongs in the countdown list.
    pub fn is_countdown_worthy(&self) -> bool {
        self.kind.is_countdown_worthy() || self.important
    }
}
