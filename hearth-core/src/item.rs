//! Calendar items as a feed declares them, before expansion.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use tracing::debug;

/// A VEVENT from a feed: either a one-off item, a recurring master, or an
/// override of one instance of a master (`recurrence_id` set).
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub uid: String,
    pub summary: String,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub status: ItemStatus,
    pub recurrence: Option<Recurrence>,
    pub recurrence_id: Option<EventTime>,
    pub categories: Vec<String>,
    /// RFC 7986 COLOR
    pub color: Option<String>,
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    /// Raw RRULE value, e.g. `FREQ=WEEKLY;BYDAY=MO`
    pub rrule: String,
    pub exdates: Vec<EventTime>,
    pub rdates: Vec<EventTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// A DTSTART/DTEND-style value with its time zone information intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} ({})", datetime.format("%Y-%m-%dT%H:%M:%S"), tzid)
            }
        }
    }
}

/// An `EventTime` pinned to either a date or an absolute instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolved {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

impl EventTime {
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Pin this value to the timeline. Floating times and TZIDs chrono-tz
    /// does not know are read in `display_tz`.
    pub fn resolve(&self, display_tz: Tz) -> Resolved {
        match self {
            EventTime::Date(d) => Resolved::Date(*d),
            EventTime::DateTimeUtc(dt) => Resolved::Instant(*dt),
            EventTime::DateTimeFloating(naive) => {
                Resolved::Instant(local_to_utc(*naive, display_tz))
            }
            EventTime::DateTimeZoned { datetime, tzid } => {
                let tz = parse_tzid(tzid).unwrap_or_else(|| {
                    debug!(tzid = %tzid, "Unknown TZID, using display time zone");
                    display_tz
                });
                Resolved::Instant(local_to_utc(*datetime, tz))
            }
        }
    }

    /// The zone wall-clock times of this value are expressed in.
    pub fn zone(&self, display_tz: Tz) -> Tz {
        match self {
            EventTime::Date(_) | EventTime::DateTimeUtc(_) => Tz::UTC,
            EventTime::DateTimeFloating(_) => display_tz,
            EventTime::DateTimeZoned { tzid, .. } => parse_tzid(tzid).unwrap_or(display_tz),
        }
    }
}

impl Resolved {
    pub fn date(&self, tz: Tz) -> NaiveDate {
        match self {
            Resolved::Date(d) => *d,
            Resolved::Instant(dt) => dt.with_timezone(&tz).date_naive(),
        }
    }
}

/// Parse a TZID, accepting vendor-prefixed ids like
/// `/mozilla.org/20050126_1/Europe/Berlin`.
pub fn parse_tzid(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim().trim_matches('"');
    if let Ok(tz) = tzid.parse::<Tz>() {
        return Some(tz);
    }

    let parts: Vec<&str> = tzid.split('/').filter(|p| !p.is_empty()).collect();
    (2..=3)
        .filter(|n| parts.len() >= *n)
        .find_map(|n| parts[parts.len() - n..].join("/").parse::<Tz>().ok())
}

/// Wall-clock time in `tz` to UTC. Times inside a DST gap move forward an hour.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}
