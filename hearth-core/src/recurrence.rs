//! Expansion of feed items into concrete occurrences inside a window.
//!
//! RRULEs go through the rrule crate; EXDATE, RDATE and RECURRENCE-ID
//! overrides are applied here so that every value is compared as a resolved
//! instant (or date) regardless of how the feed spelled its time zone.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::config::ConfiguredSource;
use crate::constants::MAX_OCCURRENCES_PER_RULE;
use crate::error::FetchFailure;
use crate::ics::parse_feed;
use crate::item::{FeedItem, ItemStatus, Recurrence, Resolved, local_to_utc};
use crate::occurrence::{EventKind, Occurrence, OccurrenceId, OccurrenceTime, local_midnight};

/// The span of time occurrences are generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExpansionWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        ExpansionWindow { start, end }
    }

    /// From local midnight today until `lookahead_days` after `now`.
    ///
    /// Starting at midnight rather than `now` keeps today's finished events
    /// available to the grace window and the today count.
    pub fn for_display(now: DateTime<Utc>, tz: Tz, lookahead_days: u32) -> Self {
        let today = now.with_timezone(&tz).date_naive();
        ExpansionWindow {
            start: local_midnight(today, tz),
            end: now + Duration::days(i64::from(lookahead_days)),
        }
    }

    /// Whether an occurrence starts inside the window or is still running at its start.
    pub fn contains(&self, time: &OccurrenceTime, tz: Tz) -> bool {
        let start = time.start_instant(tz);
        let end = time.end_instant(tz);
        start <= self.end && (end > self.start || start >= self.start)
    }
}

/// Parse raw feed bytes and expand every item into occurrences inside `window`.
///
/// The result is sorted by start, then by stable identity. A feed that is not
/// iCalendar yields `ParseRejected` for the whole source.
pub fn expand_feed(
    content: &[u8],
    source: &ConfiguredSource,
    window: &ExpansionWindow,
    tz: Tz,
) -> Result<Vec<Occurrence>, FetchFailure> {
    let text = String::from_utf8_lossy(content);
    let items = parse_feed(&text)?;

    let recurring_uids: HashSet<&str> = items
        .iter()
        .filter(|i| i.recurrence.is_some() && i.recurrence_id.is_none())
        .map(|i| i.uid.as_str())
        .collect();

    // RECURRENCE-ID items replace one instance of their master.
    let mut overrides: HashMap<(&str, Resolved), &FeedItem> = HashMap::new();
    let mut standalone: Vec<&FeedItem> = Vec::new();
    let mut masters: Vec<&FeedItem> = Vec::new();

    for item in &items {
        match &item.recurrence_id {
            Some(rid) if recurring_uids.contains(item.uid.as_str()) => {
                overrides.insert((item.uid.as_str(), rid.resolve(tz)), item);
            }
            _ if item.recurrence.is_some() => masters.push(item),
            _ => standalone.push(item),
        }
    }

    let mut occurrences = Vec::new();

    for item in standalone {
        if item.status == ItemStatus::Cancelled {
            continue;
        }
        let time = occurrence_time(item, tz);
        if window.contains(&time, tz) {
            let id = OccurrenceId::new(&item.uid, &time);
            occurrences.push(build_occurrence(item, id, time, source));
        }
    }

    for master in masters {
        if master.status == ItemStatus::Cancelled {
            continue;
        }
        match expand_master(master, window, tz) {
            Ok(instances) => {
                let mut replaced: HashSet<Resolved> = HashSet::new();
                for (key, time) in instances {
                    let id = OccurrenceId::new(&master.uid, &time);
                    match overrides.get(&(master.uid.as_str(), key)) {
                        Some(ov) if ov.status == ItemStatus::Cancelled => {
                            replaced.insert(key);
                        }
                        Some(ov) => {
                            replaced.insert(key);
                            let moved = occurrence_time(ov, tz);
                            if window.contains(&moved, tz) {
                                occurrences.push(build_occurrence(ov, id, moved, source));
                            }
                        }
                        None => {
                            if window.contains(&time, tz) {
                                occurrences.push(build_occurrence(master, id, time, source));
                            }
                        }
                    }
                }

                // Instances moved into the window from a slot outside it.
                let base = occurrence_time(master, tz);
                for ((uid, key), ov) in &overrides {
                    if *uid != master.uid
                        || replaced.contains(key)
                        || ov.status == ItemStatus::Cancelled
                        || is_excluded_slot(master.recurrence.as_ref(), *key, tz)
                    {
                        continue;
                    }
                    let moved = occurrence_time(ov, tz);
                    if window.contains(&moved, tz) {
                        let id = OccurrenceId::new(&master.uid, &slot_time(&base, *key, tz));
                        occurrences.push(build_occurrence(ov, id, moved, source));
                    }
                }
            }
            Err(reason) => {
                warn!(source = %source.id, uid = %master.uid, reason = %reason, "Skipping unexpandable recurring item");
            }
        }
    }

    occurrences.sort_by(|a, b| {
        a.time
            .start_instant(tz)
            .cmp(&b.time.start_instant(tz))
            .then_with(|| a.id.cmp(&b.id))
    });
    // Overrides can collide with a generated instance when a feed repeats itself.
    occurrences.dedup_by(|a, b| a.id == b.id);

    debug!(source = %source.id, count = occurrences.len(), "Expanded feed");
    Ok(occurrences)
}

/// Time span of a single, non-recurring item.
fn occurrence_time(item: &FeedItem, tz: Tz) -> OccurrenceTime {
    let start = item.start.resolve(tz);
    let end = item.end.resolve(tz);

    match start {
        Resolved::Date(start) => {
            let end = match end {
                Resolved::Date(d) => d,
                Resolved::Instant(i) => i.with_timezone(&tz).date_naive(),
            };
            OccurrenceTime::AllDay {
                start,
                end: end.max(start + Duration::days(1)),
            }
        }
        Resolved::Instant(start) => {
            let end = match end {
                Resolved::Instant(i) => i,
                Resolved::Date(d) => local_midnight(d, tz),
            };
            if end < start {
                warn!(uid = %item.uid, "Item ends before it starts, clamping end to start");
            }
            OccurrenceTime::Timed {
                start,
                end: end.max(start),
            }
        }
    }
}

/// Generate the instances of a recurring master that can touch `window`.
///
/// Each instance is returned with the key overrides and exclusions are
/// matched against.
fn expand_master(
    master: &FeedItem,
    window: &ExpansionWindow,
    tz: Tz,
) -> Result<Vec<(Resolved, OccurrenceTime)>, String> {
    let Some(recurrence) = &master.recurrence else {
        return Ok(Vec::new());
    };
    let base = occurrence_time(master, tz);
    let excluded: HashSet<Resolved> = recurrence.exdates.iter().map(|e| e.resolve(tz)).collect();

    match base {
        OccurrenceTime::AllDay { start, end } => {
            let span = end - start;
            let mut dates: Vec<NaiveDate> = if recurrence.rrule.is_empty() {
                vec![start]
            } else {
                let dtstart = format!("DTSTART:{}T000000Z", start.format("%Y%m%d"));
                let from = window.start.with_timezone(&tz).date_naive() - span;
                let to = window.end.with_timezone(&tz).date_naive() + Duration::days(1);
                run_rrule(
                    &dtstart,
                    &utc_until(&recurrence.rrule, None),
                    from.and_time(NaiveTime::MIN).and_utc(),
                    to.and_time(NaiveTime::MIN).and_utc(),
                )?
                .into_iter()
                .map(|dt| dt.date_naive())
                .collect()
            };
            dates.extend(recurrence.rdates.iter().map(|r| r.resolve(tz).date(tz)));
            dates.sort();
            dates.dedup();

            Ok(dates
                .into_iter()
                .filter(|d| !is_excluded_date(&excluded, *d, tz))
                .map(|d| {
                    (
                        Resolved::Date(d),
                        OccurrenceTime::AllDay {
                            start: d,
                            end: d + span,
                        },
                    )
                })
                .collect())
        }
        OccurrenceTime::Timed { start, end } => {
            let duration = end - start;
            let zone = master.start.zone(tz);

            let mut starts: Vec<DateTime<Utc>> = if recurrence.rrule.is_empty() {
                vec![start]
            } else {
                let dtstart = if zone == Tz::UTC {
                    format!("DTSTART:{}", start.format("%Y%m%dT%H%M%SZ"))
                } else {
                    format!(
                        "DTSTART;TZID={}:{}",
                        zone.name(),
                        start.with_timezone(&zone).format("%Y%m%dT%H%M%S")
                    )
                };
                run_rrule(
                    &dtstart,
                    &utc_until(&recurrence.rrule, Some(zone)),
                    window.start - duration,
                    window.end,
                )?
            };
            starts.extend(recurrence.rdates.iter().map(|r| match r.resolve(tz) {
                Resolved::Instant(i) => i,
                // A date-only RDATE on a timed series keeps the series' wall-clock time.
                Resolved::Date(d) => {
                    local_to_utc(d.and_time(start.with_timezone(&zone).time()), zone)
                }
            }));
            starts.sort();
            starts.dedup();

            Ok(starts
                .into_iter()
                .filter(|s| {
                    !excluded.contains(&Resolved::Instant(*s))
                        && !excluded.contains(&Resolved::Date(s.with_timezone(&zone).date_naive()))
                })
                .map(|s| {
                    (
                        Resolved::Instant(s),
                        OccurrenceTime::Timed {
                            start: s,
                            end: s + duration,
                        },
                    )
                })
                .collect())
        }
    }
}

fn is_excluded_date(excluded: &HashSet<Resolved>, date: NaiveDate, tz: Tz) -> bool {
    excluded.iter().any(|e| e.date(tz) == date)
}

fn is_excluded_slot(recurrence: Option<&Recurrence>, slot: Resolved, tz: Tz) -> bool {
    recurrence.is_some_and(|r| {
        r.exdates.iter().map(|e| e.resolve(tz)).any(|e| match e {
            Resolved::Date(d) => d == slot.date(tz),
            Resolved::Instant(_) => e == slot,
        })
    })
}

/// The span the series would have occupied at `slot` had it not been moved.
fn slot_time(base: &OccurrenceTime, slot: Resolved, tz: Tz) -> OccurrenceTime {
    match *base {
        OccurrenceTime::AllDay { start, end } => {
            let d = slot.date(tz);
            OccurrenceTime::AllDay {
                start: d,
                end: d + (end - start),
            }
        }
        OccurrenceTime::Timed { start, end } => {
            let s = match slot {
                Resolved::Instant(i) => i,
                Resolved::Date(d) => local_midnight(d, tz),
            };
            OccurrenceTime::Timed {
                start: s,
                end: s + (end - start),
            }
        }
    }
}

/// Rewrite the rule's UNTIL as a UTC date-time.
///
/// Series are handed to rrule with a UTC or TZID start, which only accepts a
/// UTC UNTIL. A date UNTIL covers the whole of that day. Floating values are
/// read in `zone`; all-day series (`zone` of `None`) run on UTC midnights so
/// their floating values are taken as UTC.
fn utc_until(rrule: &str, zone: Option<Tz>) -> String {
    rrule
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                match until_instant(value, zone) {
                    Some(until) => format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")),
                    None => part.to_string(),
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn until_instant(value: &str, zone: Option<Tz>) -> Option<DateTime<Utc>> {
    if value.ends_with('Z') || value.ends_with('z') {
        return None;
    }
    let naive = match NaiveDate::parse_from_str(value, "%Y%m%d") {
        Ok(date) => date.and_hms_opt(23, 59, 59)?,
        Err(_) => NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?,
    };
    Some(match zone {
        Some(zone) => local_to_utc(naive, zone),
        None => naive.and_utc(),
    })
}

/// Run one RRULE and return the instants between `from` and `to`, inclusive.
fn run_rrule(
    dtstart: &str,
    rrule: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, String> {
    let rrule_str = format!("{dtstart}\nRRULE:{rrule}");
    let rrule_set: RRuleSet = rrule_str
        .parse()
        .map_err(|e| format!("invalid RRULE '{rrule}': {e}"))?;

    // after/before are exclusive bounds.
    let rtz: rrule::Tz = Utc.into();
    let after = (from - Duration::seconds(1)).with_timezone(&rtz);
    let before = (to + Duration::seconds(1)).with_timezone(&rtz);

    let result = rrule_set
        .after(after)
        .before(before)
        .all(MAX_OCCURRENCES_PER_RULE);
    if result.limited {
        debug!(rrule = %rrule, "Recurrence expansion hit the per-rule ceiling");
    }

    Ok(result
        .dates
        .iter()
        .map(|dt| dt.with_timezone(&Utc))
        .collect())
}

fn build_occurrence(
    item: &FeedItem,
    id: OccurrenceId,
    time: OccurrenceTime,
    source: &ConfiguredSource,
) -> Occurrence {
    Occurrence {
        id,
        uid: item.uid.clone(),
        title: item.summary.clone(),
        duration: time.duration_label(),
        time,
        location: item.location.clone(),
        profile_id: source.profile_id.clone(),
        source_id: source.id.clone(),
        color: item.color.clone(),
        kind: EventKind::Regular,
        important: false,
        categories: item.categories.clone(),
        priority: item.priority,
    }
}
