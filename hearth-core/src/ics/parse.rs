//! iCalendar feed parsing using the icalendar crate's parser.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use icalendar::{
    DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};
use tracing::warn;

use crate::error::FetchFailure;
use crate::item::{EventTime, FeedItem, ItemStatus, Recurrence};

/// Parse a whole feed into its items.
///
/// A document that is not iCalendar at all is rejected as a whole. Individual
/// VEVENTs that cannot be understood are skipped with a warning.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>, FetchFailure> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    if !trimmed
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(FetchFailure::ParseRejected(
            "document is not an iCalendar feed".into(),
        ));
    }

    let unfolded = unfold(trimmed);
    let calendar = read_calendar(&unfolded).map_err(FetchFailure::ParseRejected)?;

    let mut vevents = Vec::new();
    for component in &calendar.components {
        collect_vevents(component, &mut vevents);
    }

    let items = vevents
        .into_iter()
        .enumerate()
        .filter_map(|(index, vevent)| match parse_item(vevent) {
            Ok(item) => Some(item),
            Err(reason) => {
                warn!(index, reason = %reason, "Skipping malformed calendar item");
                None
            }
        })
        .collect();

    Ok(items)
}

fn collect_vevents<'c, 'a>(component: &'c Component<'a>, out: &mut Vec<&'c Component<'a>>) {
    if component.name == "VEVENT" {
        out.push(component);
        return;
    }
    for child in &component.components {
        collect_vevents(child, out);
    }
}

/// Parse one VEVENT.
fn parse_item(vevent: &Component) -> Result<FeedItem, String> {
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .filter(|uid| !uid.trim().is_empty())
        .ok_or("missing UID")?;

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "(No title)".to_string());

    let start_prop = vevent
        .find_prop("DTSTART")
        .ok_or_else(|| format!("item '{uid}' has no DTSTART"))?;
    let start = DatePerhapsTime::try_from(start_prop)
        .map(to_event_time)
        .map_err(|_| format!("item '{uid}' has an unreadable DTSTART"))?;

    let end = match vevent.find_prop("DTEND") {
        Some(prop) => DatePerhapsTime::try_from(prop)
            .map(to_event_time)
            .map_err(|_| format!("item '{uid}' has an unreadable DTEND"))?,
        None => match vevent.find_prop("DURATION") {
            Some(prop) => {
                let duration = parse_duration(prop.val.as_ref())
                    .ok_or_else(|| format!("item '{uid}' has an unreadable DURATION"))?;
                shift(&start, duration)
            }
            // RFC 5545: a DATE start without end lasts one day, a DATE-TIME start is instantaneous.
            None if start.is_date() => shift(&start, Duration::days(1)),
            None => start.clone(),
        },
    };

    let location = vevent
        .find_prop("LOCATION")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty());

    let status = vevent
        .find_prop("STATUS")
        .map(|p| match p.val.as_ref() {
            "TENTATIVE" => ItemStatus::Tentative,
            "CANCELLED" => ItemStatus::Cancelled,
            _ => ItemStatus::Confirmed,
        })
        .unwrap_or(ItemStatus::Confirmed);

    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let exdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_date_list)
        .collect();
    let rdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "RDATE")
        .flat_map(parse_date_list)
        .collect();
    let recurrence = if rrule.is_some() || !rdates.is_empty() {
        Some(Recurrence {
            rrule: rrule.unwrap_or_default(),
            exdates,
            rdates,
        })
    } else {
        None
    };

    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    let categories: Vec<String> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "CATEGORIES")
        .flat_map(|p| {
            split_text_list(p.val.as_ref())
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    let color = vevent
        .find_prop("COLOR")
        .map(|p| p.val.to_string())
        .filter(|c| !c.trim().is_empty());

    let priority = vevent
        .find_prop("PRIORITY")
        .and_then(|p| p.val.as_ref().trim().parse::<u8>().ok())
        .filter(|p| (1..=9).contains(p));

    Ok(FeedItem {
        uid,
        summary,
        location,
        start,
        end,
        status,
        recurrence,
        recurrence_id,
        categories,
        color,
        priority,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// Move an `EventTime` by `by`, keeping its variant.
fn shift(time: &EventTime, by: Duration) -> EventTime {
    match time {
        EventTime::Date(d) => {
            // Whole days only; a PT-style duration on a date start still spans its day.
            let days = by.num_days().max(1);
            EventTime::Date(*d + Duration::days(days))
        }
        EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + by),
        EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + by),
        EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
            datetime: *datetime + by,
            tzid: tzid.clone(),
        },
    }
}

/// Parse a non-negative DURATION value such as `PT1H30M` or `P1D`.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }
    let duration = iso8601::duration(value.trim_start_matches('+')).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

/// Parse an EXDATE or RDATE property into a list of EventTime values.
///
/// Handles:
/// - TZID parameter: `EXDATE;TZID=America/New_York:20240108T100000`
/// - VALUE=DATE: `EXDATE;VALUE=DATE:20240108`
/// - UTC: `EXDATE:20240108T100000Z`
/// - Floating: `EXDATE:20240108T100000`
/// - Comma-separated values: `EXDATE;TZID=...:20240108T100000,20240115T100000`
///
/// RDATE periods (`VALUE=PERIOD`) are not supported and yield nothing.
fn parse_date_list(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let value_type = prop
        .params
        .iter()
        .find(|p| p.key == "VALUE")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    if value_type.as_deref() == Some("PERIOD") {
        return Vec::new();
    }
    let is_date = value_type.as_deref() == Some("DATE");

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date || s.len() == 8 {
                NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(ref tz) = tzid {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.clone(),
                    })
            } else if let Some(s) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Undo RFC 5545 TEXT escaping.
fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a comma-separated TEXT list, honouring `\,` escapes.
fn split_text_list(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in raw.chars() {
        match (escaped, c) {
            (true, _) => {
                current.push('\\');
                current.push(c);
                escaped = false;
            }
            (false, '\\') => escaped = true,
            (false, ',') => parts.push(unescape_text(&std::mem::take(&mut current))),
            (false, _) => current.push(c),
        }
    }
    parts.push(unescape_text(&current));
    parts
}
