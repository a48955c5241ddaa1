//! Projections of a merged occurrence set: day groups, countdowns, today count.
//!
//! Everything here is a pure function of its inputs and an explicit `now`.

use std::fmt::Write;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::agenda::{AggregationResult, Countdown, DayGroup, SourceStatus};
use crate::config::DisplaySettings;
use crate::occurrence::Occurrence;

/// The date an occurrence is listed under.
///
/// Timed occurrences belong to their start date and are never split across
/// midnight. All-day occurrences belong to their declared date, except that one
/// which began earlier and still covers `today` is listed under today.
pub fn day_key(occurrence: &Occurrence, today: NaiveDate, tz: Tz) -> NaiveDate {
    let start = occurrence.time.start_date(tz);
    if occurrence.is_all_day() && start < today && occurrence.time.last_date(tz) >= today {
        today
    } else {
        start
    }
}

/// Render a date with a strftime pattern, falling back to ISO on a bad pattern.
pub fn date_label(date: NaiveDate, format: &str) -> String {
    let mut label = String::new();
    if write!(label, "{}", date.format(format)).is_err() {
        return date.format("%Y-%m-%d").to_string();
    }
    label
}

/// Bucket `occurrences` (already sorted) into groups for the `days` dates starting `today`.
pub fn build_day_groups(
    occurrences: &[Occurrence],
    today: NaiveDate,
    days: u32,
    tz: Tz,
    date_format: &str,
) -> Vec<DayGroup> {
    let last = today + Duration::days(i64::from(days.max(1)) - 1);
    let mut groups: Vec<DayGroup> = Vec::new();

    for occurrence in occurrences {
        let key = day_key(occurrence, today, tz);
        if key < today || key > last {
            continue;
        }
        match groups.iter_mut().find(|g| g.date == key) {
            Some(group) => group.occurrences.push(occurrence.clone()),
            None => groups.push(DayGroup {
                date: key,
                label: date_label(key, date_format),
                occurrences: vec![occurrence.clone()],
            }),
        }
    }

    // Keys can arrive out of order when a multi-day item is pulled to today.
    groups.sort_by_key(|g| g.date);
    groups
}

/// Countdown-worthy occurrences that have not ended, nearest first.
pub fn build_countdowns(
    occurrences: &[Occurrence],
    now: DateTime<Utc>,
    tz: Tz,
    limit: usize,
) -> Vec<Countdown> {
    let today = now.with_timezone(&tz).date_naive();
    occurrences
        .iter()
        .filter(|o| o.is_countdown_worthy() && o.time.end_instant(tz) > now)
        .map(|o| Countdown {
            days_until: (day_key(o, today, tz) - today).num_days().max(0),
            occurrence: o.clone(),
        })
        .take(limit)
        .collect()
}

pub fn count_today(occurrences: &[Occurrence], today: NaiveDate, tz: Tz) -> usize {
    occurrences
        .iter()
        .filter(|o| day_key(o, today, tz) == today)
        .count()
}

/// Build the publishable result from a merged, sorted occurrence set.
pub fn build_result(
    occurrences: &[Occurrence],
    sources: Vec<SourceStatus>,
    now: DateTime<Utc>,
    display: &DisplaySettings,
) -> AggregationResult {
    let tz = display.timezone;
    let today = now.with_timezone(&tz).date_naive();

    AggregationResult {
        generated_at: now,
        timezone: tz,
        days_until_as_of: today,
        day_groups: build_day_groups(
            occurrences,
            today,
            display.days_to_show,
            tz,
            &display.date_format,
        ),
        upcoming: build_countdowns(occurrences, now, tz, display.countdown_limit),
        today_count: count_today(occurrences, today, tz),
        sources,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::{EventKind, OccurrenceId, OccurrenceTime};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // Wednesday
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn occurrence(title: &str, time: OccurrenceTime, kind: EventKind) -> Occurrence {
        Occurrence {
            id: OccurrenceId::new(title, &time),
            uid: title.to_string(),
            title: title.to_string(),
            duration: time.duration_label(),
            time,
            location: None,
            profile_id: "alice".into(),
            source_id: "family".into(),
            color: Some("#4CAF50".into()),
            kind,
            important: false,
            categories: Vec::new(),
            priority: None,
        }
    }

    fn at(day: u32, hour: u32, minutes: i64, title: &str) -> Occurrence {
        let start = Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap();
        occurrence(
            title,
            OccurrenceTime::Timed { start, end: start + Duration::minutes(minutes) },
            EventKind::Regular,
        )
    }

    fn all_day(start: u32, end: u32, title: &str, kind: EventKind) -> Occurrence {
        occurrence(title, OccurrenceTime::AllDay { start: date(start), end: date(end) }, kind)
    }

    #[test]
    fn test_timed_event_spanning_midnight_stays_on_start_date() {
        let late = at(5, 23, 120, "Night shift");
        assert_eq!(day_key(&late, date(5), Tz::UTC), date(5));

        let groups = build_day_groups(&[late], date(5), 7, Tz::UTC, "%Y-%m-%d");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].date, date(5));
    }

    #[test]
    fn test_multi_day_all_day_in_progress_keyed_to_today() {
        let trip = all_day(3, 8, "Ski trip", EventKind::Regular);
        assert_eq!(day_key(&trip, date(5), Tz::UTC), date(5));

        let finished = all_day(1, 3, "Over", EventKind::Regular);
        assert_eq!(day_key(&finished, date(5), Tz::UTC), date(1));
    }

    #[test]
    fn test_day_key_uses_display_zone() {
        // 23:30 UTC on the 5th is the 6th in Berlin.
        let late = at(5, 23, 30, "Call");
        assert_eq!(day_key(&late, date(5), chrono_tz::Europe::Berlin), date(6));
    }

    #[test]
    fn test_groups_limited_to_days_to_show() {
        let occurrences = vec![
            at(5, 9, 30, "today"),
            at(7, 9, 30, "friday"),
            at(12, 9, 30, "next week"),
        ];
        let groups = build_day_groups(&occurrences, date(5), 3, Tz::UTC, "%A");
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["Wednesday", "Friday"]);
    }

    #[test]
    fn test_bad_date_format_falls_back_to_iso() {
        assert_eq!(date_label(date(5), "%Q"), "2025-03-05");
        assert_eq!(date_label(date(5), "%A, %-d %B"), "Wednesday, 5 March");
    }

    #[test]
    fn test_countdowns_nearest_first_with_days_until() {
        let mut flagged = at(6, 9, 30, "Tax deadline");
        flagged.important = true;
        let occurrences = vec![
            at(5, 8, 30, "Standup"),
            flagged,
            all_day(12, 13, "Mum's Birthday", EventKind::Birthday),
            all_day(17, 18, "St Patrick's Day", EventKind::Holiday),
        ];

        let countdowns = build_countdowns(&occurrences, now(), Tz::UTC, 10);
        let summary: Vec<(&str, i64)> = countdowns
            .iter()
            .map(|c| (c.occurrence.title.as_str(), c.days_until))
            .collect();
        assert_eq!(
            summary,
            vec![("Tax deadline", 1), ("Mum's Birthday", 7), ("St Patrick's Day", 12)]
        );

        assert_eq!(build_countdowns(&occurrences, now(), Tz::UTC, 1).len(), 1);
    }

    #[test]
    fn test_today_count_includes_finished_events() {
        let occurrences = vec![
            at(5, 7, 30, "Breakfast"),
            at(5, 18, 60, "Dinner"),
            all_day(5, 6, "Bin day", EventKind::Regular),
            at(6, 9, 30, "Tomorrow"),
        ];
        assert_eq!(count_today(&occurrences, date(5), Tz::UTC), 3);
    }

    #[test]
    fn test_build_result_records_countdown_date() {
        let display = DisplaySettings::default();
        let result = build_result(&[at(5, 9, 30, "Standup")], Vec::new(), now(), &display);
        assert_eq!(result.days_until_as_of, date(5));
        assert_eq!(result.today_count, 1);
        assert_eq!(result.day_groups[0].label, "Wednesday, 5 March");
        assert!(!result.is_unavailable());
    }
}
