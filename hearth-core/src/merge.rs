//! Combining per-source occurrence lists into one ordered set.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::agenda::{SourceState, SourceStatus};
use crate::cache::SourceSnapshot;
use crate::config::{ConfiguredSource, SourceId};
use crate::error::FetchFailure;
use crate::occurrence::{Occurrence, OccurrenceId};
use crate::recurrence::ExpansionWindow;

/// What one source produced this cycle.
#[derive(Debug, Clone)]
pub struct SourceContribution {
    pub source: ConfiguredSource,
    pub outcome: Result<Vec<Occurrence>, FetchFailure>,
}

/// Merged occurrences together with what the cache should remember per source.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSet {
    /// Deduplicated, ordered by start instant then stable identity.
    pub occurrences: Vec<Occurrence>,
    pub statuses: Vec<SourceStatus>,
    pub snapshots: BTreeMap<SourceId, SourceSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(MergedSet),
    /// Every configured source failed; the caller falls back to the prior result.
    AllFailed { statuses: Vec<SourceStatus> },
}

/// Merge one cycle's contributions.
///
/// Failed sources are substituted from `previous` snapshots (trimmed to
/// `window`) or omitted. Duplicates by stable identity are written in
/// ascending source precedence, so the highest-priority source wins.
pub fn merge(
    contributions: Vec<SourceContribution>,
    previous: Option<&BTreeMap<SourceId, SourceSnapshot>>,
    window: &ExpansionWindow,
    tz: Tz,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let any_fresh = contributions.iter().any(|c| c.outcome.is_ok());
    let total = contributions.len();

    let mut statuses = Vec::with_capacity(total);
    let mut snapshots = BTreeMap::new();
    let mut accepted: Vec<(&ConfiguredSource, Vec<Occurrence>)> = Vec::with_capacity(total);

    for contribution in &contributions {
        let source = &contribution.source;
        let cached = previous.and_then(|p| p.get(&source.id));

        match &contribution.outcome {
            Ok(occurrences) => {
                statuses.push(SourceStatus {
                    source_id: source.id.clone(),
                    profile_id: source.profile_id.clone(),
                    state: SourceState::Fresh,
                    error: None,
                    last_success: Some(now),
                });
                snapshots.insert(
                    source.id.clone(),
                    SourceSnapshot {
                        captured_at: now,
                        occurrences: occurrences.clone(),
                    },
                );
                accepted.push((source, occurrences.clone()));
            }
            Err(failure) => match cached {
                Some(snapshot) => {
                    let kept: Vec<Occurrence> = snapshot
                        .occurrences
                        .iter()
                        .filter(|o| window.contains(&o.time, tz))
                        .cloned()
                        .collect();
                    warn!(
                        source = %source.id,
                        error = %failure,
                        substituted = kept.len(),
                        "Using cached occurrences for failed source"
                    );
                    statuses.push(SourceStatus {
                        source_id: source.id.clone(),
                        profile_id: source.profile_id.clone(),
                        state: SourceState::Stale,
                        error: Some(failure.to_string()),
                        last_success: Some(snapshot.captured_at),
                    });
                    snapshots.insert(source.id.clone(), snapshot.clone());
                    accepted.push((source, kept));
                }
                None => {
                    warn!(source = %source.id, error = %failure, "Omitting failed source with no cache");
                    statuses.push(SourceStatus {
                        source_id: source.id.clone(),
                        profile_id: source.profile_id.clone(),
                        state: SourceState::Missing,
                        error: Some(failure.to_string()),
                        last_success: None,
                    });
                }
            },
        }
    }

    if total > 0 && !any_fresh {
        return MergeOutcome::AllFailed { statuses };
    }

    accepted.sort_by_key(|(source, _)| source.precedence());

    let mut by_id: HashMap<OccurrenceId, Occurrence> = HashMap::new();
    for (source, occurrences) in accepted {
        for occurrence in occurrences {
            if let Some(replaced) = by_id.insert(occurrence.id.clone(), occurrence) {
                debug!(
                    id = %replaced.id,
                    dropped_source = %replaced.source_id,
                    kept_source = %source.id,
                    "Collapsed duplicate occurrence"
                );
            }
        }
    }

    let mut occurrences: Vec<Occurrence> = by_id.into_values().collect();
    sort_occurrences(&mut occurrences, tz);

    MergeOutcome::Merged(MergedSet {
        occurrences,
        statuses,
        snapshots,
    })
}

/// Start instant ascending, stable identity as the tie-break.
pub fn sort_occurrences(occurrences: &mut [Occurrence], tz: Tz) {
    occurrences.sort_by(|a, b| {
        a.time
            .start_instant(tz)
            .cmp(&b.time.start_instant(tz))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::{EventKind, OccurrenceTime};
    use chrono::{Duration, NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    fn window() -> ExpansionWindow {
        ExpansionWindow::for_display(now(), Tz::UTC, 14)
    }

    fn source(id: &str, profile: &str, color: &str, priority: i32, position: usize) -> ConfiguredSource {
        ConfiguredSource {
            id: id.into(),
            profile_id: profile.into(),
            profile_color: color.into(),
            url: format!("https://example.com/{id}.ics").parse().unwrap(),
            priority,
            position,
            kind: None,
        }
    }

    fn timed(uid: &str, source: &ConfiguredSource, day: u32, hour: u32) -> Occurrence {
        let start = Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap();
        let time = OccurrenceTime::Timed { start, end: start + Duration::hours(1) };
        Occurrence {
            id: OccurrenceId::new(uid, &time),
            uid: uid.to_string(),
            title: uid.to_string(),
            duration: time.duration_label(),
            time,
            location: None,
            profile_id: source.profile_id.clone(),
            source_id: source.id.clone(),
            color: Some(source.profile_color.clone()),
            kind: EventKind::Regular,
            important: false,
            categories: Vec::new(),
            priority: None,
        }
    }

    fn holiday(uid: &str, source: &ConfiguredSource, date: NaiveDate) -> Occurrence {
        let time = OccurrenceTime::AllDay { start: date, end: date.succ_opt().unwrap() };
        Occurrence {
            kind: EventKind::Holiday,
            id: OccurrenceId::new(uid, &time),
            duration: time.duration_label(),
            time,
            ..timed(uid, source, 6, 9)
        }
    }

    fn merged(outcome: MergeOutcome) -> MergedSet {
        match outcome {
            MergeOutcome::Merged(set) => set,
            other => panic!("expected merged set, got {other:?}"),
        }
    }

    #[test]
    fn test_sorted_by_start_then_id() {
        let a = source("a", "alice", "#4CAF50", 0, 0);
        let b = source("b", "bob", "#2196F3", 0, 1);
        let set = merged(merge(
            vec![
                SourceContribution {
                    source: a.clone(),
                    outcome: Ok(vec![timed("late", &a, 7, 9), timed("x", &a, 6, 9)]),
                },
                SourceContribution {
                    source: b.clone(),
                    outcome: Ok(vec![timed("early", &b, 6, 8), timed("y", &b, 6, 9)]),
                },
            ],
            None,
            &window(),
            Tz::UTC,
            now(),
        ));

        let titles: Vec<&str> = set.occurrences.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles[0], "early");
        assert_eq!(titles[3], "late");
        // x and y share a start; the id decides.
        let (x, y) = (&set.occurrences[1], &set.occurrences[2]);
        assert!(x.id < y.id);
    }

    #[test]
    fn test_duplicate_feed_collapses_to_priority_source() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        let alice = source("alice-holidays", "alice", "#4CAF50", 0, 0);
        let bob = source("bob-holidays", "bob", "#2196F3", 5, 1);

        let set = merged(merge(
            vec![
                SourceContribution {
                    source: alice.clone(),
                    outcome: Ok(vec![holiday("stpatricks", &alice, day)]),
                },
                SourceContribution {
                    source: bob.clone(),
                    outcome: Ok(vec![holiday("stpatricks", &bob, day)]),
                },
            ],
            None,
            &window(),
            Tz::UTC,
            now(),
        ));

        assert_eq!(set.occurrences.len(), 1);
        assert_eq!(set.occurrences[0].color.as_deref(), Some("#2196F3"));
        assert_eq!(set.occurrences[0].profile_id.0, "bob");
    }

    #[test]
    fn test_equal_priority_later_source_wins() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        let first = source("first", "alice", "#4CAF50", 0, 0);
        let second = source("second", "bob", "#2196F3", 0, 1);

        let set = merged(merge(
            vec![
                SourceContribution {
                    source: second.clone(),
                    outcome: Ok(vec![holiday("h", &second, day)]),
                },
                SourceContribution {
                    source: first.clone(),
                    outcome: Ok(vec![holiday("h", &first, day)]),
                },
            ],
            None,
            &window(),
            Tz::UTC,
            now(),
        ));

        assert_eq!(set.occurrences.len(), 1);
        assert_eq!(set.occurrences[0].source_id.0, "second");
    }

    #[test]
    fn test_failed_source_substituted_from_snapshot() {
        let a = source("a", "alice", "#4CAF50", 0, 0);
        let b = source("b", "bob", "#2196F3", 0, 1);
        let captured = now() - Duration::hours(1);

        let mut previous = BTreeMap::new();
        previous.insert(
            a.id.clone(),
            SourceSnapshot {
                captured_at: captured,
                // The first one has already left the window.
                occurrences: vec![timed("gone", &a, 1, 9), timed("kept", &a, 8, 9)],
            },
        );

        let set = merged(merge(
            vec![
                SourceContribution { source: a.clone(), outcome: Err(FetchFailure::Timeout(10)) },
                SourceContribution { source: b.clone(), outcome: Ok(vec![timed("fresh", &b, 6, 9)]) },
            ],
            Some(&previous),
            &window(),
            Tz::UTC,
            now(),
        ));

        let titles: Vec<&str> = set.occurrences.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["fresh", "kept"]);
        assert_eq!(set.statuses[0].state, SourceState::Stale);
        assert_eq!(set.statuses[0].last_success, Some(captured));
        assert!(set.statuses[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(set.statuses[1].state, SourceState::Fresh);
        // The old snapshot is carried forward untouched.
        assert_eq!(set.snapshots[&a.id].captured_at, captured);
        assert_eq!(set.snapshots[&a.id].occurrences.len(), 2);
    }

    #[test]
    fn test_failed_source_without_snapshot_is_omitted() {
        let a = source("a", "alice", "#4CAF50", 0, 0);
        let b = source("b", "bob", "#2196F3", 0, 1);
        let set = merged(merge(
            vec![
                SourceContribution { source: a.clone(), outcome: Err(FetchFailure::HttpError(500)) },
                SourceContribution { source: b.clone(), outcome: Ok(vec![timed("fresh", &b, 6, 9)]) },
            ],
            None,
            &window(),
            Tz::UTC,
            now(),
        ));

        assert_eq!(set.occurrences.len(), 1);
        assert_eq!(set.statuses[0].state, SourceState::Missing);
        assert!(!set.snapshots.contains_key(&a.id));
    }

    #[test]
    fn test_all_failed() {
        let a = source("a", "alice", "#4CAF50", 0, 0);
        let outcome = merge(
            vec![SourceContribution {
                source: a,
                outcome: Err(FetchFailure::Unreachable("dns".into())),
            }],
            None,
            &window(),
            Tz::UTC,
            now(),
        );
        assert!(matches!(outcome, MergeOutcome::AllFailed { ref statuses } if statuses.len() == 1));
    }

    #[test]
    fn test_no_sources_is_empty_success() {
        let set = merged(merge(Vec::new(), None, &window(), Tz::UTC, now()));
        assert!(set.occurrences.is_empty());
        assert!(set.statuses.is_empty());
    }
}
