//! Calendar aggregation engine for the hearth household dashboard.
//!
//! Feeds are fetched concurrently, expanded into concrete occurrences,
//! classified, merged across profiles and published as a single
//! `AggregationResult` through an atomically swapped cache:
//! - `fetch` retrieves raw feed bytes over a `Transport`
//! - `recurrence` parses iCalendar and expands recurring items in a window
//! - `classify` tags occurrences and assigns profile colours
//! - `merge` and `view` build the published result
//! - `cache` and `refresh` keep the current result and coordinate cycles
//! - `presentation` applies client-side visibility rules

pub mod agenda;
pub mod cache;
pub mod classify;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod ics;
pub mod item;
pub mod merge;
pub mod occurrence;
pub mod presentation;
pub mod recurrence;
pub mod refresh;
pub mod view;

pub use agenda::{AggregationResult, Countdown, DayGroup, SourceState, SourceStatus};
pub use cache::{Cache, CacheEntry, SourceSnapshot};
pub use config::{ConfigProvider, FileConfig, HearthConfig};
pub use error::{FetchFailure, HearthError, HearthResult};
pub use fetch::{HttpTransport, Transport};
pub use occurrence::{EventKind, Occurrence, OccurrenceId, OccurrenceTime};
pub use presentation::{VisibleAgenda, visible_view};
pub use refresh::{AgendaSnapshot, Aggregator, RefreshOutcome};
