use std::time::Duration;

/// Per-source network timeout when the config does not override it.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling for a whole refresh cycle; past this the cycle is abandoned.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30);

/// Days rendered in the agenda.
pub const DEFAULT_DAYS_TO_SHOW: u32 = 7;

/// Countdown widgets look further ahead than the agenda, never less than this.
pub const MIN_LOOKAHEAD_DAYS: u32 = 14;

pub const DEFAULT_REFRESH_MINUTES: u32 = 15;

pub const DEFAULT_COUNTDOWN_LIMIT: usize = 10;

/// Finished events stay in today's agenda this long after they end.
pub const GRACE_PERIOD_MINUTES: i64 = 30;

/// Upper bound on instances generated from one recurrence rule.
pub const MAX_OCCURRENCES_PER_RULE: u16 = 1000;

pub const DEFAULT_DATE_FORMAT: &str = "%A, %-d %B";

pub const DEFAULT_USER_AGENT: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));
