//! Dashboard-wide configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::profile::{ConfiguredSource, Profile};
use crate::constants::{
    DEFAULT_BUILD_TIMEOUT, DEFAULT_COUNTDOWN_LIMIT, DEFAULT_DATE_FORMAT, DEFAULT_DAYS_TO_SHOW,
    DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_MINUTES, DEFAULT_USER_AGENT, MIN_LOOKAHEAD_DAYS,
};
use crate::error::{HearthError, HearthResult};
use crate::occurrence::EventKind;

static DEFAULT_CACHE_PATH: &str = "~/.cache/hearth/agenda.json";

/// Contents of `~/.config/hearth/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub classify: KeywordSets,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub timezone: Tz,
    pub days_to_show: u32,
    pub lookahead_days: u32,
    pub date_format: String,
    pub refresh_minutes: u32,
    pub countdown_limit: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        DisplaySettings {
            timezone: Tz::UTC,
            days_to_show: DEFAULT_DAYS_TO_SHOW,
            lookahead_days: MIN_LOOKAHEAD_DAYS,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            refresh_minutes: DEFAULT_REFRESH_MINUTES,
            countdown_limit: DEFAULT_COUNTDOWN_LIMIT,
        }
    }
}

impl DisplaySettings {
    /// Expansion horizon. Never shorter than the agenda or the countdown minimum.
    pub fn effective_lookahead_days(&self) -> u32 {
        self.lookahead_days
            .max(self.days_to_show)
            .max(MIN_LOOKAHEAD_DAYS)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_minutes) * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT.as_secs(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Where the last good agenda is persisted. `None` keeps it in memory only.
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            path: Some(PathBuf::from(DEFAULT_CACHE_PATH)),
        }
    }
}

impl CacheSettings {
    /// The cache path with `~` expanded.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()))
    }
}

/// Case-insensitive keywords matched against titles and feed categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSets {
    pub birthday: Vec<String>,
    pub anniversary: Vec<String>,
    pub holiday: Vec<String>,
    pub important: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }
        KeywordSets {
            birthday: words(&["birthday", "bday", "geburtstag"]),
            anniversary: words(&["anniversary", "jahrestag"]),
            holiday: words(&["holiday", "feiertag", "bank holiday"]),
            important: words(&["important", "!!"]),
        }
    }
}

impl HearthConfig {
    /// Check everything the pipeline assumes about the config.
    pub fn validate(&self) -> HearthResult<()> {
        if self.display.refresh_minutes == 0 {
            return Err(HearthError::Config(
                "display.refresh_minutes must be at least 1".into(),
            ));
        }
        if self.display.days_to_show == 0 {
            return Err(HearthError::Config(
                "display.days_to_show must be at least 1".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 || self.fetch.build_timeout_secs == 0 {
            return Err(HearthError::Config("fetch timeouts must be non-zero".into()));
        }

        let mut profile_ids = HashSet::new();
        let mut source_ids = HashSet::new();

        for profile in &self.profiles {
            if !profile_ids.insert(&profile.id) {
                return Err(HearthError::Config(format!(
                    "Duplicate profile id '{}'",
                    profile.id
                )));
            }
            if !is_hex_color(&profile.color) {
                return Err(HearthError::Config(format!(
                    "Profile '{}' has invalid color '{}', expected #RRGGBB",
                    profile.id, profile.color
                )));
            }
            for source in &profile.sources {
                if !source_ids.insert(&source.id) {
                    return Err(HearthError::Config(format!(
                        "Duplicate source id '{}'",
                        source.id
                    )));
                }
                match source.url.scheme() {
                    "http" | "https" | "webcal" | "webcals" => {}
                    other => {
                        return Err(HearthError::Config(format!(
                            "Source '{}' uses unsupported scheme '{}'",
                            source.id, other
                        )));
                    }
                }
                if source.kind == Some(EventKind::Regular) {
                    return Err(HearthError::Config(format!(
                        "Source '{}': kind hint must be birthday, anniversary or holiday",
                        source.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Enabled sources across all profiles, in config order.
    pub fn enabled_sources(&self) -> Vec<ConfiguredSource> {
        self.profiles
            .iter()
            .flat_map(|profile| {
                profile.sources.iter().map(move |source| (profile, source))
            })
            .enumerate()
            .filter(|(_, (_, source))| source.enabled)
            .map(|(position, (profile, source))| ConfiguredSource {
                id: source.id.clone(),
                profile_id: profile.id.clone(),
                profile_color: profile.color.clone(),
                url: source.url.clone(),
                priority: source.priority,
                position,
                kind: source.kind,
            })
            .collect()
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[display]
timezone = "Europe/Berlin"
days_to_show = 5

[[profiles]]
id = "alice"
name = "Alice"
color = "#4CAF50"

  [[profiles.sources]]
  id = "alice-work"
  url = "https://example.com/alice.ics"

  [[profiles.sources]]
  id = "alice-old"
  url = "https://example.com/old.ics"
  enabled = false

[[profiles]]
id = "bob"
name = "Bob"
color = "#2196F3"

  [[profiles.sources]]
  id = "holidays"
  url = "webcal://example.com/holidays.ics"
  priority = 5
  kind = "holiday"
"##;

    fn sample() -> HearthConfig {
        toml::from_str(SAMPLE).expect("sample config should parse")
    }

    #[test]
    fn test_sample_config_parses_with_defaults() {
        let config = sample();
        assert_eq!(config.display.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.display.days_to_show, 5);
        assert_eq!(config.display.refresh_minutes, DEFAULT_REFRESH_MINUTES);
        assert_eq!(config.fetch.timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_sources_skip_disabled_and_keep_positions() {
        let sources = sample().enabled_sources();
        let ids: Vec<&str> = sources.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, vec!["alice-work", "holidays"]);
        assert_eq!(sources[0].position, 0);
        assert_eq!(sources[1].position, 2);
        assert_eq!(sources[1].profile_color, "#2196F3");
        assert_eq!(sources[1].kind, Some(EventKind::Holiday));
    }

    #[test]
    fn test_lookahead_never_below_minimum() {
        let mut display = DisplaySettings::default();
        display.lookahead_days = 3;
        display.days_to_show = 7;
        assert_eq!(display.effective_lookahead_days(), 14);
        display.days_to_show = 21;
        assert_eq!(display.effective_lookahead_days(), 21);
    }

    #[test]
    fn test_validate_rejects_duplicate_source_ids() {
        let mut config = sample();
        let dup = config.profiles[0].sources[0].clone();
        config.profiles[1].sources.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate source id"));
    }

    #[test]
    fn test_validate_rejects_bad_color() {
        let mut config = sample();
        config.profiles[0].color = "green".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_scheme() {
        let mut config = sample();
        config.profiles[0].sources[0].url = "ftp://example.com/a.ics".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_path_expands_tilde() {
        let settings = CacheSettings::default();
        let path = settings.resolved_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("hearth/agenda.json"));
    }
}
