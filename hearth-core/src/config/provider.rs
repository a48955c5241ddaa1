//! Where configuration comes from.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};

use crate::config::dashboard::HearthConfig;
use crate::error::{HearthError, HearthResult};

/// Source of the dashboard configuration.
///
/// Read at the start of every refresh cycle so edits made by the admin form
/// apply without a restart.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> HearthResult<HearthConfig>;
}

/// A fixed, in-memory configuration.
impl ConfigProvider for HearthConfig {
    fn load(&self) -> HearthResult<HearthConfig> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Configuration read from a TOML file, overlaid with `HEARTH__*` env vars.
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfig { path: path.into() }
    }

    /// `$HEARTH_CONFIG`, else `~/.config/hearth/config.toml`.
    pub fn default_path() -> HearthResult<PathBuf> {
        if let Ok(path) = std::env::var("HEARTH_CONFIG") {
            return Ok(PathBuf::from(shellexpand::tilde(&path).into_owned()));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| HearthError::Config("Could not determine config directory".into()))?
            .join("hearth");

        Ok(config_dir.join("config.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a default config file with every option commented out.
    pub fn create_default_config(path: &Path) -> HearthResult<()> {
        let contents = "\
# hearth configuration

[display]
# timezone = \"Europe/Berlin\"
# days_to_show = 7
# lookahead_days = 14
# date_format = \"%A, %-d %B\"
# refresh_minutes = 15
# countdown_limit = 10

[fetch]
# timeout_secs = 10
# build_timeout_secs = 30

[cache]
# path = \"~/.cache/hearth/agenda.json\"

# [[profiles]]
# id = \"alice\"
# name = \"Alice\"
# color = \"#4CAF50\"
#
#   [[profiles.sources]]
#   id = \"alice-personal\"
#   url = \"https://calendar.example.com/alice.ics\"
";

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HearthError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| HearthError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

impl ConfigProvider for FileConfig {
    fn load(&self) -> HearthResult<HearthConfig> {
        let config: HearthConfig = Config::builder()
            .add_source(File::from(self.path.as_path()).required(false))
            .add_source(Environment::with_prefix("HEARTH").separator("__"))
            .build()
            .map_err(|e| HearthError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| HearthError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }
}
