//! Profiles and the calendar sources they own.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::occurrence::EventKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        ProfileId(s.to_string())
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId(s.to_string())
    }
}

/// A named grouping of sources, usually one household member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

fn default_enabled() -> bool {
    true
}

/// One calendar feed subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub url: Url,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priority wins when two sources publish the same occurrence.
    #[serde(default)]
    pub priority: i32,
    /// Classify every item of this feed as this kind (e.g. a holiday feed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
}

/// A source flattened together with what the pipeline needs from its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredSource {
    pub id: SourceId,
    pub profile_id: ProfileId,
    pub profile_color: String,
    pub url: Url,
    pub priority: i32,
    /// Position in the config file, used to order equal priorities.
    pub position: usize,
    pub kind: Option<EventKind>,
}

impl ConfiguredSource {
    /// Merge write order: lower sorts first, the last write wins.
    pub fn precedence(&self) -> (i32, usize) {
        (self.priority, self.position)
    }
}
