//! Configuration types for hearth.
//!
//! The admin form owns the file; the engine only reads it. Everything is
//! validated once here so the pipeline never re-checks ids, colours or zones.

mod dashboard;
mod profile;
mod provider;

pub use dashboard::{
    CacheSettings, DisplaySettings, FetchSettings, HearthConfig, KeywordSets,
};
pub use profile::{ConfiguredSource, Profile, ProfileId, Source, SourceId};
pub use provider::{ConfigProvider, FileConfig};
