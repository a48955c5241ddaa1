//! Refresh cycles: fetch, expand, classify, merge, build, publish.
//!
//! Only one cycle runs at a time. The scheduler skips a tick while a cycle is
//! in flight; a manual refresh waits for it and reuses its result if it
//! published.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::agenda::AggregationResult;
use crate::cache::{Cache, SourceSnapshot};
use crate::classify::Classifier;
use crate::config::{ConfigProvider, DisplaySettings, HearthConfig, SourceId};
use crate::error::HearthError;
use crate::fetch::{Transport, fetch_all};
use crate::merge::{MergeOutcome, SourceContribution, merge};
use crate::recurrence::{ExpansionWindow, expand_feed};
use crate::view::build_result;

/// How a refresh request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new result was built. `degraded_sources` were served from cache or omitted.
    Published {
        version: u64,
        degraded_sources: Vec<SourceId>,
    },
    /// The cycle failed; the previous result is still served, marked stale.
    FellBack { version: u64, reason: String },
    /// The cycle failed and there was nothing to fall back to.
    Unavailable { reason: String },
    /// Another cycle published while this request waited.
    Coalesced { version: u64 },
    /// A cycle was already running.
    Skipped,
}

/// The agenda as currently served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaSnapshot {
    pub version: u64,
    pub captured_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub result: AggregationResult,
}

/// A result ready to publish.
struct Built {
    result: AggregationResult,
    snapshots: BTreeMap<SourceId, SourceSnapshot>,
    occurrences: usize,
}

#[derive(Default)]
struct CycleState {
    last_good_config: Option<HearthConfig>,
}

/// Owns the pipeline's collaborators and serialises refresh cycles.
pub struct Aggregator {
    config: Arc<dyn ConfigProvider>,
    transport: Arc<dyn Transport>,
    cache: Arc<Cache>,
    cycle: Mutex<CycleState>,
    /// Reason the last cycle produced nothing, shown until a cycle publishes.
    unavailable: RwLock<Option<String>>,
    /// Display settings of the last good configuration.
    display: RwLock<DisplaySettings>,
}

impl Aggregator {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        transport: Arc<dyn Transport>,
        cache: Arc<Cache>,
    ) -> Self {
        Aggregator {
            config,
            transport,
            cache,
            cycle: Mutex::new(CycleState::default()),
            unavailable: RwLock::new(None),
            display: RwLock::new(DisplaySettings::default()),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// How long the scheduler waits between cycles, per the last good configuration.
    pub async fn refresh_interval(&self) -> Duration {
        self.display.read().await.refresh_interval()
    }

    /// Run a cycle now, waiting for one already in progress.
    ///
    /// If the cycle that was running published a new version, that version is
    /// returned instead of building again.
    pub async fn refresh(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let seen = self.cache.version().await;
        let mut state = self.cycle.lock().await;
        let current = self.cache.version().await;
        if current != seen {
            debug!(version = current, "Refresh coalesced onto concurrent cycle");
            return RefreshOutcome::Coalesced { version: current };
        }
        self.run_cycle(&mut state, now).await
    }

    /// Run a cycle unless one is already running.
    pub async fn refresh_if_idle(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let Ok(mut state) = self.cycle.try_lock() else {
            debug!("Refresh already in progress, skipping");
            return RefreshOutcome::Skipped;
        };
        self.run_cycle(&mut state, now).await
    }

    /// The current agenda, or the explicit unavailable state before any cycle published.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> AgendaSnapshot {
        if let Some(entry) = self.cache.get().await {
            return AgendaSnapshot {
                version: entry.version,
                captured_at: Some(entry.captured_at),
                stale: entry.stale,
                result: entry.result.clone(),
            };
        }
        let reason = self
            .unavailable
            .read()
            .await
            .clone()
            .unwrap_or_else(|| "No agenda has been built yet".to_string());
        AgendaSnapshot {
            version: 0,
            captured_at: None,
            stale: true,
            result: AggregationResult::unavailable(reason, now, self.display_timezone().await),
        }
    }

    async fn display_timezone(&self) -> Tz {
        self.display.read().await.timezone
    }

    #[instrument(skip(self, state))]
    async fn run_cycle(&self, state: &mut CycleState, now: DateTime<Utc>) -> RefreshOutcome {
        let config = match self.config.load() {
            Ok(config) => {
                *self.display.write().await = config.display.clone();
                state.last_good_config = Some(config.clone());
                config
            }
            Err(e) => match &state.last_good_config {
                Some(previous) => {
                    warn!(error = %e, "Configuration reload failed, keeping previous configuration");
                    previous.clone()
                }
                None => return self.fall_back(e).await,
            },
        };

        // Only the build is bounded; publishing a finished result always completes.
        let ceiling = config.fetch.build_timeout();
        match timeout(ceiling, self.build(&config, now)).await {
            Ok(Ok(built)) => self.publish(built, now).await,
            Ok(Err(e)) => self.fall_back(e).await,
            Err(_) => {
                warn!(seconds = ceiling.as_secs(), "Refresh cycle abandoned");
                self.fall_back(HearthError::BuildTimeout(ceiling.as_secs()))
                    .await
            }
        }
    }

    async fn build(
        &self,
        config: &HearthConfig,
        now: DateTime<Utc>,
    ) -> Result<Built, HearthError> {
        let tz = config.display.timezone;
        let window =
            ExpansionWindow::for_display(now, tz, config.display.effective_lookahead_days());
        let sources = config.enabled_sources();
        let classifier = Classifier::new(&config.classify);

        let fetched = fetch_all(self.transport.as_ref(), &sources, config.fetch.timeout()).await;

        let contributions: Vec<SourceContribution> = sources
            .into_iter()
            .zip(fetched)
            .map(|(source, (_, fetched))| {
                let outcome = fetched
                    .and_then(|bytes| expand_feed(&bytes, &source, &window, tz))
                    .map(|occurrences| classifier.classify_all(occurrences, &source));
                SourceContribution { source, outcome }
            })
            .collect();

        let previous = self.cache.get().await;
        let previous_snapshots = previous.as_deref().map(|entry| &entry.snapshots);

        match merge(contributions, previous_snapshots, &window, tz, now) {
            MergeOutcome::Merged(set) => Ok(Built {
                result: build_result(&set.occurrences, set.statuses, now, &config.display),
                snapshots: set.snapshots,
                occurrences: set.occurrences.len(),
            }),
            MergeOutcome::AllFailed { statuses } => {
                let summary = statuses
                    .iter()
                    .map(|s| {
                        format!(
                            "{}: {}",
                            s.source_id,
                            s.error.as_deref().unwrap_or("failed")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(HearthError::TotalFailure(summary))
            }
        }
    }

    async fn publish(&self, built: Built, now: DateTime<Utc>) -> RefreshOutcome {
        let degraded_sources = built.result.degraded_sources();
        let entry = self.cache.put(built.result, built.snapshots, now).await;
        *self.unavailable.write().await = None;
        info!(
            version = entry.version,
            occurrences = built.occurrences,
            degraded = degraded_sources.len(),
            "Published agenda"
        );
        RefreshOutcome::Published {
            version: entry.version,
            degraded_sources,
        }
    }

    /// Keep serving the previous result, or record why there is none.
    async fn fall_back(&self, reason: HearthError) -> RefreshOutcome {
        let reason = reason.to_string();
        match self.cache.mark_stale().await {
            Some(entry) => {
                warn!(version = entry.version, reason = %reason, "Serving previous agenda");
                RefreshOutcome::FellBack {
                    version: entry.version,
                    reason,
                }
            }
            None => {
                warn!(reason = %reason, "No agenda available");
                *self.unavailable.write().await = Some(reason.clone());
                RefreshOutcome::Unavailable { reason }
            }
        }
    }
}
