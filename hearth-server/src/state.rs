use std::sync::Arc;

use hearth_core::Aggregator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        AppState { aggregator }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }
}
