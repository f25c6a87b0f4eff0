use std::{fmt, sync::Arc};

use crate::infra::config::Config;
use cadence_core::transport::TransportSwitch;
use cadence_core::{SyncOrchestrator, TrackerRegistry};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Kept alongside the trait object the orchestrator holds so handlers
    /// can switch the method at runtime.
    pub transports: Arc<TransportSwitch>,
    /// Same story for per-squad tracker overrides.
    pub registry: Arc<TrackerRegistry>,
    pub config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
