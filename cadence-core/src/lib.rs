//! Core library for Cadence - the tracker synchronization engine.
//!
//! Pulls issues, worklogs, comments and remote links from an external
//! tracker into local cache tables under a sliding-window call quota, with a
//! durable retry queue and a hot-swappable REST/browser transport.

pub mod alert;
pub mod config;
pub mod db;
pub mod error;
pub mod limiter;
pub mod merger;
pub mod orchestrator;
pub mod transport;

pub use alert::{AlertSink, LoggingAlertSink};
pub use config::{SyncSettings, TrackerConfig, TrackerRegistry};
pub use db::cache::CacheStore;
pub use db::ledger::CallLedger;
pub use db::queue::SyncQueue;
pub use db::status::SyncStatusStore;
pub use error::{Result, SyncError};
pub use limiter::RateLimiter;
pub use merger::IdempotentMerger;
pub use orchestrator::SyncOrchestrator;
pub use transport::{
    SearchOutcome, TransportClient, TransportSelect, TransportSwitch,
};
