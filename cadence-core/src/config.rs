use cadence_model::SquadId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Connection settings for one tracker deployment.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL without a trailing slash, e.g. `https://tracker.example.com`.
    pub base_url: String,
    pub user: String,
    pub token: String,
    /// Page size for paginated issue search.
    pub page_size: u32,
    /// JQL filter selecting the issues a squad cares about.
    pub search_jql: String,
    /// Path of the web UI login form (browser transport only).
    pub login_path: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            user: String::new(),
            token: String::new(),
            page_size: 50,
            search_jql: "statusCategory != Done ORDER BY updated ASC".to_string(),
            login_path: "/login.jsp".to_string(),
        }
    }
}

/// Engine tuning shared by every cycle.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fetch_worklogs: bool,
    pub fetch_comments: bool,
    pub fetch_remote_links: bool,
    /// Default max attempts for queue entries.
    pub max_queue_attempts: u32,
    /// Call records older than this are purged by the maintenance pass.
    pub ledger_retention: Duration,
    /// How long a queue entry that itself hit the quota waits before it is
    /// eligible again. Quota pressure is backpressure, not a failure, so
    /// this path never increments `attempts`.
    pub quota_requeue_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_worklogs: true,
            fetch_comments: true,
            fetch_remote_links: true,
            max_queue_attempts: 3,
            ledger_retention: Duration::from_secs(7 * 24 * 60 * 60),
            quota_requeue_delay: Duration::from_secs(10 * 60),
        }
    }
}

/// Per-squad tracker configuration with a shared default.
///
/// Squads without an override use the deployment-wide tracker settings.
#[derive(Debug)]
pub struct TrackerRegistry {
    default: TrackerConfig,
    overrides: RwLock<HashMap<SquadId, TrackerConfig>>,
}

impl TrackerRegistry {
    pub fn new(default: TrackerConfig) -> Self {
        Self {
            default,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub async fn for_squad(&self, squad: SquadId) -> TrackerConfig {
        let overrides = self.overrides.read().await;
        overrides.get(&squad).cloned().unwrap_or_else(|| self.default.clone())
    }

    pub async fn set_override(&self, squad: SquadId, config: TrackerConfig) {
        self.overrides.write().await.insert(squad, config);
    }

    pub async fn clear_override(&self, squad: SquadId) {
        self.overrides.write().await.remove(&squad);
    }
}
