//! Cycle orchestration.
//!
//! A cycle pulls issues for one squad, then worklogs and comments for the
//! fetched issues, merging everything through the idempotent merger. Cycles
//! run under the shared call quota: when the limiter declines mid-cycle the
//! partial progress is kept, a continuation entry is queued, and the squad's
//! status flips to QUOTA_EXCEEDED until a later pass finishes the work.

use crate::alert::AlertSink;
use crate::config::{SyncSettings, TrackerRegistry};
use crate::db::cache::CacheStore;
use crate::db::ledger::CallLedger;
use crate::db::queue::SyncQueue;
use crate::db::status::SyncStatusStore;
use crate::error::{Result, SyncError};
use crate::limiter::RateLimiter;
use crate::merger::IdempotentMerger;
use crate::transport::{TransportClient, TransportSelect};
use cadence_model::{
    IssueKey, OperationType, QueueEntry, QueueEntryId, QuotaUsage, RemoteWorklog,
    SquadId, SyncCounters, SyncMode, SyncState, SyncStatusRecord, TransportMethod,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which phases a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleScope {
    /// Issues, then worklogs and comments for the fetched issues.
    Full,
    /// Issue search and remote links only.
    IssuesOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Worklogs,
    Comments,
}

impl Detail {
    fn operation(self) -> OperationType {
        match self {
            Detail::Worklogs => OperationType::SyncWorklogs,
            Detail::Comments => OperationType::SyncComments,
        }
    }
}

pub struct SyncOrchestrator {
    queue: SyncQueue,
    status: SyncStatusStore,
    merger: IdempotentMerger,
    limiter: RateLimiter,
    transports: Arc<dyn TransportSelect>,
    registry: Arc<TrackerRegistry>,
    alerts: Arc<dyn AlertSink>,
    settings: SyncSettings,
    /// Squads with a cycle in flight; one cycle at a time per squad.
    running: Mutex<HashSet<SquadId>>,
}

impl SyncOrchestrator {
    pub fn new(
        pool: SqlitePool,
        limiter: RateLimiter,
        transports: Arc<dyn TransportSelect>,
        registry: Arc<TrackerRegistry>,
        alerts: Arc<dyn AlertSink>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            queue: SyncQueue::new(pool.clone(), settings.max_queue_attempts),
            status: SyncStatusStore::new(pool.clone()),
            merger: IdempotentMerger::new(CacheStore::new(pool)),
            limiter,
            transports,
            registry,
            alerts,
            settings,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn merger(&self) -> &IdempotentMerger {
        &self.merger
    }

    /// Run a full cycle for the squad. Returns the squad's status after the
    /// cycle; concurrent invocations for the same squad are rejected with a
    /// conflict.
    pub async fn run_cycle(&self, squad: SquadId, mode: SyncMode) -> Result<SyncStatusRecord> {
        self.run_scoped(squad, mode, CycleScope::Full, 0).await
    }

    /// Issue search and remote links only.
    pub async fn run_issue_sync(
        &self,
        squad: SquadId,
        mode: SyncMode,
    ) -> Result<SyncStatusRecord> {
        self.run_scoped(squad, mode, CycleScope::IssuesOnly, 0).await
    }

    /// Refresh worklogs for every issue already cached for the squad.
    pub async fn run_worklog_sync(&self, squad: SquadId) -> Result<SyncStatusRecord> {
        if self.transports.method().await == TransportMethod::Disabled {
            debug!(%squad, "synchronization disabled, skipping worklog sync");
            return self.status(squad).await;
        }
        let _guard = self.acquire(squad)?;
        self.run_detail(squad, None, Detail::Worklogs).await?;
        self.status(squad).await
    }

    /// Persisted status with live quota usage and queue depth folded in.
    pub async fn status(&self, squad: SquadId) -> Result<SyncStatusRecord> {
        let mut record = self.status.get_or_default(squad).await?;
        let usage = self.limiter.usage().await?;
        record.calls_used_in_window = usage.used;
        record.calls_remaining_in_window = usage.remaining();
        record.pending_queue_count = self.queue.pending_count(squad).await?;
        Ok(record)
    }

    pub async fn quota(&self) -> Result<QuotaUsage> {
        self.limiter.usage().await
    }

    /// Store a locally authored worklog and queue its transmission.
    pub async fn submit_worklog(
        &self,
        squad: SquadId,
        issue_key: IssueKey,
        author_key: Option<String>,
        started_at: Option<DateTime<Utc>>,
        time_spent_seconds: i64,
        comment: Option<String>,
    ) -> Result<QueueEntryId> {
        let worklog = RemoteWorklog {
            external_id: format!("local-{}", Uuid::new_v4()),
            author_key,
            started_at,
            time_spent_seconds,
            comment,
            updated_at: None,
        };
        self.merger
            .cache()
            .insert_local_worklog(squad, &issue_key, &worklog)
            .await?;
        self.queue
            .enqueue(squad, OperationType::PushWorklog, json!({}))
            .await
    }

    /// Claim and execute every due queue entry. Returns how many completed.
    pub async fn process_due_queue(&self) -> Result<u32> {
        let entries = self.queue.claim_due(None).await?;
        let mut completed = 0u32;
        for entry in entries {
            match self.execute_entry(&entry).await {
                Ok(()) => {
                    self.queue.mark_completed(entry.id).await?;
                    completed += 1;
                }
                Err(SyncError::Conflict(_)) => {
                    // Squad busy; not a failed attempt.
                    self.queue.release(entry.id, None).await?;
                }
                Err(SyncError::QuotaExceeded(msg)) => {
                    debug!(id = entry.id.value(), msg, "entry deferred on quota");
                    let eligible = Utc::now()
                        + chrono::Duration::seconds(
                            self.settings.quota_requeue_delay.as_secs() as i64,
                        );
                    self.queue.release(entry.id, Some(eligible)).await?;
                }
                Err(err) => {
                    warn!(id = entry.id.value(), %err, "queue entry failed");
                    self.queue.mark_failed(entry.id, &err.to_string()).await?;
                }
            }
        }
        Ok(completed)
    }

    /// Drop call records older than the retention horizon.
    pub async fn purge_ledger(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.settings.ledger_retention.as_secs() as i64);
        self.ledger().purge_older_than(cutoff).await
    }

    fn ledger(&self) -> &CallLedger {
        self.limiter.ledger()
    }

    fn acquire(&self, squad: SquadId) -> Result<RunGuard<'_>> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !running.insert(squad) {
            return Err(SyncError::Conflict(format!(
                "a sync for squad {squad} is already in progress"
            )));
        }
        Ok(RunGuard {
            orchestrator: self,
            squad,
        })
    }

    async fn run_scoped(
        &self,
        squad: SquadId,
        mode: SyncMode,
        scope: CycleScope,
        start_at: u32,
    ) -> Result<SyncStatusRecord> {
        if self.transports.method().await == TransportMethod::Disabled {
            debug!(%squad, "synchronization disabled, skipping cycle");
            return self.status(squad).await;
        }

        let _guard = self.acquire(squad)?;
        let result = self.execute_cycle(squad, mode, scope, start_at).await;

        match result {
            Ok(record) => {
                self.alerts.cycle_completed(squad, &record).await;
                Ok(record)
            }
            Err(err) => {
                let record = self.status(squad).await?;
                self.alerts.cycle_completed(squad, &record).await;
                Err(err)
            }
        }
    }

    /// Every failure escaping the phases lands in `fail_cycle`, so a status
    /// row written as RUNNING at cycle start is always rewritten.
    async fn execute_cycle(
        &self,
        squad: SquadId,
        mode: SyncMode,
        scope: CycleScope,
        start_at: u32,
    ) -> Result<SyncStatusRecord> {
        match self.run_phases(squad, mode, scope, start_at).await {
            Ok(record) => Ok(record),
            Err(err) => {
                self.fail_cycle(
                    squad,
                    err,
                    OperationType::SyncIssues,
                    json!({"start_at": start_at, "mode": mode.as_str()}),
                    mode == SyncMode::DryRun,
                )
                .await
            }
        }
    }

    async fn run_phases(
        &self,
        squad: SquadId,
        mode: SyncMode,
        scope: CycleScope,
        start_at: u32,
    ) -> Result<SyncStatusRecord> {
        let cycle_started = Utc::now();
        let dry_run = mode == SyncMode::DryRun;
        let config = self.registry.for_squad(squad).await;
        let transport = self.transports.transport_for(squad).await?;
        let previous = self.status.get_or_default(squad).await?;

        if !dry_run {
            let mut running = previous.clone();
            running.state = SyncState::Running;
            self.status.upsert(&running).await?;
        }

        let jql = match (mode, previous.last_successful_sync_at) {
            (SyncMode::Incremental, Some(since)) => {
                incremental_jql(&config.search_jql, since)
            }
            _ => config.search_jql.clone(),
        };

        info!(%squad, mode = mode.as_str(), start_at, "sync cycle started");

        let mut counters = SyncCounters::default();
        let mut exhausted = false;

        // Phase A: issue search, paginated inside the transport.
        let outcome = transport.search_issues(&jql, start_at).await?;

        for issue in &outcome.issues {
            if !dry_run {
                self.merger.merge_issue(squad, issue).await?;
            }
            counters.issues += 1;
        }

        if !outcome.complete {
            exhausted = true;
            if !dry_run {
                self.queue
                    .enqueue(
                        squad,
                        OperationType::SyncIssues,
                        json!({"start_at": outcome.next_start_at, "mode": mode.as_str()}),
                    )
                    .await?;
            }
        }

        // Remote links ride along with the issues they belong to. Failures
        // here are record-local; the next cycle refreshes them.
        if self.settings.fetch_remote_links && !exhausted {
            for issue in &outcome.issues {
                match transport.fetch_remote_links(&issue.key).await {
                    Ok(links) => {
                        for link in &links {
                            if !dry_run {
                                self.merger.merge_remote_link(&issue.key, link).await?;
                            }
                            counters.remote_links += 1;
                        }
                    }
                    Err(SyncError::QuotaExceeded(_)) => {
                        exhausted = true;
                        break;
                    }
                    Err(err) => {
                        warn!(issue = %issue.key, %err, "remote link fetch failed");
                    }
                }
            }
        }

        let keys: Vec<IssueKey> =
            outcome.issues.iter().map(|issue| issue.key.clone()).collect();

        if scope == CycleScope::Full && !exhausted {
            if self.settings.fetch_worklogs {
                exhausted |= self
                    .fetch_details(squad, transport.as_ref(), &keys, Detail::Worklogs, dry_run, &mut counters)
                    .await?;
            }
            if self.settings.fetch_comments && !exhausted {
                exhausted |= self
                    .fetch_details(squad, transport.as_ref(), &keys, Detail::Comments, dry_run, &mut counters)
                    .await?;
            }
        }

        // `exhausted` means a phase was cut short and work remains for a
        // later cycle. Crossing the high-water mark after a complete import
        // only colors the reported state; the watermark still advances.
        let near_limit = self.limiter.near_exhaustion().await?;
        let usage = self.limiter.usage().await?;
        let record = SyncStatusRecord {
            squad_id: squad,
            state: if exhausted || near_limit {
                SyncState::QuotaExceeded
            } else {
                SyncState::Idle
            },
            last_successful_sync_at: if exhausted || dry_run {
                previous.last_successful_sync_at
            } else {
                Some(cycle_started)
            },
            counters,
            calls_used_in_window: usage.used,
            calls_remaining_in_window: usage.remaining(),
            last_error: None,
            pending_queue_count: self.queue.pending_count(squad).await?,
            updated_at: Utc::now(),
        };

        if !dry_run {
            self.status.upsert(&record).await?;
        }
        info!(
            %squad,
            state = record.state.as_str(),
            issues = counters.issues,
            worklogs = counters.worklogs,
            "sync cycle finished"
        );
        Ok(record)
    }

    /// Fetch worklogs or comments for each key in order. Returns true when
    /// the quota declined partway; the remaining keys are then queued.
    async fn fetch_details(
        &self,
        squad: SquadId,
        transport: &dyn TransportClient,
        keys: &[IssueKey],
        detail: Detail,
        dry_run: bool,
        counters: &mut SyncCounters,
    ) -> Result<bool> {
        for (index, key) in keys.iter().enumerate() {
            match detail {
                Detail::Worklogs => match transport.fetch_worklogs(key).await {
                    Ok(worklogs) => {
                        for worklog in &worklogs {
                            if !dry_run {
                                self.merger.merge_worklog(key, worklog).await?;
                            }
                            counters.worklogs += 1;
                        }
                    }
                    Err(SyncError::QuotaExceeded(_)) => {
                        if !dry_run {
                            self.enqueue_remaining(squad, detail, &keys[index..]).await?;
                        }
                        return Ok(true);
                    }
                    Err(err) if record_local(&err) => {
                        warn!(issue = %key, %err, "worklog fetch failed, refreshed next cycle");
                    }
                    Err(err) => return Err(err),
                },
                Detail::Comments => match transport.fetch_comments(key).await {
                    Ok(comments) => {
                        for comment in &comments {
                            if !dry_run {
                                self.merger.merge_comment(key, comment).await?;
                            }
                            counters.comments += 1;
                        }
                    }
                    Err(SyncError::QuotaExceeded(_)) => {
                        if !dry_run {
                            self.enqueue_remaining(squad, detail, &keys[index..]).await?;
                        }
                        return Ok(true);
                    }
                    Err(err) if record_local(&err) => {
                        warn!(issue = %key, %err, "comment fetch failed, refreshed next cycle");
                    }
                    Err(err) => return Err(err),
                },
            }
        }
        Ok(false)
    }

    async fn enqueue_remaining(
        &self,
        squad: SquadId,
        detail: Detail,
        remaining: &[IssueKey],
    ) -> Result<()> {
        let keys: Vec<&str> = remaining.iter().map(IssueKey::as_str).collect();
        self.queue
            .enqueue(squad, detail.operation(), json!({"issue_keys": keys}))
            .await?;
        Ok(())
    }

    async fn fail_cycle(
        &self,
        squad: SquadId,
        err: SyncError,
        operation: OperationType,
        payload: serde_json::Value,
        dry_run: bool,
    ) -> Result<SyncStatusRecord> {
        if let SyncError::QuotaExceeded(msg) = &err {
            info!(%squad, msg, "cycle paused on quota");
            if !dry_run {
                self.queue.enqueue(squad, operation, payload).await?;
                let mut record = self.status(squad).await?;
                record.state = SyncState::QuotaExceeded;
                self.status.upsert(&record).await?;
                return self.status(squad).await;
            }
            let mut record = self.status(squad).await?;
            record.state = SyncState::QuotaExceeded;
            return Ok(record);
        }

        warn!(%squad, %err, "cycle failed");
        if !dry_run {
            if err.is_transient() {
                self.queue.enqueue(squad, operation, payload).await?;
            }
            let mut record = self.status(squad).await?;
            record.state = SyncState::Error;
            record.last_error = Some(err.to_string());
            self.status.upsert(&record).await?;
        }
        Err(err)
    }

    async fn execute_entry(&self, entry: &QueueEntry) -> Result<()> {
        if self.transports.method().await == TransportMethod::Disabled {
            return Err(SyncError::Permanent(
                "synchronization is disabled".to_string(),
            ));
        }
        let squad = entry.squad_id;
        match entry.operation {
            OperationType::SyncIssues => {
                let start_at = entry
                    .payload
                    .get("start_at")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32;
                let mode = match entry.payload.get("mode").and_then(|v| v.as_str()) {
                    Some(raw) => SyncMode::parse(raw)?,
                    None => SyncMode::Full,
                };
                self.run_scoped(squad, mode, CycleScope::Full, start_at)
                    .await
                    .map(|_| ())
            }
            OperationType::SyncWorklogs => {
                let _guard = self.acquire(squad)?;
                self.run_detail(squad, payload_keys(&entry.payload)?, Detail::Worklogs)
                    .await
            }
            OperationType::SyncComments => {
                let _guard = self.acquire(squad)?;
                self.run_detail(squad, payload_keys(&entry.payload)?, Detail::Comments)
                    .await
            }
            OperationType::PushWorklog => {
                let _guard = self.acquire(squad)?;
                self.push_pending_worklogs(squad).await
            }
        }
    }

    /// Detail-only pass over the given keys, or every cached issue when no
    /// keys are given. Counters are added onto the persisted record.
    async fn run_detail(
        &self,
        squad: SquadId,
        keys: Option<Vec<IssueKey>>,
        detail: Detail,
    ) -> Result<()> {
        let transport = self.transports.transport_for(squad).await?;
        let keys = match keys {
            Some(keys) => keys,
            None => self.merger.cache().issue_keys(squad).await?,
        };

        let mut counters = SyncCounters::default();
        let exhausted = self
            .fetch_details(squad, transport.as_ref(), &keys, detail, false, &mut counters)
            .await?;

        let mut record = self.status(squad).await?;
        record.counters.worklogs += counters.worklogs;
        record.counters.comments += counters.comments;
        record.state = if exhausted {
            SyncState::QuotaExceeded
        } else {
            SyncState::Idle
        };
        self.status.upsert(&record).await?;
        Ok(())
    }

    async fn push_pending_worklogs(&self, squad: SquadId) -> Result<()> {
        let transport = self.transports.transport_for(squad).await?;
        let pending = self.merger.cache().pending_push(squad).await?;
        for item in pending {
            let assigned = transport
                .push_worklog(&item.issue_key, &item.worklog)
                .await?;
            self.merger
                .cache()
                .mark_pushed(&item.external_id, &assigned)
                .await?;
            info!(issue = %item.issue_key, assigned, "worklog pushed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator").finish_non_exhaustive()
    }
}

/// Removes the squad from the running set when the cycle ends.
struct RunGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
    squad: SquadId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.squad);
    }
}

/// Failures local to one record: transient hiccups and issues deleted
/// between the search and the detail fetch. Neither aborts the cycle.
fn record_local(err: &SyncError) -> bool {
    err.is_transient() || matches!(err, SyncError::NotFound(_))
}

fn payload_keys(payload: &serde_json::Value) -> Result<Option<Vec<IssueKey>>> {
    match payload.get("issue_keys") {
        None => Ok(None),
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .ok_or_else(|| {
                        SyncError::Permanent("issue_keys must be strings".to_string())
                    })
                    .and_then(|raw| IssueKey::new(raw).map_err(SyncError::from))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(SyncError::Permanent(
            "issue_keys must be an array".to_string(),
        )),
    }
}

/// Insert the incremental filter ahead of any ORDER BY clause.
fn incremental_jql(base: &str, since: DateTime<Utc>) -> String {
    let clause = format!("updated >= \"{}\"", since.format("%Y-%m-%d %H:%M"));
    match base.split_once(" ORDER BY ") {
        Some((filter, order)) => format!("{filter} AND {clause} ORDER BY {order}"),
        None => format!("{base} AND {clause}"),
    }
}
