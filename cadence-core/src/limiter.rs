//! Sliding-window rate limiter over the call ledger.

use crate::db::ledger::CallLedger;
use crate::error::Result;
use cadence_model::{QuotaRule, QuotaUsage, SquadId};
use chrono::Utc;

/// Decides whether a new tracker call may proceed against a fixed quota
/// over a sliding time window. Usage is always computed from the ledger so
/// every concurrent cycle sees the same shared quota.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    ledger: CallLedger,
    rule: QuotaRule,
}

impl RateLimiter {
    pub fn new(ledger: CallLedger, rule: QuotaRule) -> Self {
        Self { ledger, rule }
    }

    pub fn rule(&self) -> &QuotaRule {
        &self.rule
    }

    pub fn ledger(&self) -> &CallLedger {
        &self.ledger
    }

    /// Global usage inside the current window. The quota is the tracker's
    /// own rate limit, shared by all squads.
    pub async fn usage(&self) -> Result<QuotaUsage> {
        let window = chrono::Duration::seconds(self.rule.window.as_secs() as i64);
        let used = self.ledger.count_since(Utc::now() - window, None).await?;
        Ok(QuotaUsage {
            used,
            limit: self.rule.limit,
        })
    }

    /// Per-squad usage, for accounting only (admission is always global).
    pub async fn usage_for(&self, squad: SquadId) -> Result<QuotaUsage> {
        let window = chrono::Duration::seconds(self.rule.window.as_secs() as i64);
        let used = self
            .ledger
            .count_since(Utc::now() - window, Some(squad))
            .await?;
        Ok(QuotaUsage {
            used,
            limit: self.rule.limit,
        })
    }

    pub async fn can_call(&self) -> Result<bool> {
        Ok(!self.usage().await?.exhausted())
    }

    /// Whether usage has crossed the high-water mark at which cycles flag
    /// QUOTA_EXCEEDED proactively, before a hard rejection.
    pub async fn near_exhaustion(&self) -> Result<bool> {
        Ok(self.usage().await?.used >= self.rule.high_water_calls())
    }

    /// Record one call attempt, success or failure.
    pub async fn record_call(
        &self,
        endpoint: &str,
        http_method: &str,
        status_code: u16,
        squad: Option<SquadId>,
    ) -> Result<()> {
        self.ledger
            .record(endpoint, http_method, status_code, squad)
            .await
    }
}
