use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A sliding-window call quota against the external tracker.
///
/// The window ends at "now"; calls are counted from the ledger, never
/// estimated from an in-memory counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaRule {
    /// Maximum number of outbound calls allowed inside the window.
    pub limit: u32,
    /// Length of the sliding window.
    pub window: Duration,
    /// Fraction of the quota at which a cycle flags QUOTA_EXCEEDED
    /// proactively instead of waiting for a hard rejection.
    pub high_water_fraction: f64,
}

impl Default for QuotaRule {
    fn default() -> Self {
        Self {
            limit: 200,
            window: Duration::from_secs(2 * 60 * 60),
            high_water_fraction: 0.975,
        }
    }
}

impl QuotaRule {
    /// Number of used calls at which the high-water mark is considered hit.
    pub fn high_water_calls(&self) -> u32 {
        (f64::from(self.limit) * self.high_water_fraction).floor() as u32
    }
}

/// Snapshot of quota consumption inside the current window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: u32,
    pub limit: u32,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rule_matches_reference_deployment() {
        let rule = QuotaRule::default();
        assert_eq!(rule.limit, 200);
        assert_eq!(rule.window, Duration::from_secs(7200));
        assert_eq!(rule.high_water_calls(), 195);
    }

    #[test]
    fn usage_remaining_saturates() {
        let usage = QuotaUsage { used: 250, limit: 200 };
        assert_eq!(usage.remaining(), 0);
        assert!(usage.exhausted());
    }
}
