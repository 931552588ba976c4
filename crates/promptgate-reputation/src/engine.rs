//! Admission-control decisions and outcome recording
//!
//! Decision priority, in order: whitelist (always allow), blacklist and
//! manual blocks (always block, with the stored reason), then the computed
//! score. Score-based auto-blocking applies only to paid profiles that
//! opted in; free and internal traffic is scored but never auto-blocked,
//! and internal traffic bypasses the check entirely.

use promptgate_core::{with_store_timeout, Result, ThreatKind, Tier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::record::{hash_ip, IpReputationRecord, AUTO_BLOCK_SCORE};
use crate::store::{ListKind, ReputationStore};

/// Result of an admission check. Re-running the check with no intervening
/// mutation returns an identical result: the check never writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationCheck {
    /// Whether the reputation record was actually consulted
    pub checked: bool,

    /// Whether the check was skipped wholesale
    pub bypassed: bool,

    /// Why it was skipped (`ip_whitelist`, `internal_tier`)
    pub bypass_reason: Option<String>,

    /// Score of the consulted record, if one exists
    pub reputation_score: Option<f64>,

    /// Whether the request should be refused admission
    pub should_block: bool,

    /// Stored reason accompanying a block decision
    pub block_reason: Option<String>,
}

impl ReputationCheck {
    fn bypassed(reason: &str) -> Self {
        Self {
            checked: false,
            bypassed: true,
            bypass_reason: Some(reason.to_string()),
            reputation_score: None,
            should_block: false,
            block_reason: None,
        }
    }

    fn unchecked() -> Self {
        Self {
            checked: false,
            bypassed: false,
            bypass_reason: None,
            reputation_score: None,
            should_block: false,
            block_reason: None,
        }
    }
}

/// The IP reputation engine
pub struct ReputationEngine {
    store: Arc<dyn ReputationStore>,
    store_timeout: Duration,
}

impl ReputationEngine {
    /// Create an engine over the given store
    pub fn new(store: Arc<dyn ReputationStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Admission check for one source address
    pub async fn check(
        &self,
        ip: &str,
        tier: Tier,
        auto_block_enabled: bool,
    ) -> Result<ReputationCheck> {
        if tier == Tier::Internal {
            return Ok(ReputationCheck::bypassed("internal_tier"));
        }

        // Priority 1: whitelist always wins, regardless of score
        if let Some(entry) = with_store_timeout(
            self.store_timeout,
            self.store.get_list_entry(ListKind::Whitelist, ip),
        )
        .await?
        {
            debug!(reason = %entry.reason, "reputation check bypassed by whitelist");
            return Ok(ReputationCheck::bypassed("ip_whitelist"));
        }

        // Priority 2: explicit blacklist
        if let Some(entry) = with_store_timeout(
            self.store_timeout,
            self.store.get_list_entry(ListKind::Blacklist, ip),
        )
        .await?
        {
            info!(ip = %ip, "request refused by blacklist");
            return Ok(ReputationCheck {
                checked: true,
                bypassed: false,
                bypass_reason: None,
                reputation_score: None,
                should_block: true,
                block_reason: Some(entry.reason),
            });
        }

        // Priority 3: computed reputation
        let record = with_store_timeout(
            self.store_timeout,
            self.store.get_record(&hash_ip(ip)),
        )
        .await?;

        let Some(record) = record else {
            return Ok(ReputationCheck::unchecked());
        };

        let mut check = ReputationCheck {
            checked: true,
            bypassed: false,
            bypass_reason: None,
            reputation_score: Some(record.reputation_score),
            should_block: false,
            block_reason: None,
        };

        if record.manually_blocked {
            check.should_block = true;
            check.block_reason = Some(
                record
                    .manual_block_reason
                    .unwrap_or_else(|| "manually blocked by admin".to_string()),
            );
            return Ok(check);
        }

        // Only paid profiles that opted in are auto-blocked by score
        if tier.eligible_for_auto_block()
            && auto_block_enabled
            && (record.auto_block || record.reputation_score <= AUTO_BLOCK_SCORE)
        {
            check.should_block = true;
            check.block_reason = Some(format!(
                "reputation score {:.2} with block rate {:.2} over {} requests",
                record.reputation_score,
                record.block_rate(),
                record.total_requests
            ));
        }

        Ok(check)
    }

    /// Fold a completed validation into the source's rolling statistics.
    /// Called on every path for profiles that share intelligence.
    pub async fn record_outcome(
        &self,
        ip: &str,
        safe: bool,
        threats: &[ThreatKind],
    ) -> Result<()> {
        let ip_hash = hash_ip(ip);
        let mut record = with_store_timeout(self.store_timeout, self.store.get_record(&ip_hash))
            .await?
            .unwrap_or_else(|| IpReputationRecord::new(&ip_hash));
        record.record_outcome(safe, threats);
        with_store_timeout(self.store_timeout, self.store.put_record(&record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ListEntry;
    use crate::store::MemoryReputationStore;

    fn engine() -> (Arc<MemoryReputationStore>, ReputationEngine) {
        let store = Arc::new(MemoryReputationStore::new());
        let engine = ReputationEngine::new(store.clone(), Duration::from_millis(250));
        (store, engine)
    }

    const IP: &str = "203.0.113.7";

    #[tokio::test]
    async fn test_unknown_ip_passes() {
        let (_, engine) = engine();
        let check = engine.check(IP, Tier::Paid, true).await.unwrap();
        assert!(!check.should_block);
        assert!(!check.checked);
        assert!(!check.bypassed);
    }

    #[tokio::test]
    async fn test_internal_tier_bypasses() {
        let (_, engine) = engine();
        let check = engine.check(IP, Tier::Internal, true).await.unwrap();
        assert!(check.bypassed);
        assert_eq!(check.bypass_reason.as_deref(), Some("internal_tier"));
    }

    #[tokio::test]
    async fn test_whitelist_beats_minimum_score() {
        let (store, engine) = engine();

        // Floor the computed score entirely
        let mut record = IpReputationRecord::new(hash_ip(IP));
        record.reputation_score = 0.0;
        record.auto_block = true;
        store.put_record(&record).await.unwrap();
        store
            .put_list_entry(
                ListKind::Whitelist,
                &ListEntry::new(IP, "CI infrastructure", None, "admin-1"),
            )
            .await
            .unwrap();

        let check = engine.check(IP, Tier::Paid, true).await.unwrap();
        assert!(!check.should_block);
        assert!(check.bypassed);
        assert_eq!(check.bypass_reason.as_deref(), Some("ip_whitelist"));
    }

    #[tokio::test]
    async fn test_blacklist_blocks_with_stored_reason() {
        let (store, engine) = engine();
        store
            .put_list_entry(
                ListKind::Blacklist,
                &ListEntry::new(IP, "confirmed botnet node", Some("high".to_string()), "admin-1"),
            )
            .await
            .unwrap();

        let check = engine.check(IP, Tier::Free, false).await.unwrap();
        assert!(check.should_block);
        assert_eq!(check.block_reason.as_deref(), Some("confirmed botnet node"));
    }

    #[tokio::test]
    async fn test_manual_block_overrides_good_score() {
        let (store, engine) = engine();
        let mut record = IpReputationRecord::new(hash_ip(IP));
        record.reputation_score = 0.95;
        record.apply_manual_block("incident 4821", "admin-1");
        store.put_record(&record).await.unwrap();

        let check = engine.check(IP, Tier::Free, false).await.unwrap();
        assert!(check.should_block);
        assert_eq!(check.block_reason.as_deref(), Some("incident 4821"));
    }

    #[tokio::test]
    async fn test_score_auto_block_requires_paid_opt_in() {
        let (store, engine) = engine();
        let mut record = IpReputationRecord::new(hash_ip(IP));
        for _ in 0..10 {
            record.record_outcome(false, &[ThreatKind::XssAttack]);
        }
        assert!(record.auto_block);
        store.put_record(&record).await.unwrap();

        // Free tier: scored but never auto-blocked
        let check = engine.check(IP, Tier::Free, true).await.unwrap();
        assert!(!check.should_block);
        assert!(check.checked);
        assert!(check.reputation_score.unwrap() < 0.2);

        // Paid without opt-in: not blocked
        let check = engine.check(IP, Tier::Paid, false).await.unwrap();
        assert!(!check.should_block);

        // Paid with opt-in: blocked
        let check = engine.check(IP, Tier::Paid, true).await.unwrap();
        assert!(check.should_block);
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let (store, engine) = engine();
        let mut record = IpReputationRecord::new(hash_ip(IP));
        record.record_outcome(false, &[ThreatKind::SqlInjection]);
        store.put_record(&record).await.unwrap();

        let first = engine.check(IP, Tier::Paid, true).await.unwrap();
        let second = engine.check(IP, Tier::Paid, true).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_record_outcome_creates_and_updates() {
        let (store, engine) = engine();
        engine
            .record_outcome(IP, false, &[ThreatKind::PatternMatchMalicious])
            .await
            .unwrap();
        let record = store.get_record(&hash_ip(IP)).await.unwrap().unwrap();
        assert_eq!(record.total_requests, 1);
        assert_eq!(record.blocked_requests, 1);
        assert!((record.reputation_score - 0.8).abs() < 1e-9);
    }
}
