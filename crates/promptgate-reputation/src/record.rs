//! Reputation data model
//!
//! Records are keyed by a SHA-256 hash of the source address; the raw IP is
//! never stored on a reputation record. Scores live in [0, 1] with higher
//! meaning better: each completed validation moves the score exponentially
//! toward the latest outcome (1.0 for safe, 0.0 for blocked).

use chrono::{DateTime, Utc};
use promptgate_core::ThreatKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Smoothing factor for the exponential outcome update
const OUTCOME_ALPHA: f64 = 0.2;

/// Score at or below which an opted-in paid profile is auto-blocked
pub const AUTO_BLOCK_SCORE: f64 = 0.2;

/// Block rate above which a record is marked for auto-blocking
const AUTO_BLOCK_RATE: f64 = 0.8;

/// Minimum observations before the auto-block flag can be set
const AUTO_BLOCK_MIN_SAMPLES: u64 = 5;

/// Irreversible hash of a source address
pub fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Aggregated reputation for one hashed source address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReputationRecord {
    /// SHA-256 of the raw address
    pub ip_hash: String,

    /// [0, 1], higher is better; new addresses start clean
    pub reputation_score: f64,

    pub total_requests: u64,
    pub blocked_requests: u64,

    /// Distinct threat labels observed from this address
    pub attack_types: Vec<String>,

    /// Set when the observed block rate crosses the auto-block rule
    pub auto_block: bool,

    /// Admin override: blocked regardless of score
    pub manually_blocked: bool,
    pub manual_block_reason: Option<String>,
    pub manual_block_by: Option<String>,
    pub manual_block_at: Option<DateTime<Utc>>,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_attack: Option<DateTime<Utc>>,
}

impl IpReputationRecord {
    /// Fresh record for a previously unseen address
    pub fn new(ip_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            ip_hash: ip_hash.into(),
            reputation_score: 1.0,
            total_requests: 0,
            blocked_requests: 0,
            attack_types: Vec::new(),
            auto_block: false,
            manually_blocked: false,
            manual_block_reason: None,
            manual_block_by: None,
            manual_block_at: None,
            first_seen: now,
            last_seen: now,
            last_attack: None,
        }
    }

    /// Fraction of observed requests that were blocked
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.blocked_requests as f64 / self.total_requests as f64
    }

    /// Fold one completed validation into the rolling statistics
    pub fn record_outcome(&mut self, safe: bool, threats: &[ThreatKind]) {
        self.total_requests += 1;
        self.last_seen = Utc::now();

        let outcome = if safe { 1.0 } else { 0.0 };
        self.reputation_score =
            (self.reputation_score * (1.0 - OUTCOME_ALPHA) + outcome * OUTCOME_ALPHA)
                .clamp(0.0, 1.0);

        if !safe {
            self.blocked_requests += 1;
            self.last_attack = Some(self.last_seen);
            for threat in threats {
                let label = threat.label().to_string();
                if !self.attack_types.contains(&label) {
                    self.attack_types.push(label);
                }
            }
        }

        if self.block_rate() > AUTO_BLOCK_RATE && self.total_requests >= AUTO_BLOCK_MIN_SAMPLES {
            self.auto_block = true;
        }
    }

    /// Apply an admin manual block
    pub fn apply_manual_block(&mut self, reason: &str, admin_id: &str) {
        self.manually_blocked = true;
        self.manual_block_reason = Some(reason.to_string());
        self.manual_block_by = Some(admin_id.to_string());
        self.manual_block_at = Some(Utc::now());
        self.reputation_score = self.reputation_score.min(0.1);
    }

    /// Clear an admin manual block
    pub fn clear_manual_block(&mut self) {
        self.manually_blocked = false;
        self.manual_block_reason = None;
        self.manual_block_by = None;
        self.manual_block_at = None;
    }
}

/// Admin mutation categories, mirrored in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionType {
    Block,
    Unblock,
    WhitelistAdd,
    WhitelistRemove,
    BlacklistAdd,
    BlacklistRemove,
}

/// Append-only record of one admin mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub action_type: AdminActionType,
    pub ip: String,
    pub admin_id: String,
    pub reason: String,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Create an entry stamped now
    pub fn new(
        action_type: AdminActionType,
        ip: impl Into<String>,
        admin_id: impl Into<String>,
        reason: impl Into<String>,
        before_state: Option<serde_json::Value>,
        after_state: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type,
            ip: ip.into(),
            admin_id: admin_id.into(),
            reason: reason.into(),
            before_state,
            after_state,
            timestamp: Utc::now(),
        }
    }
}

/// Whitelist/blacklist membership, keyed by raw address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub ip: String,
    pub reason: String,
    /// Blacklist entries carry a severity; whitelist entries do not
    pub severity: Option<String>,
    pub added_by: String,
    pub created_at: DateTime<Utc>,
}

impl ListEntry {
    /// Create an entry stamped now
    pub fn new(
        ip: impl Into<String>,
        reason: impl Into<String>,
        severity: Option<String>,
        added_by: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            reason: reason.into(),
            severity,
            added_by: added_by.into(),
            created_at: Utc::now(),
        }
    }
}
