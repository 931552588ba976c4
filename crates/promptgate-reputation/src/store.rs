//! Reputation store interface and in-memory implementation
//!
//! Reputation records are keyed by hashed address; whitelist and blacklist
//! entries are keyed by raw address (admins manage addresses they can see).
//! The audit log is append-only: there is deliberately no update or delete
//! on it anywhere in this interface.

use async_trait::async_trait;
use parking_lot::RwLock;
use promptgate_core::{Result, TtlMap};
use serde::{Deserialize, Serialize};

use crate::record::{AuditLogEntry, IpReputationRecord, ListEntry};

/// Which admin-managed list to address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

/// Filters for listing reputation records
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReputationFilter {
    /// Keep only records at or above this score
    pub score_min: Option<f64>,

    /// Keep only records flagged for auto-blocking
    #[serde(default)]
    pub auto_block_only: bool,

    /// Keep only manually blocked records
    #[serde(default)]
    pub manually_blocked_only: bool,

    /// Page size; clamped to [1, 200], default 50
    pub limit: Option<usize>,

    /// Page offset
    #[serde(default)]
    pub offset: usize,
}

impl ReputationFilter {
    /// Effective page size after clamping
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}

/// Filters for reading the audit log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub action_type: Option<String>,
    pub ip: Option<String>,
    pub admin_user_id: Option<String>,

    /// Page size; default 100
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: usize,
}

impl AuditFilter {
    /// Effective page size
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

/// Narrow repository interface over the reputation store
#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Fetch a reputation record by hashed address
    async fn get_record(&self, ip_hash: &str) -> Result<Option<IpReputationRecord>>;

    /// Insert or replace a reputation record
    async fn put_record(&self, record: &IpReputationRecord) -> Result<()>;

    /// List records, most suspect first, honoring the filter
    async fn list_records(&self, filter: &ReputationFilter) -> Result<Vec<IpReputationRecord>>;

    /// Fetch a whitelist/blacklist entry by raw address
    async fn get_list_entry(&self, list: ListKind, ip: &str) -> Result<Option<ListEntry>>;

    /// Insert or replace a list entry
    async fn put_list_entry(&self, list: ListKind, entry: &ListEntry) -> Result<()>;

    /// Remove a list entry, returning the removed entry if present
    async fn remove_list_entry(&self, list: ListKind, ip: &str) -> Result<Option<ListEntry>>;

    /// Append one audit entry; entries are never mutated or deleted
    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Read the audit log newest-first, honoring the filter
    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>>;
}

/// In-memory reputation store used by the gateway and tests
pub struct MemoryReputationStore {
    records: TtlMap<IpReputationRecord>,
    whitelist: TtlMap<ListEntry>,
    blacklist: TtlMap<ListEntry>,
    audit: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryReputationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: TtlMap::new(),
            whitelist: TtlMap::new(),
            blacklist: TtlMap::new(),
            audit: RwLock::new(Vec::new()),
        }
    }

    fn list_map(&self, list: ListKind) -> &TtlMap<ListEntry> {
        match list {
            ListKind::Whitelist => &self.whitelist,
            ListKind::Blacklist => &self.blacklist,
        }
    }
}

impl Default for MemoryReputationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReputationStore for MemoryReputationStore {
    async fn get_record(&self, ip_hash: &str) -> Result<Option<IpReputationRecord>> {
        Ok(self.records.get(ip_hash))
    }

    async fn put_record(&self, record: &IpReputationRecord) -> Result<()> {
        self.records.put(record.ip_hash.clone(), record.clone());
        Ok(())
    }

    async fn list_records(&self, filter: &ReputationFilter) -> Result<Vec<IpReputationRecord>> {
        let mut records = self.records.values();
        records.retain(|r| {
            filter.score_min.map_or(true, |min| r.reputation_score >= min)
                && (!filter.auto_block_only || r.auto_block)
                && (!filter.manually_blocked_only || r.manually_blocked)
        });
        // Worst reputation first: that is what admins page through
        records.sort_by(|a, b| {
            a.reputation_score
                .partial_cmp(&b.reputation_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(records
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn get_list_entry(&self, list: ListKind, ip: &str) -> Result<Option<ListEntry>> {
        Ok(self.list_map(list).get(ip))
    }

    async fn put_list_entry(&self, list: ListKind, entry: &ListEntry) -> Result<()> {
        self.list_map(list).put(entry.ip.clone(), entry.clone());
        Ok(())
    }

    async fn remove_list_entry(&self, list: ListKind, ip: &str) -> Result<Option<ListEntry>> {
        let map = self.list_map(list);
        let existing = map.get(ip);
        if existing.is_some() {
            map.delete(ip);
        }
        Ok(existing)
    }

    async fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        self.audit.write().push(entry.clone());
        Ok(())
    }

    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let audit = self.audit.read();
        let action_type = filter.action_type.as_deref();
        let mut entries: Vec<AuditLogEntry> = audit
            .iter()
            .rev()
            .filter(|e| {
                action_type.map_or(true, |t| {
                    serde_json::to_value(e.action_type)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s == t))
                        .unwrap_or(false)
                }) && filter.ip.as_deref().map_or(true, |ip| e.ip == ip)
                    && filter
                        .admin_user_id
                        .as_deref()
                        .map_or(true, |id| e.admin_id == id)
            })
            .cloned()
            .collect();
        entries = entries
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect();
        Ok(entries)
    }
}
