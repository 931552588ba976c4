//! Audited admin mutations
//!
//! Every mutation is synchronous, requires a non-empty free-text reason,
//! and appends exactly one audit entry capturing the before and after
//! state. Missing reasons surface as `InvalidAdminInput`; nothing is ever
//! silently defaulted.

use promptgate_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

use crate::record::{
    hash_ip, AdminActionType, AuditLogEntry, IpReputationRecord, ListEntry,
};
use crate::store::{AuditFilter, ListKind, ReputationFilter, ReputationStore};

/// Admin operations over the reputation store
pub struct AdminOps {
    store: Arc<dyn ReputationStore>,
}

impl AdminOps {
    /// Create admin operations over the given store
    pub fn new(store: Arc<dyn ReputationStore>) -> Self {
        Self { store }
    }

    /// Manually block an address. Creates the reputation record if the
    /// address has never been seen.
    pub async fn block_ip(&self, ip: &str, reason: &str, admin_id: &str) -> Result<()> {
        validate_input(ip, reason, admin_id)?;

        let ip_hash = hash_ip(ip);
        let before = self.store.get_record(&ip_hash).await?;
        let mut record = before
            .clone()
            .unwrap_or_else(|| IpReputationRecord::new(&ip_hash));
        record.apply_manual_block(reason, admin_id);
        self.store.put_record(&record).await?;

        self.audit(
            AdminActionType::Block,
            ip,
            admin_id,
            reason,
            before.as_ref().map(snapshot),
            Some(snapshot(&record)),
        )
        .await?;
        info!(ip = %ip, admin = %admin_id, "ip manually blocked");
        Ok(())
    }

    /// Clear a manual block
    pub async fn unblock_ip(&self, ip: &str, reason: &str, admin_id: &str) -> Result<()> {
        validate_input(ip, reason, admin_id)?;

        let ip_hash = hash_ip(ip);
        let before = self
            .store
            .get_record(&ip_hash)
            .await?
            .ok_or_else(|| Error::admin(format!("no reputation record for {}", ip)))?;
        let mut record = before.clone();
        record.clear_manual_block();
        self.store.put_record(&record).await?;

        self.audit(
            AdminActionType::Unblock,
            ip,
            admin_id,
            reason,
            Some(snapshot(&before)),
            Some(snapshot(&record)),
        )
        .await?;
        info!(ip = %ip, admin = %admin_id, "ip unblocked");
        Ok(())
    }

    /// Add an address to the whitelist
    pub async fn whitelist_add(&self, ip: &str, reason: &str, admin_id: &str) -> Result<()> {
        validate_input(ip, reason, admin_id)?;

        let entry = ListEntry::new(ip, reason, None, admin_id);
        self.store
            .put_list_entry(ListKind::Whitelist, &entry)
            .await?;
        self.audit(
            AdminActionType::WhitelistAdd,
            ip,
            admin_id,
            reason,
            None,
            Some(snapshot(&entry)),
        )
        .await?;
        info!(ip = %ip, admin = %admin_id, "ip whitelisted");
        Ok(())
    }

    /// Remove an address from the whitelist
    pub async fn whitelist_remove(&self, ip: &str, reason: &str, admin_id: &str) -> Result<()> {
        validate_input(ip, reason, admin_id)?;

        let removed = self
            .store
            .remove_list_entry(ListKind::Whitelist, ip)
            .await?
            .ok_or_else(|| Error::admin(format!("{} is not on the whitelist", ip)))?;
        self.audit(
            AdminActionType::WhitelistRemove,
            ip,
            admin_id,
            reason,
            Some(snapshot(&removed)),
            None,
        )
        .await?;
        Ok(())
    }

    /// Add an address to the blacklist with a severity
    pub async fn blacklist_add(
        &self,
        ip: &str,
        reason: &str,
        severity: &str,
        admin_id: &str,
    ) -> Result<()> {
        validate_input(ip, reason, admin_id)?;
        if !matches!(severity, "low" | "medium" | "high" | "critical") {
            return Err(Error::admin(format!(
                "invalid severity {:?}; expected low|medium|high|critical",
                severity
            )));
        }

        let entry = ListEntry::new(ip, reason, Some(severity.to_string()), admin_id);
        self.store
            .put_list_entry(ListKind::Blacklist, &entry)
            .await?;
        self.audit(
            AdminActionType::BlacklistAdd,
            ip,
            admin_id,
            reason,
            None,
            Some(snapshot(&entry)),
        )
        .await?;
        info!(ip = %ip, severity = %severity, admin = %admin_id, "ip blacklisted");
        Ok(())
    }

    /// Remove an address from the blacklist
    pub async fn blacklist_remove(&self, ip: &str, reason: &str, admin_id: &str) -> Result<()> {
        validate_input(ip, reason, admin_id)?;

        let removed = self
            .store
            .remove_list_entry(ListKind::Blacklist, ip)
            .await?
            .ok_or_else(|| Error::admin(format!("{} is not on the blacklist", ip)))?;
        self.audit(
            AdminActionType::BlacklistRemove,
            ip,
            admin_id,
            reason,
            Some(snapshot(&removed)),
            None,
        )
        .await?;
        Ok(())
    }

    /// List reputation records for the admin UI
    pub async fn list_records(
        &self,
        filter: &ReputationFilter,
    ) -> Result<Vec<IpReputationRecord>> {
        self.store.list_records(filter).await
    }

    /// Read the append-only audit log
    pub async fn audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        self.store.query_audit(filter).await
    }

    async fn audit(
        &self,
        action_type: AdminActionType,
        ip: &str,
        admin_id: &str,
        reason: &str,
        before_state: Option<serde_json::Value>,
        after_state: Option<serde_json::Value>,
    ) -> Result<()> {
        self.store
            .append_audit(&AuditLogEntry::new(
                action_type,
                ip,
                admin_id,
                reason,
                before_state,
                after_state,
            ))
            .await
    }
}

fn validate_input(ip: &str, reason: &str, admin_id: &str) -> Result<()> {
    if ip.trim().is_empty() {
        return Err(Error::admin("ip address is required"));
    }
    if reason.trim().is_empty() {
        return Err(Error::admin("a non-empty reason is required"));
    }
    if admin_id.trim().is_empty() {
        return Err(Error::admin("admin id is required"));
    }
    Ok(())
}

fn snapshot<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
