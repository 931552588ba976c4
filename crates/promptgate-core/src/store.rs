//! Store primitives shared by the in-memory repository implementations
//!
//! The persistent store behind PromptGate is an abstract key-value/relational
//! collaborator; the pipeline only ever sees the narrow repository traits
//! defined in the session and reputation crates. This module provides the
//! TTL-aware map those in-memory implementations are built on, plus the
//! timeout wrapper that degrades a slow store to `StoreUnavailable` instead
//! of stalling the pipeline.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;

use crate::error::{Error, Result};

/// A concurrent map whose entries can carry an expiry instant.
///
/// Expired entries read as absent before any sweep runs; `sweep` is
/// idempotent and safe to run concurrently with reads.
pub struct TtlMap<V: Clone> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<DateTime<Utc>>,
}

impl<V: Clone> TtlMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get a live value by key; expired entries are treated as not found
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if let Some(expires_at) = entry.expires_at {
            if expires_at < Utc::now() {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Insert or replace a value with no expiry
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Insert or replace a value that expires after `ttl`
    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value,
                expires_at: Some(Utc::now() + ttl),
            },
        );
    }

    /// Remove a key, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at.map_or(true, |at| at >= now));
        before - entries.len()
    }

    /// Snapshot the live values
    pub fn values(&self) -> Vec<V> {
        let now = Utc::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at >= now))
            .map(|e| e.value.clone())
            .collect()
    }

    /// Remove every entry whose live value matches the predicate,
    /// returning how many were removed
    pub fn delete_where(&self, predicate: impl Fn(&V) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !predicate(&e.value));
        before - entries.len()
    }

    /// Number of entries including expired-but-unswept ones
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the map holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone> Default for TtlMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a store operation under a deadline, mapping a timeout to
/// `StoreUnavailable` so callers can degrade instead of blocking.
pub async fn with_store_timeout<T, F>(timeout: std::time::Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(Error::store_unavailable(format!(
            "store operation timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
