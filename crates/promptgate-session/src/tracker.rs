//! Store-backed session lifecycle
//!
//! The tracker owns resolve-or-create semantics, event recording, the
//! out-of-band expiry sweep, and privacy deletion. Store operations run
//! under a short deadline; a slow or unreachable store surfaces as
//! `StoreUnavailable` and the caller degrades the session sub-check rather
//! than stalling the pipeline.

use async_trait::async_trait;
use chrono::Utc;
use promptgate_core::{with_store_timeout, Result, TtlMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::session::{
    generate_session_token, is_valid_token_format, HistoryEvent, Session,
};

/// Narrow repository interface over the session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a live session; expired sessions read as not found
    async fn get(&self, token: &str) -> Result<Option<Session>>;

    /// Insert or replace a session, honoring its `expires_at`
    async fn put(&self, session: &Session) -> Result<()>;

    /// Remove a session, returning whether it existed
    async fn delete(&self, token: &str) -> Result<bool>;

    /// Drop expired sessions; idempotent and safe alongside live reads
    async fn sweep_expired(&self) -> Result<usize>;

    /// Remove every session belonging to a user (privacy deletion)
    async fn delete_for_user(&self, user_id: &str) -> Result<usize>;
}

/// In-memory session store used by the gateway and tests
pub struct MemorySessionStore {
    sessions: TtlMap<Session>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            sessions: TtlMap::new(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(token).filter(|s| !s.is_expired()))
    }

    async fn put(&self, session: &Session) -> Result<()> {
        let ttl = session.expires_at - Utc::now();
        self.sessions
            .put_with_ttl(session.token.clone(), session.clone(), ttl);
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        Ok(self.sessions.delete(token))
    }

    async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.sessions.sweep())
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .sessions
            .delete_where(|s| s.user_id.as_deref() == Some(user_id)))
    }
}

/// Metadata recorded on newly created sessions
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Session lifecycle service
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    store_timeout: Duration,
}

impl SessionTracker {
    /// Create a tracker over the given store
    pub fn new(store: Arc<dyn SessionStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Resolve an existing session or create a fresh one. A malformed or
    /// unknown token yields a new session rather than an error.
    pub async fn resolve_or_create(
        &self,
        token: Option<&str>,
        meta: SessionMeta,
    ) -> Result<Session> {
        if let Some(token) = token.filter(|t| is_valid_token_format(t)) {
            if let Some(session) =
                with_store_timeout(self.store_timeout, self.store.get(token)).await?
            {
                return Ok(session);
            }
            debug!(token = %token, "session token unknown or expired; creating fresh session");
        }

        let mut session = Session::new(generate_session_token());
        session.user_id = meta.user_id;
        session.ip_address = meta.ip_address;
        session.user_agent = meta.user_agent;
        with_store_timeout(self.store_timeout, self.store.put(&session)).await?;
        Ok(session)
    }

    /// Append an event and merged flags to a session and persist it
    pub async fn record(
        &self,
        session: &mut Session,
        event: HistoryEvent,
        flags: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        session.record_event(event);
        if !flags.is_empty() {
            session.merge_flags(flags);
        }
        with_store_timeout(self.store_timeout, self.store.put(session)).await
    }

    /// Out-of-band expiry sweep; not part of the request path
    pub async fn sweep(&self) -> Result<usize> {
        let swept = self.store.sweep_expired().await?;
        if swept > 0 {
            info!(swept, "expired sessions removed");
        }
        Ok(swept)
    }

    /// Purge all sessions for a user (privacy deletion)
    pub async fn purge_user(&self, user_id: &str) -> Result<usize> {
        let purged = self.store.delete_for_user(user_id).await?;
        info!(user_id = %user_id, purged, "user sessions purged");
        Ok(purged)
    }
}
