//! Session data model
//!
//! A session is keyed by an opaque `sess_<64 hex>` token and belongs to
//! exactly one caller context. It is created lazily on the first validation
//! without a usable token, mutated on every call, and destroyed by the
//! background expiry sweep or an explicit privacy deletion.

use chrono::{DateTime, Duration, Utc};
use promptgate_core::ThreatKind;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// History cap; the oldest events are evicted first
pub const MAX_HISTORY_EVENTS: usize = 50;

/// Sliding session lifetime from last activity
pub fn session_ttl() -> Duration {
    Duration::hours(2)
}

/// Outcome recorded for one validation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Safe,
    Blocked,
}

/// One validated prompt in a session's history.
///
/// The prompt is retained raw (it is needed verbatim for context-priming
/// cross-referencing) and is bounded by the session's two-hour lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub prompt: String,
    pub result: EventResult,
    pub threats: Vec<ThreatKind>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEvent {
    /// Create an event stamped now
    pub fn new(
        prompt: impl Into<String>,
        result: EventResult,
        threats: Vec<ThreatKind>,
        confidence: f64,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            result,
            threats,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Per-caller conversational state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque token in the form `sess_<64 hex>`
    pub token: String,

    /// Authenticated user, if any; anonymous sessions are allowed
    pub user_id: Option<String>,

    /// Source address recorded at creation
    pub ip_address: Option<String>,

    /// User agent recorded at creation
    pub user_agent: Option<String>,

    /// Validation events, oldest first, capped at `MAX_HISTORY_EVENTS`
    pub history: Vec<HistoryEvent>,

    /// Advisory flags accumulated over the session's life
    pub flags: HashMap<String, serde_json::Value>,

    /// Total validations handled by this session
    pub request_count: u64,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session
    pub fn new(token: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            token: token.into(),
            user_id: None,
            ip_address: None,
            user_agent: None,
            history: Vec::new(),
            flags: HashMap::new(),
            request_count: 0,
            created_at: now,
            last_activity_at: now,
            expires_at: now + session_ttl(),
        }
    }

    /// Set the user id
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the source address
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Append an event, trim the history to the newest
    /// `MAX_HISTORY_EVENTS`, bump counters, and slide the TTL forward
    pub fn record_event(&mut self, event: HistoryEvent) {
        self.history.push(event);
        if self.history.len() > MAX_HISTORY_EVENTS {
            let excess = self.history.len() - MAX_HISTORY_EVENTS;
            self.history.drain(..excess);
        }
        self.request_count += 1;
        self.last_activity_at = Utc::now();
        self.expires_at = self.last_activity_at + session_ttl();
    }

    /// Merge flags additively. Union per key, last writer wins on
    /// collisions; existing keys are never dropped. The merge is shallow:
    /// values are replaced whole, not recursively combined.
    pub fn merge_flags(&mut self, new_flags: HashMap<String, serde_json::Value>) {
        self.flags.extend(new_flags);
    }

    /// Whether the sliding TTL has elapsed
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Generate a cryptographically random session token (`sess_<64 hex>`)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sess_{}", hex)
}

/// Whether a caller-supplied token has the expected shape
pub fn is_valid_token_format(token: &str) -> bool {
    token.len() == 69
        && token.starts_with("sess_")
        && token[5..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
