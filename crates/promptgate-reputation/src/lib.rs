//! PromptGate Reputation
//!
//! Network defense through collective intelligence. Source IPs are tracked
//! only as irreversible hashes; every completed validation nudges the
//! record's score toward the latest outcome, and confirmed bad actors can
//! be auto-blocked for opted-in paid profiles. Admins can whitelist,
//! blacklist, and manually block addresses, with every mutation captured
//! in an append-only audit log.

pub mod admin;
pub mod engine;
pub mod record;
pub mod store;

pub use admin::AdminOps;
pub use engine::{ReputationCheck, ReputationEngine};
pub use record::{hash_ip, AdminActionType, AuditLogEntry, IpReputationRecord, ListEntry};
pub use store::{
    AuditFilter, ListKind, MemoryReputationStore, ReputationFilter, ReputationStore,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::admin::AdminOps;
    pub use crate::engine::{ReputationCheck, ReputationEngine};
    pub use crate::record::{hash_ip, IpReputationRecord};
    pub use crate::store::{MemoryReputationStore, ReputationStore};
}
