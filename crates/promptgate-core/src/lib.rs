//! PromptGate Core
//!
//! Core types, error taxonomy, and store primitives shared across PromptGate
//! components.
//!
//! This crate provides:
//! - The validation request/verdict data model
//! - Threat, stage, and recommendation vocabularies
//! - The workspace error type and result alias
//! - A TTL-aware key-value map used by the in-memory store implementations

pub mod error;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use store::{with_store_timeout, TtlMap};
pub use types::{
    Recommendation, Stage, ThreatKind, Tier, ValidationMode, ValidationRequest, ValidationVerdict,
    MAX_PROMPT_BYTES,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        Recommendation, Stage, ThreatKind, Tier, ValidationMode, ValidationRequest,
        ValidationVerdict,
    };
}
