//! PromptGate Session
//!
//! Short-lived conversational state per caller, used to catch multi-turn
//! manipulation that no single request reveals. Sessions carry a capped
//! history of validation events; context-priming detection cross-references
//! new prompts against that history to spot fabricated shared context
//! ("as we discussed in ticket #4521").

pub mod priming;
pub mod session;
pub mod tracker;

pub use priming::{ContextPrimingDetector, PrimingKind, PrimingReport};
pub use session::{
    generate_session_token, is_valid_token_format, EventResult, HistoryEvent, Session,
    MAX_HISTORY_EVENTS,
};
pub use tracker::{MemorySessionStore, SessionMeta, SessionStore, SessionTracker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::priming::{ContextPrimingDetector, PrimingReport};
    pub use crate::session::{HistoryEvent, Session};
    pub use crate::tracker::{MemorySessionStore, SessionStore, SessionTracker};
}
