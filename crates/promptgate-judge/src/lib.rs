//! PromptGate Judge
//!
//! The protocol-hardened two-pass model judge. Each pass is an isolated
//! call to an ordered list of candidate backend models with fallback on
//! failure or timeout. The untrusted text never enters the instruction
//! channel: it travels as a JSON data payload in the user role, while a
//! per-call random nonce in the system instructions must be echoed back in
//! the structured response. A response that loses the nonce is rejected as
//! a possible injection into the judge itself, regardless of its verdict.

pub mod client;
pub mod judge;
pub mod protocol;

pub use client::{CompletionClient, CompletionOutcome, CompletionRequest, HttpCompletionClient, ModelSpec};
pub use judge::{JudgeConfig, ModelJudge};
pub use protocol::{Pass1Evaluation, Pass1Response, Pass2Evaluation, Pass2Response, RiskLevel};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::{CompletionClient, HttpCompletionClient, ModelSpec};
    pub use crate::judge::{JudgeConfig, ModelJudge};
    pub use crate::protocol::{Pass1Response, Pass2Response, RiskLevel};
}
