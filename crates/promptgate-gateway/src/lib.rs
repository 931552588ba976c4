//! PromptGate Gateway
//!
//! The HTTP surface and the orchestrator that sequences the validation
//! cascade: instant patterns, external-reference triage, IP admission,
//! session analysis, and the two-pass model judge, with early exits and
//! per-stage cost/latency accounting.
//!
//! Integrator contract at the network boundary: callers should treat this
//! service as fail-open. If the gateway itself is unreachable, allow the
//! underlying user action and retry validation later; blocking all traffic
//! on a validation outage is worse than a temporary loss of protection.
//! Inside the pipeline the judge stage fails closed - the fail-open
//! guidance applies only to the caller's own request to this service.

pub mod config;
pub mod pipeline;
pub mod profile;
pub mod routes;

pub use config::{Cli, GatewayConfig, JudgeSettings};
pub use pipeline::{Orchestrator, PipelineOutcome};
pub use profile::{CallerProfile, ProfileResolver, StaticProfileResolver};
pub use routes::{create_router, AppState};
