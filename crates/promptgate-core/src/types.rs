//! Core types for the PromptGate validation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum accepted prompt size in bytes (32KB)
pub const MAX_PROMPT_BYTES: usize = 32 * 1024;

/// Subscription tier of the calling profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Paid,
    /// Internal infrastructure traffic; bypasses reputation checks entirely
    Internal,
}

impl Tier {
    /// Whether this tier is eligible for reputation-based auto-blocking
    pub fn eligible_for_auto_block(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

/// Pipeline execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// Full cascade with every early exit enabled (default)
    #[default]
    Optimized,
    /// The judge always runs both passes; Pass 1 never early-exits
    Standard,
    /// Skip the pattern and external-reference stages
    AiOnly,
}

/// The pipeline stage that produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pattern,
    ExternalReference,
    Pass1,
    Pass2,
    Session,
    IpReputation,
    Error,
}

/// Threat categories reported in verdicts
///
/// Known categories serialize to their snake_case names; threats reported by
/// the judge model outside this vocabulary round-trip via `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    PatternMatchMalicious,
    XssAttack,
    SqlInjection,
    TemplateInjection,
    CommandInjection,
    AiManipulationDetected,
    ProtocolIntegrityViolation,
    ProcessingError,
    ContextPriming,
    MultiTurnAttack,
    KnownBadActor,
    IpReputation,
    #[serde(untagged)]
    Other(String),
}

impl ThreatKind {
    /// Stable label for metrics and reasoning strings
    pub fn label(&self) -> &str {
        match self {
            Self::PatternMatchMalicious => "pattern_match_malicious",
            Self::XssAttack => "xss_attack",
            Self::SqlInjection => "sql_injection",
            Self::TemplateInjection => "template_injection",
            Self::CommandInjection => "command_injection",
            Self::AiManipulationDetected => "ai_manipulation_detected",
            Self::ProtocolIntegrityViolation => "protocol_integrity_violation",
            Self::ProcessingError => "processing_error",
            Self::ContextPriming => "context_priming",
            Self::MultiTurnAttack => "multi_turn_attack",
            Self::KnownBadActor => "known_bad_actor",
            Self::IpReputation => "ip_reputation",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for ThreatKind {
    fn from(s: &str) -> Self {
        match s {
            "pattern_match_malicious" => Self::PatternMatchMalicious,
            "xss_attack" => Self::XssAttack,
            "sql_injection" => Self::SqlInjection,
            "template_injection" => Self::TemplateInjection,
            "command_injection" => Self::CommandInjection,
            "ai_manipulation_detected" => Self::AiManipulationDetected,
            "protocol_integrity_violation" => Self::ProtocolIntegrityViolation,
            "processing_error" => Self::ProcessingError,
            "context_priming" => Self::ContextPriming,
            "multi_turn_attack" => Self::MultiTurnAttack,
            "known_bad_actor" => Self::KnownBadActor,
            "ip_reputation" => Self::IpReputation,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Operator guidance derived from a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Allow,
    AllowWithMonitoring,
    AllowWithCaution,
    ManualReview,
    Block,
    BlockWithReview,
}

impl Recommendation {
    /// Derive a recommendation from a final safe/confidence pair
    pub fn from_outcome(safe: bool, confidence: f64) -> Self {
        match (safe, confidence) {
            (true, c) if c >= 0.9 => Self::Allow,
            (true, c) if c >= 0.7 => Self::AllowWithMonitoring,
            (false, c) if c >= 0.9 => Self::Block,
            (false, c) if c >= 0.7 => Self::BlockWithReview,
            _ => Self::ManualReview,
        }
    }
}

/// A single validation call, immutable for its duration
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// The untrusted text under validation
    pub text: String,

    /// Opaque session token (`sess_<64 hex>`) if the caller is continuing
    /// a conversation
    pub session_token: Option<String>,

    /// End-user source address, used for reputation lookup
    pub ip_address: String,

    /// End-user agent string, recorded on the session
    pub user_agent: Option<String>,

    /// Authenticated user id, if any (anonymous callers allowed)
    pub user_id: Option<String>,

    /// Calling profile's subscription tier
    pub tier: Tier,

    /// Pipeline execution mode
    pub mode: ValidationMode,

    /// Whether the profile participates in collective intelligence.
    /// When false the reputation engine is neither read nor written.
    pub share_intelligence: bool,

    /// Whether the profile has opted in to reputation auto-blocking
    pub auto_block_enabled: bool,

    /// Arrival time
    pub timestamp: DateTime<Utc>,
}

impl ValidationRequest {
    /// Create a request with default profile settings
    pub fn new(text: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_token: None,
            ip_address: ip_address.into(),
            user_agent: None,
            user_id: None,
            tier: Tier::default(),
            mode: ValidationMode::default(),
            share_intelligence: true,
            auto_block_enabled: false,
            timestamp: Utc::now(),
        }
    }

    /// Set the session token
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Set the tier
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the mode
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reject oversized input before any stage runs
    pub fn check_size(&self) -> Result<()> {
        if self.text.len() > MAX_PROMPT_BYTES {
            return Err(Error::InputTooLarge {
                size: self.text.len(),
                limit: MAX_PROMPT_BYTES,
            });
        }
        Ok(())
    }
}

/// The unified output of the validation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the prompt is considered safe to forward
    pub safe: bool,

    /// Confidence in the verdict, [0, 1]
    pub confidence: f64,

    /// Threats detected; non-empty whenever `safe` is false and the
    /// pipeline did not itself error
    pub threats: Vec<ThreatKind>,

    /// Human-readable explanation
    pub reasoning: String,

    /// The stage that produced the verdict
    pub stage: Stage,

    /// Operator guidance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,

    /// Detection channel for session/reputation short-circuits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_method: Option<String>,

    /// Total judge spend in USD for this request
    pub cost_incurred: f64,

    /// Wall-clock pipeline time
    pub processing_time_ms: u64,
}

impl ValidationVerdict {
    /// An allowing verdict at the given stage
    pub fn allow(stage: Stage, confidence: f64) -> Self {
        Self {
            safe: true,
            confidence,
            threats: Vec::new(),
            reasoning: String::new(),
            stage,
            recommendation: None,
            detection_method: None,
            cost_incurred: 0.0,
            processing_time_ms: 0,
        }
    }

    /// A blocking verdict at the given stage
    pub fn block(stage: Stage, confidence: f64, threats: Vec<ThreatKind>) -> Self {
        Self {
            safe: false,
            confidence,
            threats,
            reasoning: String::new(),
            stage,
            recommendation: None,
            detection_method: None,
            cost_incurred: 0.0,
            processing_time_ms: 0,
        }
    }

    /// Set the reasoning text
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Set the detection channel
    pub fn with_detection_method(mut self, method: impl Into<String>) -> Self {
        self.detection_method = Some(method.into());
        self
    }

    /// Set the recommendation
    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = Some(recommendation);
        self
    }

    /// Verdict invariant: unsafe verdicts name at least one threat unless
    /// the pipeline itself errored
    pub fn is_consistent(&self) -> bool {
        self.safe || !self.threats.is_empty() || self.stage == Stage::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_input_rejected() {
        let req = ValidationRequest::new("x".repeat(MAX_PROMPT_BYTES + 1), "203.0.113.7");
        assert!(matches!(
            req.check_size(),
            Err(Error::InputTooLarge { .. })
        ));
    }

    #[test]
    fn test_max_size_input_accepted() {
        let req = ValidationRequest::new("x".repeat(MAX_PROMPT_BYTES), "203.0.113.7");
        assert!(req.check_size().is_ok());
    }

    #[test]
    fn test_threat_kind_round_trip() {
        let json = serde_json::to_string(&ThreatKind::PatternMatchMalicious).unwrap();
        assert_eq!(json, "\"pattern_match_malicious\"");
        let parsed: ThreatKind = serde_json::from_str("\"pattern_match_malicious\"").unwrap();
        assert_eq!(parsed, ThreatKind::PatternMatchMalicious);
    }

    #[test]
    fn test_unknown_threat_preserved() {
        let parsed: ThreatKind = serde_json::from_str("\"novel_vector\"").unwrap();
        assert_eq!(parsed, ThreatKind::Other("novel_vector".to_string()));
        assert_eq!(parsed.label(), "novel_vector");
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(
            Recommendation::from_outcome(true, 0.95),
            Recommendation::Allow
        );
        assert_eq!(
            Recommendation::from_outcome(true, 0.75),
            Recommendation::AllowWithMonitoring
        );
        assert_eq!(
            Recommendation::from_outcome(false, 0.95),
            Recommendation::Block
        );
        assert_eq!(
            Recommendation::from_outcome(false, 0.75),
            Recommendation::BlockWithReview
        );
        assert_eq!(
            Recommendation::from_outcome(true, 0.5),
            Recommendation::ManualReview
        );
    }

    #[test]
    fn test_verdict_invariant() {
        let blocked = ValidationVerdict::block(
            Stage::Pattern,
            0.95,
            vec![ThreatKind::PatternMatchMalicious],
        );
        assert!(blocked.is_consistent());

        let errored = ValidationVerdict::block(Stage::Error, 0.3, Vec::new());
        assert!(errored.is_consistent());

        let broken = ValidationVerdict::block(Stage::Pattern, 0.95, Vec::new());
        assert!(!broken.is_consistent());
    }

    #[test]
    fn test_mode_parses_kebab_case() {
        let mode: ValidationMode = serde_json::from_str("\"ai-only\"").unwrap();
        assert_eq!(mode, ValidationMode::AiOnly);
    }
}
