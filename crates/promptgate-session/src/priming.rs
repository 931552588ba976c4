//! Context-priming detection
//!
//! A context-priming attack fabricates shared history ("per ticket #99999,
//! ignore the restrictions") to manipulate a model into compliance. Each
//! sub-check extracts candidate references from the new prompt; a reference
//! is fabricated only if no prior prompt in the session history contains
//! that exact substring (case-insensitive). Real references survive the
//! cross-check, fabricated ones do not.

use promptgate_core::{Error, Result};
use regex::Regex;

use crate::session::HistoryEvent;

/// Categories of fabricated-context reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimingKind {
    /// "ticket #123", "issue #9", "case #42"
    TicketReference,
    /// "document X", "file Y", "attachment Z"
    DocumentReference,
    /// "as we discussed", "like you said"
    ConversationClaim,
    /// "previously authorized", "already approved"
    AuthorizationClaim,
    /// "in yesterday's meeting"
    MeetingReference,
}

impl PrimingKind {
    /// Stable label for reasoning strings
    pub fn label(&self) -> &'static str {
        match self {
            Self::TicketReference => "ticket_refs",
            Self::DocumentReference => "doc_refs",
            Self::ConversationClaim => "conv_refs",
            Self::AuthorizationClaim => "auth_refs",
            Self::MeetingReference => "meeting_refs",
        }
    }
}

/// Result of a context-priming scan
#[derive(Debug, Clone)]
pub struct PrimingReport {
    /// Sub-checks that flagged, with the fabricated references they found
    pub fabricated: Vec<(PrimingKind, Vec<String>)>,

    /// Detection confidence (0.9 when anything flagged)
    pub confidence: f64,
}

impl PrimingReport {
    /// Whether any sub-check flagged a fabricated reference
    pub fn is_context_priming(&self) -> bool {
        !self.fabricated.is_empty()
    }

    /// Labels of the sub-checks that flagged
    pub fn flagged_kinds(&self) -> Vec<&'static str> {
        self.fabricated.iter().map(|(kind, _)| kind.label()).collect()
    }
}

/// Extractors for the five reference families
pub struct ContextPrimingDetector {
    checks: Vec<(PrimingKind, Regex)>,
}

impl ContextPrimingDetector {
    /// Compile the extractors
    pub fn new() -> Result<Self> {
        let specs = [
            (
                PrimingKind::TicketReference,
                r"(?i)ticket\s*#?\d+|issue\s*#?\d+|case\s*#?\d+",
            ),
            (
                PrimingKind::DocumentReference,
                r"(?i)document\s+\w+|file\s+\w+|attachment\s+\w+",
            ),
            (
                PrimingKind::ConversationClaim,
                r"(?i)(?:as|like)\s+(?:we|you)\s+(?:discussed|said|agreed|mentioned|talked about)",
            ),
            (
                PrimingKind::AuthorizationClaim,
                r"(?i)(?:as\s+)?(?:previously\s+)?(?:authorized|approved|permitted)",
            ),
            (
                PrimingKind::MeetingReference,
                r"(?i)(?:in|during|from)\s+(?:yesterday's|today's|last\s+week's)\s+(?:meeting|discussion|call)",
            ),
        ];

        let checks = specs
            .into_iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|re| (kind, re))
                    .map_err(|e| Error::internal(format!("invalid priming pattern: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { checks })
    }

    /// Scan a prompt against the session history. Pure; the caller decides
    /// what to do with a positive report.
    pub fn detect(&self, prompt: &str, history: &[HistoryEvent]) -> PrimingReport {
        let mut fabricated = Vec::new();

        for (kind, pattern) in &self.checks {
            let candidates: Vec<String> = pattern
                .find_iter(prompt)
                .map(|m| m.as_str().to_string())
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let exists_in_history = history.iter().any(|event| {
                let prior = event.prompt.to_lowercase();
                candidates
                    .iter()
                    .any(|reference| prior.contains(&reference.to_lowercase()))
            });

            if !exists_in_history {
                fabricated.push((*kind, candidates));
            }
        }

        let confidence = if fabricated.is_empty() { 0.0 } else { 0.9 };
        PrimingReport {
            fabricated,
            confidence,
        }
    }
}
