//! Judge response protocol
//!
//! Typed response schemas for both passes with explicit field-level
//! validation and nonce verification. Models return prose-wrapped JSON
//! often enough that a balanced-brace extraction pass runs before parsing
//! is declared hopeless; what happens then differs by pass. An unparseable
//! Pass 1 is repaired to an uncertain medium-risk result so the pipeline
//! escalates instead of erroring. An unparseable Pass 2 fails closed. A
//! response that parses but fails validation, in either pass, is a
//! protocol violation: it means something inside the judged text may have
//! reached the judge.

use promptgate_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Risk level reported by Pass 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

/// Structured Pass-1 (pre-filter) response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass1Response {
    pub risk: RiskLevel,
    pub confidence: f64,
    pub context: String,
    #[serde(default)]
    pub legitimate_signals: Vec<String>,
    pub validation_token: u64,
}

impl Pass1Response {
    /// The placeholder returned when Pass 1 output cannot be parsed:
    /// low confidence routes the request to Pass 2
    pub fn repaired(nonce: u64) -> Self {
        Self {
            risk: RiskLevel::Medium,
            confidence: 0.4,
            context: "Invalid model response format - needs deeper validation".to_string(),
            legitimate_signals: Vec::new(),
            validation_token: nonce,
        }
    }

    fn validate(&self, nonce: u64) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::schema(format!(
                "pass1 confidence out of range: {}",
                self.confidence
            )));
        }
        if self.validation_token != nonce {
            return Err(Error::schema(
                "pass1 validation token mismatch - possible prompt injection",
            ));
        }
        Ok(())
    }
}

/// Structured Pass-2 (final) response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass2Response {
    pub safe: bool,
    pub confidence: f64,
    #[serde(default)]
    pub threats: Vec<String>,
    pub reasoning: String,
    pub validation_token: u64,
}

impl Pass2Response {
    fn validate(&self, nonce: u64) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::schema(format!(
                "pass2 confidence out of range: {}",
                self.confidence
            )));
        }
        if self.validation_token != nonce {
            return Err(Error::schema(
                "pass2 validation token mismatch - possible prompt injection",
            ));
        }
        Ok(())
    }
}

/// Outcome of checking a Pass-1 response
#[derive(Debug, Clone)]
pub enum Pass1Evaluation {
    /// Schema and nonce verified (possibly via repair)
    Valid(Pass1Response),
    /// Parsed but failed structural or nonce validation
    ProtocolViolation(String),
}

/// Outcome of checking a Pass-2 response
#[derive(Debug, Clone)]
pub enum Pass2Evaluation {
    /// Schema and nonce verified
    Valid(Pass2Response),
    /// No JSON object could be recovered from the response at all
    Unparseable,
    /// Parsed but failed structural or nonce validation
    ProtocolViolation(String),
}

/// Validate a raw Pass-1 response body
pub fn evaluate_pass1(content: &str, nonce: u64) -> Pass1Evaluation {
    let value = match recover_json(content) {
        Some(value) => value,
        None => return Pass1Evaluation::Valid(Pass1Response::repaired(nonce)),
    };

    let response: Pass1Response = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => return Pass1Evaluation::ProtocolViolation(format!("pass1 schema: {}", e)),
    };

    match response.validate(nonce) {
        Ok(()) => Pass1Evaluation::Valid(response),
        Err(e) => Pass1Evaluation::ProtocolViolation(e.to_string()),
    }
}

/// Validate a raw Pass-2 response body
pub fn evaluate_pass2(content: &str, nonce: u64) -> Pass2Evaluation {
    let value = match recover_json(content) {
        Some(value) => value,
        None => return Pass2Evaluation::Unparseable,
    };

    let response: Pass2Response = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => return Pass2Evaluation::ProtocolViolation(format!("pass2 schema: {}", e)),
    };

    match response.validate(nonce) {
        Ok(()) => Pass2Evaluation::Valid(response),
        Err(e) => Pass2Evaluation::ProtocolViolation(e.to_string()),
    }
}

/// Parse the content as JSON, or extract the first balanced object from
/// prose-wrapped output and parse that
fn recover_json(content: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &content[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}
