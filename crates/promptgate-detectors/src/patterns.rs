//! Instant pattern rules (zero cost)
//!
//! Two layers run before any model is consulted:
//! - Hard-block banks for payloads that are attacks regardless of intent:
//!   XSS, SQL injection, template injection, command injection
//! - The two-tier instant rules: `definitely_malicious` then
//!   `definitely_safe`, each anchored and carrying a fixed 0.95 confidence
//!
//! Everything here is deterministic and side-effect free. Text that matches
//! nothing falls through to the rest of the pipeline.

use aho_corasick::AhoCorasick;
use promptgate_core::{Error, Result, Stage, ThreatKind, ValidationVerdict};
use regex::Regex;

/// Fixed confidence carried by both instant tiers
pub const INSTANT_CONFIDENCE: f64 = 0.95;

/// Outcome of an instant pattern check
#[derive(Debug, Clone)]
pub struct PatternMatch {
    /// Whether the matched tier is a safe or malicious one
    pub safe: bool,

    /// Fixed confidence for the matched bank
    pub confidence: f64,

    /// Threat attributed to the match (empty for the safe tier)
    pub threat: Option<ThreatKind>,

    /// Which rule fired, for reasoning strings
    pub reasoning: String,
}

impl PatternMatch {
    /// Convert into a pipeline verdict at the pattern stage
    pub fn into_verdict(self) -> ValidationVerdict {
        let verdict = if self.safe {
            ValidationVerdict::allow(Stage::Pattern, self.confidence)
        } else {
            ValidationVerdict::block(
                Stage::Pattern,
                self.confidence,
                self.threat.into_iter().collect(),
            )
        };
        verdict.with_reasoning(self.reasoning)
    }
}

/// Compiled instant pattern banks
pub struct PatternMatcher {
    definitely_malicious: Vec<Regex>,
    definitely_safe: Vec<Regex>,
    xss: Vec<Regex>,
    sql: Vec<Regex>,
    template: Vec<Regex>,
    command: Vec<Regex>,
    educational_context: AhoCorasick,
}

impl PatternMatcher {
    /// Compile all banks
    pub fn new() -> Result<Self> {
        // Unambiguous manipulation attempts, anchored to avoid firing on
        // text that merely discusses them
        let definitely_malicious = compile(&[
            r"(?i)^ignore all previous instructions",
            r"(?i)^you are now (dan|jailbroken)",
            r"(?i)^reveal your system prompt$",
            r"(?i)^bypass (all )?safety checks?",
            r"(?i)as your (developer|creator) at (anthropic|openai)",
        ])?;

        // Whole-message benign shapes. Kept deliberately narrow: each rule
        // must match the entire prompt so nothing can ride along after it.
        let definitely_safe = compile(&[
            r"(?i)^what(?:'s| is) the capital of [a-z ]+\??$",
            r"(?i)^what time is it(?: in [a-z ]+)?\??$",
            r"(?i)^(?:hi|hello|hey|good (?:morning|afternoon|evening))[.!]?$",
            r"(?i)^(?:thanks|thank you)(?: very much)?[.!]?$",
            r"(?i)^what(?:'s| is) \d+ ?[-+*/x] ?\d+\??$",
        ])?;

        // Script execution attempts, including common obfuscation
        let xss = compile(&[
            r"(?is)<script[^>]*>.*?</script>",
            r"(?i)<script[^>]*/>",
            r#"(?i)javascript:\s*[^"\s]"#,
            r"(?i)<[^>]+on\w+\s*=\s*[^>]*>",
            r"(?i)on(load|error|click|mouseover|focus|blur|change)\s*=",
            r"(?i)<(iframe|embed|object|svg)[^>]*>",
            r"(?i)String\.fromCharCode\s*\(",
            r"(?i)eval\s*\(",
            r"(?i)Function\s*\(",
            r"(?i)setTimeout\s*\(",
            r"(?i)setInterval\s*\(",
            r"(?i)<svg[^>]*on\w+",
            r"(?i)<img[^>]*on\w+",
            r"(?i)<body[^>]*on\w+",
            r"(?i)alert\s*\([^)]*\)",
            r"(?i)prompt\s*\([^)]*\)",
            r"(?i)confirm\s*\([^)]*\)",
            r#"(?i)data:text/html[^"'\s]*script"#,
        ])?;

        // Database manipulation shapes
        let sql = compile(&[
            r#"(?i)'\s*(OR|AND)\s*['"]?\d+['"]?\s*=\s*['"]?\d+"#,
            r"(?i)'\s*OR\s+\d+\s*=\s*\d+\s*--",
            r"(?i)'\s*;\s*DROP\s+TABLE",
            r"(?i)'\s*;\s*DELETE\s+FROM",
            r"(?i)'\s*;\s*INSERT\s+INTO",
            r"(?i)'\s*;\s*UPDATE\s+\w+\s+SET",
            r"(?i)UNION\s+SELECT",
            r"(?i)'\s*;\s*EXEC(UTE)?\s*\(",
        ])?;

        // Server-side template expansion shapes
        let template = compile(&[
            r"\{\{[^}]*\}\}",
            r"\$\{[^}]*\}",
            r"#\{[^}]*\}",
            r"<%[^%]*%>",
            r"@\{[^}]*\}",
            r"\[\[[^\]]*\]\]",
        ])?;

        // Shell execution shapes
        let command = compile(&[
            r"(?i);\s*(ls|cat|rm|wget|curl|nc|bash|sh|python|perl|ruby|php)\s",
            r"(?i)\|\s*(ls|cat|rm|wget|curl|nc|bash|sh|python|perl|ruby|php)\s",
            r"`[^`]*`",
            r"\$\(.*?\)",
            r"(?i)&&\s*(ls|cat|rm|wget|curl|nc|bash|sh)\s",
            r"(?i)\|\|\s*(ls|cat|rm|wget|curl|nc|bash|sh)\s",
        ])?;

        // Legitimate security-training phrasing that suppresses the SQL
        // bank (people paste injection examples when asking about them)
        let educational_context = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build([
                "educational",
                "example",
                "explain",
                "training",
                "course",
                "lesson",
                "tutorial",
                "demonstrate",
                "learn",
                "teach",
                "academic",
                "research",
                "paper",
                "thesis",
                "study",
                "security team",
                "for my",
                "how does",
                "what is",
                "can you explain",
            ])
            .map_err(|e| Error::internal(format!("failed to build context matcher: {}", e)))?;

        Ok(Self {
            definitely_malicious,
            definitely_safe,
            xss,
            sql,
            template,
            command,
            educational_context,
        })
    }

    /// Two-tier instant check. Tiers are checked malicious-first; the first
    /// rule to fire wins. Returns `None` when no rule matches.
    pub fn matches(&self, text: &str) -> Option<PatternMatch> {
        if let Some(rule) = first_match(&self.definitely_malicious, text) {
            return Some(PatternMatch {
                safe: false,
                confidence: INSTANT_CONFIDENCE,
                threat: Some(ThreatKind::PatternMatchMalicious),
                reasoning: format!("Matched known malicious pattern: {}", rule),
            });
        }

        if let Some(rule) = first_match(&self.definitely_safe, text) {
            return Some(PatternMatch {
                safe: true,
                confidence: INSTANT_CONFIDENCE,
                threat: None,
                reasoning: format!("Matched known safe pattern: {}", rule),
            });
        }

        None
    }

    /// Hard-block banks for payload-level attacks. Checked before the
    /// two-tier rules; the SQL bank is suppressed when the text reads as a
    /// security-training question.
    pub fn hard_block(&self, text: &str) -> Option<PatternMatch> {
        if first_match(&self.xss, text).is_some() {
            return Some(block(
                ThreatKind::XssAttack,
                0.95,
                "XSS attack pattern detected (script execution attempt)",
            ));
        }

        if first_match(&self.sql, text).is_some() && !self.has_educational_context(text) {
            return Some(block(
                ThreatKind::SqlInjection,
                0.95,
                "SQL injection pattern detected (database manipulation attempt)",
            ));
        }

        if first_match(&self.template, text).is_some() {
            return Some(block(
                ThreatKind::TemplateInjection,
                0.90,
                "Template injection pattern detected (server-side code execution attempt)",
            ));
        }

        if first_match(&self.command, text).is_some() {
            return Some(block(
                ThreatKind::CommandInjection,
                0.95,
                "Command injection pattern detected (system command execution attempt)",
            ));
        }

        None
    }

    fn has_educational_context(&self, text: &str) -> bool {
        self.educational_context.find(text).is_some()
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::internal(format!("invalid pattern {:?}: {}", p, e)))
        })
        .collect()
}

fn first_match<'a>(bank: &'a [Regex], text: &str) -> Option<&'a str> {
    bank.iter().find(|re| re.is_match(text)).map(|re| re.as_str())
}

fn block(threat: ThreatKind, confidence: f64, reasoning: &str) -> PatternMatch {
    PatternMatch {
        safe: false,
        confidence,
        threat: Some(threat),
        reasoning: reasoning.to_string(),
    }
}
