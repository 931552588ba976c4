//! The validation cascade
//!
//! Stage order: instant patterns, external-reference triage, IP admission,
//! session analysis, then the two-pass judge. Deterministic stages run
//! first so their verdicts win regardless of anything later and the judge
//! is only paid for when nothing cheaper resolves the request. Session and
//! reputation state is updated as a side effect of every path, including
//! early exits.
//!
//! Failure policy: a slow or unreachable store degrades the session and
//! reputation sub-checks to "unknown" and the pipeline continues; a judge
//! with no working models fails closed as a low-confidence unsafe verdict.

use promptgate_core::{
    Error, Recommendation, Result, Stage, ThreatKind, ValidationMode, ValidationRequest,
    ValidationVerdict,
};
use promptgate_detectors::{ExternalReferenceDetector, PatternMatcher};
use promptgate_judge::ModelJudge;
use promptgate_reputation::ReputationEngine;
use promptgate_session::{
    generate_session_token, ContextPrimingDetector, EventResult, HistoryEvent, Session,
    SessionMeta, SessionTracker,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Verdict plus the response context the HTTP layer needs
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub verdict: ValidationVerdict,

    /// Token for this (possibly freshly created) session
    pub session_token: String,

    /// Whether the reputation record was consulted
    pub ip_reputation_checked: bool,

    /// Score of the consulted record, if one exists
    pub ip_reputation_score: Option<f64>,
}

/// Sequences the cascade and owns its early-exit policy
pub struct Orchestrator {
    matcher: PatternMatcher,
    external: ExternalReferenceDetector,
    priming: ContextPrimingDetector,
    judge: ModelJudge,
    sessions: Arc<SessionTracker>,
    reputation: Arc<ReputationEngine>,
}

impl Orchestrator {
    /// Build the cascade over the injected collaborators
    pub fn new(
        judge: ModelJudge,
        sessions: Arc<SessionTracker>,
        reputation: Arc<ReputationEngine>,
    ) -> Result<Self> {
        Ok(Self {
            matcher: PatternMatcher::new()?,
            external: ExternalReferenceDetector::new()?,
            priming: ContextPrimingDetector::new()?,
            judge,
            sessions,
            reputation,
        })
    }

    /// Run one request through the cascade
    pub async fn validate(&self, request: &ValidationRequest) -> Result<PipelineOutcome> {
        request.check_size()?;

        let start = Instant::now();
        metrics::counter!("promptgate_requests_total").increment(1);

        let run_detectors = request.mode != ValidationMode::AiOnly;

        // Stage: instant patterns. The two-tier rules run before anything
        // else so a definite pattern verdict wins regardless of what other
        // stages would say about the same text.
        if run_detectors {
            if let Some(hit) = self
                .matcher
                .matches(&request.text)
                .or_else(|| self.matcher.hard_block(&request.text))
            {
                debug!(safe = hit.safe, "instant pattern verdict");
                let verdict = hit.into_verdict();
                return self
                    .finish(request, verdict, start, None, HashMap::new(), false, None)
                    .await;
            }
        }

        // Stage: external-reference triage. Flag, don't block.
        if run_detectors {
            let report = self.external.detect(&request.text);
            if report.has_external_references {
                debug!(types = ?report.types, "external references found");
                let recommendation = report.recommendation();
                let verdict =
                    ValidationVerdict::allow(Stage::ExternalReference, report.confidence)
                        .with_reasoning(report.reasoning.join("; "))
                        .with_recommendation(recommendation);
                return self
                    .finish(request, verdict, start, None, HashMap::new(), false, None)
                    .await;
            }
        }

        // Stage: IP admission. Profiles that opted out of intelligence
        // sharing neither read nor write reputation state.
        let mut ip_checked = false;
        let mut ip_score = None;
        if request.share_intelligence {
            match self
                .reputation
                .check(
                    &request.ip_address,
                    request.tier,
                    request.auto_block_enabled,
                )
                .await
            {
                Ok(check) => {
                    ip_checked = check.checked;
                    ip_score = check.reputation_score;
                    if check.should_block {
                        info!(ip = %request.ip_address, "request refused at admission");
                        let reason = check
                            .block_reason
                            .unwrap_or_else(|| "poor reputation".to_string());
                        let verdict = ValidationVerdict::block(
                            Stage::IpReputation,
                            1.0,
                            vec![ThreatKind::KnownBadActor, ThreatKind::IpReputation],
                        )
                        .with_reasoning(format!("Request from known malicious IP: {}", reason))
                        .with_detection_method("ip_reputation");
                        return self
                            .finish(
                                request,
                                verdict,
                                start,
                                None,
                                HashMap::new(),
                                ip_checked,
                                ip_score,
                            )
                            .await;
                    }
                }
                Err(Error::StoreUnavailable(msg)) => {
                    warn!("reputation check degraded: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        // Stage: session analysis. Context priming can only be judged
        // against accumulated history.
        let session = self.resolve_session(request).await;
        if let Some(ref s) = session {
            if !s.history.is_empty() {
                let report = self.priming.detect(&request.text, &s.history);
                if report.is_context_priming() {
                    info!(token = %s.token, "context priming detected");
                    let prior_count = s
                        .flags
                        .get("context_priming_count")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    let flags = HashMap::from([
                        ("context_priming_detected".to_string(), json!(true)),
                        ("context_priming_count".to_string(), json!(prior_count + 1)),
                    ]);
                    let verdict = ValidationVerdict::block(
                        Stage::Session,
                        report.confidence,
                        vec![ThreatKind::ContextPriming, ThreatKind::MultiTurnAttack],
                    )
                    .with_reasoning(format!(
                        "Context priming detected: references to {} not found in session history",
                        report.flagged_kinds().join(", ")
                    ))
                    .with_detection_method("session_analysis");
                    return self
                        .finish(request, verdict, start, session, flags, ip_checked, ip_score)
                        .await;
                }
            }
        }

        // Stage: the judge. Standard mode disables the Pass-1 early exit.
        let verdict = match self
            .judge
            .evaluate(&request.text, request.mode == ValidationMode::Standard)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                // Fail closed: a broken judge must not pass unsafe content
                // through as safe-by-default
                warn!("judge unavailable, failing closed: {}", e);
                metrics::counter!("promptgate_errors_total", "kind" => "judge").increment(1);
                ValidationVerdict::block(Stage::Error, 0.3, vec![ThreatKind::ProcessingError])
                    .with_reasoning(format!("Validation error: {}", e))
            }
        };

        self.finish(request, verdict, start, session, HashMap::new(), ip_checked, ip_score)
            .await
    }

    /// Out-of-band session sweep; exposed for the background task
    pub async fn sweep_sessions(&self) -> Result<usize> {
        self.sessions.sweep().await
    }

    async fn resolve_session(&self, request: &ValidationRequest) -> Option<Session> {
        let meta = SessionMeta {
            user_id: request.user_id.clone(),
            ip_address: Some(request.ip_address.clone()),
            user_agent: request.user_agent.clone(),
        };
        match self
            .sessions
            .resolve_or_create(request.session_token.as_deref(), meta)
            .await
        {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("session store degraded: {}", e);
                metrics::counter!("promptgate_errors_total", "kind" => "session_store")
                    .increment(1);
                None
            }
        }
    }

    /// Apply the side effects every path shares, then assemble the outcome
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        request: &ValidationRequest,
        mut verdict: ValidationVerdict,
        start: Instant,
        session: Option<Session>,
        flags: HashMap<String, serde_json::Value>,
        ip_reputation_checked: bool,
        ip_reputation_score: Option<f64>,
    ) -> Result<PipelineOutcome> {
        let mut session = match session {
            Some(session) => Some(session),
            None => self.resolve_session(request).await,
        };

        let session_token = match session {
            Some(ref s) => s.token.clone(),
            // The caller still gets a token; it just will not resolve
            // until the store recovers
            None => generate_session_token(),
        };

        if let Some(ref mut s) = session {
            let event = HistoryEvent::new(
                request.text.clone(),
                if verdict.safe {
                    EventResult::Safe
                } else {
                    EventResult::Blocked
                },
                verdict.threats.clone(),
                verdict.confidence,
            );
            if let Err(e) = self.sessions.record(s, event, flags).await {
                warn!("failed to record session event: {}", e);
            }
        }

        if request.share_intelligence {
            if let Err(e) = self
                .reputation
                .record_outcome(&request.ip_address, verdict.safe, &verdict.threats)
                .await
            {
                warn!("failed to record reputation outcome: {}", e);
            }
        }

        verdict.processing_time_ms = start.elapsed().as_millis() as u64;
        if verdict.recommendation.is_none() {
            verdict.recommendation = Some(Recommendation::from_outcome(
                verdict.safe,
                verdict.confidence,
            ));
        }

        metrics::counter!(
            "promptgate_verdicts_total",
            "stage" => stage_label(verdict.stage),
            "safe" => if verdict.safe { "true" } else { "false" }
        )
        .increment(1);
        metrics::histogram!("promptgate_pipeline_latency_us")
            .record(start.elapsed().as_micros() as f64);
        if verdict.cost_incurred > 0.0 {
            metrics::histogram!("promptgate_judge_cost_usd").record(verdict.cost_incurred);
        }

        Ok(PipelineOutcome {
            verdict,
            session_token,
            ip_reputation_checked,
            ip_reputation_score,
        })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Pattern => "pattern",
        Stage::ExternalReference => "external_reference",
        Stage::Pass1 => "pass1",
        Stage::Pass2 => "pass2",
        Stage::Session => "session",
        Stage::IpReputation => "ip_reputation",
        Stage::Error => "error",
    }
}
