//! Shared test harness: a scripted judge client and a fully wired
//! orchestrator over in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use promptgate_core::{Error, Result};
use promptgate_gateway::Orchestrator;
use promptgate_judge::{
    CompletionClient, CompletionOutcome, CompletionRequest, JudgeConfig, ModelJudge,
};
use promptgate_reputation::{AdminOps, MemoryReputationStore, ReputationEngine};
use promptgate_session::{MemorySessionStore, SessionTracker};
use std::sync::Arc;
use std::time::Duration;

/// One scripted judge response
pub enum Scripted {
    Reply(Box<dyn Fn(&CompletionRequest) -> String + Send>),
    Fail(String),
}

impl Scripted {
    pub fn reply(f: impl Fn(&CompletionRequest) -> String + Send + 'static) -> Self {
        Self::Reply(Box::new(f))
    }

    /// A Pass-1 response that early-exits safe
    pub fn pass1_low() -> Self {
        Self::reply(|req| {
            format!(
                r#"{{"risk": "low", "confidence": 0.9, "context": "benign request", "legitimate_signals": [], "validation_token": {}}}"#,
                extract_nonce(req)
            )
        })
    }

    /// A Pass-1 response that escalates to Pass 2
    pub fn pass1_medium() -> Self {
        Self::reply(|req| {
            format!(
                r#"{{"risk": "medium", "confidence": 0.5, "context": "ambiguous", "legitimate_signals": [], "validation_token": {}}}"#,
                extract_nonce(req)
            )
        })
    }

    /// A Pass-2 response that allows
    pub fn pass2_safe() -> Self {
        Self::reply(|req| {
            format!(
                r#"{{"safe": true, "confidence": 0.9, "threats": [], "reasoning": "no manipulation found", "validation_token": {}}}"#,
                extract_nonce(req)
            )
        })
    }
}

/// Pull the nonce back out of the system prompt the judge built
pub fn extract_nonce(request: &CompletionRequest) -> u64 {
    let marker = "validation_token: ";
    let start = request.system_prompt.find(marker).unwrap() + marker.len();
    request.system_prompt[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap()
}

/// Scripted stand-in for the model backend
pub struct ScriptedJudgeClient {
    responses: Mutex<Vec<Scripted>>,
    calls: Mutex<usize>,
}

impl ScriptedJudgeClient {
    pub fn new(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl CompletionClient for ScriptedJudgeClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome> {
        *self.calls.lock() += 1;
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Err(Error::Http("script exhausted".to_string()));
        }
        match responses.remove(0) {
            Scripted::Reply(f) => Ok(CompletionOutcome {
                content: f(request),
                model: request.model.clone(),
                tokens_used: 100,
                latency_ms: 3,
            }),
            Scripted::Fail(msg) => Err(Error::Http(msg)),
        }
    }
}

/// Everything a test needs to drive and inspect the pipeline
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionTracker>,
    pub session_store: Arc<MemorySessionStore>,
    pub reputation: Arc<ReputationEngine>,
    pub reputation_store: Arc<MemoryReputationStore>,
    pub admin: Arc<AdminOps>,
    pub judge_client: Arc<ScriptedJudgeClient>,
}

/// Wire an orchestrator over in-memory stores and the given judge script
pub fn harness(script: Vec<Scripted>) -> Harness {
    let judge_client = ScriptedJudgeClient::new(script);
    let judge = ModelJudge::new(JudgeConfig::default(), judge_client.clone());

    let session_store = Arc::new(MemorySessionStore::new());
    let sessions = Arc::new(SessionTracker::new(
        session_store.clone(),
        Duration::from_millis(250),
    ));

    let reputation_store = Arc::new(MemoryReputationStore::new());
    let reputation = Arc::new(ReputationEngine::new(
        reputation_store.clone(),
        Duration::from_millis(250),
    ));
    let admin = Arc::new(AdminOps::new(reputation_store.clone()));

    let orchestrator = Arc::new(
        Orchestrator::new(judge, sessions.clone(), reputation.clone()).unwrap(),
    );

    Harness {
        orchestrator,
        sessions,
        session_store,
        reputation,
        reputation_store,
        admin,
        judge_client,
    }
}
