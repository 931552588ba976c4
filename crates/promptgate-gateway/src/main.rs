//! PromptGate Gateway
//!
//! Validation gateway for untrusted LLM prompts. Sits in front of a
//! downstream model and decides SAFE/UNSAFE through a cascading,
//! cost-aware pipeline: instant pattern rules, external-reference triage,
//! IP admission control, per-session context-priming analysis, and a
//! protocol-hardened two-pass model judge.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use promptgate_gateway::{
    create_router, AppState, CallerProfile, Cli, GatewayConfig, Orchestrator,
    StaticProfileResolver,
};
use promptgate_judge::{HttpCompletionClient, ModelJudge};
use promptgate_reputation::{AdminOps, MemoryReputationStore, ReputationEngine};
use promptgate_session::{MemorySessionStore, SessionTracker};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting PromptGate Gateway");

    let config = GatewayConfig::load(&cli.config, &cli)?;
    info!("Configuration loaded successfully");
    info!("Judge endpoint: {}", config.judge.endpoint);
    info!(
        "Judge models: pass1={}, pass2={}",
        config.judge.pass1_models.len(),
        config.judge.pass2_models.len()
    );

    let metrics_handle = init_metrics()?;

    // Wire the pipeline. The stores here are the in-memory implementations;
    // a persistent deployment swaps them behind the same traits.
    let api_key = config.judge.api_key.clone().unwrap_or_else(|| {
        warn!("no judge API key configured; model calls will be rejected upstream");
        String::new()
    });
    let client = Arc::new(HttpCompletionClient::new(
        config.judge.endpoint.clone(),
        api_key,
    ));
    let judge = ModelJudge::new(config.judge.to_judge_config(), client);

    let session_store = Arc::new(MemorySessionStore::new());
    let sessions = Arc::new(SessionTracker::new(session_store, config.store_timeout()));

    let reputation_store = Arc::new(MemoryReputationStore::new());
    let reputation = Arc::new(ReputationEngine::new(
        reputation_store.clone(),
        config.store_timeout(),
    ));
    let admin = Arc::new(AdminOps::new(reputation_store));

    let orchestrator = Arc::new(Orchestrator::new(judge, sessions.clone(), reputation)?);

    // Out-of-band expiry sweep; deliberately not on the request path
    let sweeper = orchestrator.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep_sessions().await {
                warn!("session sweep failed: {}", e);
            }
        }
    });

    let state = AppState {
        orchestrator,
        admin,
        sessions,
        profiles: Arc::new(StaticProfileResolver::new(CallerProfile::default())),
        metrics_handle: Some(metrics_handle),
    };

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Shutdown signal received, stopping server...");
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("promptgate=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("promptgate=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "promptgate_requests_total",
        "Total number of validation requests received"
    );
    metrics::describe_counter!(
        "promptgate_verdicts_total",
        "Verdicts issued, by stage and outcome"
    );
    metrics::describe_histogram!(
        "promptgate_pipeline_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end pipeline latency in microseconds"
    );
    metrics::describe_histogram!(
        "promptgate_judge_cost_usd",
        "Judge spend per request in USD"
    );
    metrics::describe_counter!("promptgate_errors_total", "Degraded sub-checks by kind");

    info!("Metrics exporter initialized");
    Ok(handle)
}
