//! Gateway configuration
//!
//! Loaded from YAML with CLI overrides. Everything the pipeline needs is
//! carried in explicit structs injected at construction; pipeline code
//! never reads the environment.

use clap::Parser;
use promptgate_judge::{JudgeConfig, ModelSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Command-line interface for the gateway binary
#[derive(Parser, Debug)]
#[command(name = "promptgate-gateway")]
#[command(about = "PromptGate prompt validation gateway", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Listen address
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// API key for the judge model endpoint
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Judge model endpoint override
    #[arg(long)]
    pub judge_endpoint: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Judge model settings
    #[serde(default)]
    pub judge: JudgeSettings,

    /// Deadline for session/reputation store operations
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Interval of the out-of-band session expiry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl GatewayConfig {
    /// Load configuration from file (if present) and apply CLI overrides
    pub fn load(config_path: &str, cli: &Cli) -> anyhow::Result<Self> {
        let mut config: Self = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Some(listen) = &cli.listen {
            config.listen = listen.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(api_key) = &cli.api_key {
            config.judge.api_key = Some(api_key.clone());
        }
        if let Some(endpoint) = &cli.judge_endpoint {
            config.judge.endpoint = endpoint.clone();
        }

        Ok(config)
    }

    /// Store operation deadline
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            judge: JudgeSettings::default(),
            store_timeout_ms: default_store_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Judge model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSettings {
    /// Chat-completions endpoint for all candidate models
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API key for the endpoint
    #[serde(default)]
    pub api_key: Option<String>,

    /// Pass-1 candidates in fallback order
    #[serde(default = "default_pass1_models")]
    pub pass1_models: Vec<ModelSpec>,

    /// Pass-2 candidates in fallback order
    #[serde(default = "default_pass2_models")]
    pub pass2_models: Vec<ModelSpec>,

    /// Per-attempt Pass-1 deadline
    #[serde(default = "default_pass1_timeout_ms")]
    pub pass1_timeout_ms: u64,

    /// Per-attempt Pass-2 deadline
    #[serde(default = "default_pass2_timeout_ms")]
    pub pass2_timeout_ms: u64,
}

impl JudgeSettings {
    /// Build the judge configuration injected into the pipeline
    pub fn to_judge_config(&self) -> JudgeConfig {
        JudgeConfig {
            pass1_models: self.pass1_models.clone(),
            pass2_models: self.pass2_models.clone(),
            pass1_timeout: Duration::from_millis(self.pass1_timeout_ms),
            pass2_timeout: Duration::from_millis(self.pass2_timeout_ms),
            ..JudgeConfig::default()
        }
    }
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            pass1_models: default_pass1_models(),
            pass2_models: default_pass2_models(),
            pass1_timeout_ms: default_pass1_timeout_ms(),
            pass2_timeout_ms: default_pass2_timeout_ms(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_pass1_models() -> Vec<ModelSpec> {
    JudgeConfig::default().pass1_models
}

fn default_pass2_models() -> Vec<ModelSpec> {
    JudgeConfig::default().pass2_models
}

fn default_pass1_timeout_ms() -> u64 {
    2_000
}

fn default_pass2_timeout_ms() -> u64 {
    5_000
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_sweep_interval_secs() -> u64 {
    60
}
