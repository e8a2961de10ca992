//! # parley
//!
//! Chat relay binary: loads configuration, builds the Gemini gateway and
//! starts the WebSocket server.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use parley_core::gateway::ModelGateway;
use parley_llm::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use parley_llm::{run_self_check, GeminiConfig, GeminiGateway, ReliableConfig, ReliableGateway};
use parley_server::ServerConfig;
use parley_telemetry::{LogFormat, TelemetryConfig};

/// Real-time chat relay to Gemini.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time chat relay to Gemini")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PORT", default_value = "4020")]
    port: u16,

    /// Browser origin allowed to connect.
    #[arg(long, env = "ALLOWED_ORIGIN", default_value = "http://localhost:3000")]
    allowed_origin: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    gemini_model: String,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    gemini_base_url: String,

    /// Turns kept per conversation.
    #[arg(long, env = "HISTORY_LIMIT", default_value = "24")]
    history_limit: usize,

    /// Upper bound on one generation, retries included.
    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value = "60")]
    generation_timeout_secs: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// `json` or `pretty`.
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Skip the startup generation check.
    #[arg(long)]
    no_self_check: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            allowed_origin: self.allowed_origin.clone(),
            history_limit: self.history_limit,
            generation_timeout_secs: self.generation_timeout_secs,
            ..Default::default()
        }
    }

    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            module_levels: vec![("tower_http".into(), Level::WARN)],
            format: self.log_format,
        }
    }

    fn gemini_config(&self) -> GeminiConfig {
        let api_key = self.gemini_api_key.clone().unwrap_or_default();
        GeminiConfig::new(SecretString::from(api_key))
            .with_model(self.gemini_model.clone())
            .with_base_url(self.gemini_base_url.clone())
    }
}

/// Retries stay well inside the generation timeout.
fn reliable_config(generation_timeout: Duration) -> ReliableConfig {
    let defaults = ReliableConfig::default();
    ReliableConfig {
        max_delay: defaults.max_delay.min(generation_timeout / 4),
        ..defaults
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    parley_telemetry::init_telemetry(&cli.telemetry_config());

    if cli.gemini_api_key.as_deref().map_or(true, str::is_empty) {
        tracing::warn!("GEMINI_API_KEY is not set; every generation will fail");
    }

    let config = cli.server_config();
    config.validate().context("invalid server configuration")?;

    let gemini = GeminiGateway::new(cli.gemini_config()).context("failed to build HTTP client")?;
    let gateway: Arc<dyn ModelGateway> = Arc::new(ReliableGateway::new(
        gemini,
        reliable_config(config.generation_timeout()),
    ));

    if !cli.no_self_check {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            run_self_check(gateway.as_ref()).await;
        });
    }

    let handle = parley_server::start(config, gateway)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port(), "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
