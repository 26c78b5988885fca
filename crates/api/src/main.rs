//! scanue API server binary.
//!
//! Usage:
//!   scanue-api --config config.toml
//!   scanue-api --port 8080
//!   scanue-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `SCANUE_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `OPENAI_API_KEY` - API key for the model backend
//! - `DLPFC_MODEL`, `INTEGRATOR_MODEL`, `<LABEL>_MODEL` - per-agent model overrides

use scanue_agents::build_roster;
use scanue_api::{serve, AppState};
use scanue_coordinator::{CoordinatorConfig, WorkflowEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,scanue_api=debug,scanue_coordinator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: u16 = 8080;
    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1]
                        .parse()
                        .map_err(|e| anyhow::anyhow!("Invalid port number '{}': {}", args[i + 1], e))?;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    bind_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("scanue API Server");
                println!();
                println!("Usage: scanue-api [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port <PORT>        Port to listen on (default: 8080)");
                println!(
                    "  -b, --bind <ADDR>        Bind address (default: 127.0.0.1, env: SCANUE_BIND_ADDR)"
                );
                println!("  -c, --config <FILE>      Path to config.toml file");
                println!("  -h, --help               Show this help message");
                println!();
                println!("Environment variables:");
                println!("  SCANUE_BIND_ADDR         Server bind address (overridden by --bind flag)");
                println!("  OPENAI_API_KEY           API key for the model backend");
                return Ok(());
            }
            other => {
                tracing::warn!(argument = %other, "Ignoring unknown argument");
            }
        }
        i += 1;
    }

    // CLI flag > env var > default 127.0.0.1
    let host = bind_addr
        .or_else(|| std::env::var("SCANUE_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0 exposes the API to all network interfaces. \
             The API has no authentication of its own; put it behind a firewall or proxy."
        );
    }

    let config = if let Some(path) = config_path {
        tracing::info!(path = %path, "Loading configuration");
        CoordinatorConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        CoordinatorConfig::default()
    };

    let agents = build_roster(&config.agents, &config.engine.specialists)?;
    let store = config.store.build().await?;
    tracing::info!(backend = ?config.store.backend, "Checkpoint store ready");

    let engine = Arc::new(WorkflowEngine::from_config(&config, agents, store));

    let recovery = engine.recover().await?;
    for run_id in &recovery.interrupted {
        let engine = engine.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.continue_run(&run_id).await {
                tracing::error!(run_id = %run_id, error = %e, "Failed to continue interrupted run");
            }
        });
    }

    let _sweeper =
        engine.spawn_expiry_sweeper(Duration::from_millis(config.engine.sweep_interval_ms));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    serve(Arc::new(AppState::new(engine)), addr).await?;

    Ok(())
}
