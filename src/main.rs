#![forbid(unsafe_code)]

//! `agent-bridge` binary.
//!
//! Loads configuration, starts the bridge and serves the JSON-RPC host
//! protocol on stdin/stdout. Logs go to stderr so they never mix with
//! protocol traffic.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::bridge::Bridge;
use agent_bridge::config::BridgeConfig;
use agent_bridge::paths::canonical_dir;
use agent_bridge::rpc::server;
use agent_bridge::{AppError, Result};

/// Capacity of the bridge → host notification channel.
const NOTIFICATION_DEPTH: usize = 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Bridge a coding agent onto a JSON-RPC host", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default working directory for new sessions.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        let canonical = canonical_dir(&ws)
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.default_workspace_root = Some(canonical);
    }
    let config = Arc::new(config);
    info!(executable = %config.agent.executable, "configuration loaded");

    // ── Build the bridge ────────────────────────────────
    let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_DEPTH);
    let bridge = Arc::new(Bridge::new(Arc::clone(&config), notify_tx)?);

    // ── Serve the host protocol ─────────────────────────
    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    let serve_bridge = Arc::clone(&bridge);
    let mut serve_handle = tokio::spawn(async move {
        server::serve(
            serve_bridge,
            notify_rx,
            tokio::io::stdin(),
            tokio::io::stdout(),
            serve_ct,
        )
        .await
    });
    info!("agent-bridge ready");

    // ── Wait for shutdown signal or host disconnect ─────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            if let Err(err) = (&mut serve_handle).await {
                error!(%err, "rpc server task failed");
            }
        }
        joined = &mut serve_handle => match joined {
            Ok(Ok(())) => info!("host disconnected"),
            Ok(Err(err)) => error!(%err, "rpc server failed"),
            Err(err) => error!(%err, "rpc server task failed"),
        },
    }

    bridge.shutdown().await;
    info!("agent-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
