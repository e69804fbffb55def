//! switch-notice: WhatsApp auto-responder
//!
//! Usage:
//!   switch-notice                   - Run with ./switch-notice.toml or environment
//!   switch-notice --config <path>   - Run with the given config file
//!   switch-notice --help            - Show help

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sn_core::{BotConfig, Lifecycle};
use sn_whatsapp::BridgeGateway;
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// Run the responder
    Run { config: Option<PathBuf> },
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // messages older than this are never answered
    let start_time = Utc::now();

    let mode = match parse_args(std::env::args().skip(1)) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Try 'switch-notice --help'");
            std::process::exit(2);
        }
    };

    let config_path = match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("switch-notice {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Run { config } => config,
    };

    // Load .env file first so RUST_LOG from it applies
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    if let Err(e) = run(config_path, start_time).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config_path: Option<PathBuf>, start_time: chrono::DateTime<Utc>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => BotConfig::from_toml_file(&path),
        None => BotConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting switch-notice...");
    tracing::info!("Data directory: {}", config.storage.data_dir.display());
    tracing::info!("Bridge: {} (instance {})", config.bridge.base_url, config.bridge.instance);

    let (gateway, events) = BridgeGateway::new(&config.bridge, &config.connection)
        .map_err(|e| anyhow::anyhow!("Failed to create WhatsApp gateway: {}", e))?;

    let mut lifecycle = Lifecycle::new(Arc::new(gateway), events, config, start_time);
    lifecycle.run(shutdown_signal()).await?;

    tracing::info!("switch-notice stopped");
    Ok(())
}

/// Log filter from `RUST_LOG`, `info` when unset or invalid
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Parse command line arguments
fn parse_args<I>(args: I) -> Result<RunMode, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| format!("{} requires a path", arg))?;
                config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(RunMode::Run { config })
}

/// Print help message
fn print_help() {
    println!("switch-notice - tell WhatsApp contacts you have moved to Signal");
    println!();
    println!("Usage:");
    println!("  switch-notice                    Run with ./switch-notice.toml or environment");
    println!("  switch-notice --config <path>    Run with the given config file");
    println!("  switch-notice --help             Show this help message");
    println!("  switch-notice --version          Show version");
    println!();
    println!("Environment Variables:");
    println!("  SN_DATA_DIR              Data directory (default: appdata)");
    println!("  SN_REPLY_TEXT            Reply text file");
    println!("  SN_GROUP_MARKER          Group conversation markers, comma separated (default: -,@g.us)");
    println!("  SN_STATUS_MARKER         Status channel marker (default: status)");
    println!("  SN_CONNECT_TIMEOUT_SECS  Connect timeout (default: 5)");
    println!("  SN_RECONNECT_DELAY_SECS  Delay before restoring a dropped link (default: 30)");
    println!("  SN_LOGIN_TIMEOUT_SECS    Pairing timeout (default: 120)");
    println!("  SN_RESTORE_TIMEOUT_SECS  Wait for a restored link to open (default: 60)");
    println!("  BRIDGE_BASE_URL          WhatsApp bridge URL (default: http://localhost:8080)");
    println!("  BRIDGE_API_KEY           Bridge global API key (required for first login)");
    println!("  BRIDGE_INSTANCE          Bridge instance name (default: switch-notice)");
    println!("  WEBHOOK_LISTEN           Webhook listen address (default: 0.0.0.0:8088)");
    println!("  WEBHOOK_URL              URL the bridge posts events to");
    println!("  RUST_LOG                 Log filter");
}

/// Resolve on SIGINT, SIGTERM or SIGQUIT
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut int, mut term, mut quit) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(int), Ok(term), Ok(quit)) => (int, term, quit),
        _ => {
            tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let name = tokio::select! {
        _ = int.recv() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    tracing::info!("Received {}, shutting down", name);
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl+C, shutting down");
}
