//! Scorebridge - Rust implementation
//!
//! Mirrors live match state (teams, scores, officials, logos) into vMix title
//! inputs and tracks which overlays are on air.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scorebridge::api::{self, ApiState};
use scorebridge::config::{AppConfig, ConfigStore, ConfigWatcher};
use scorebridge::drivers::{ConsoleDriver, Driver, VmixDriver};
use scorebridge::logos::LogoStore;
use scorebridge::paths::AppPaths;
use scorebridge::sync::{self, SyncEngine};

/// Scorebridge - drive vMix scoreboard graphics from live match data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected app directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Override the control API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Log field pushes instead of talking to vMix
    #[arg(long)]
    dry_run: bool,

    /// Connect, print the inputs vMix reports, and exit
    #[arg(long)]
    list_inputs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = match &args.config {
        Some(config) => AppPaths::for_config(config),
        None => AppPaths::detect(),
    };
    paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting Scorebridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", paths.base_dir().display());
    info!("Configuration file: {}", paths.config.display());

    let config = AppConfig::load(&paths.config).await?;
    let store = ConfigStore::new(config.clone(), Some(paths.config.clone()));

    let driver: Arc<dyn Driver> = if args.dry_run {
        info!("Dry run: field pushes are logged, vMix is not contacted");
        Arc::new(ConsoleDriver::new("dry-run"))
    } else {
        Arc::new(VmixDriver::new(config.sync.request_timeout())?)
    };

    if args.list_inputs {
        return list_inputs(driver, &config).await;
    }

    let logos_dir = config
        .logos
        .dir
        .clone()
        .unwrap_or_else(|| paths.logos_dir.clone());
    let engine = SyncEngine::new(store.clone(), driver, Some(LogoStore::new(logos_dir)));

    run_app(engine, store, config, &paths, args.api_port).await?;

    info!("Scorebridge shutdown complete");
    Ok(())
}

async fn run_app(
    engine: SyncEngine,
    store: ConfigStore,
    config: AppConfig,
    paths: &AppPaths,
    api_port: Option<u16>,
) -> Result<()> {
    if let Some(result) = engine.restore_connection().await {
        match result.error {
            None => info!("✅ vMix connection restored"),
            Some(e) => warn!("⚠️  Could not restore vMix connection: {}", e),
        }
    }
    engine.start_poller();

    if config.api.enabled {
        let port = api_port.unwrap_or(config.api.port);
        let state = ApiState::new(engine.clone());
        tokio::spawn(async move {
            if let Err(e) = api::start_server(state, port).await {
                error!("Control API stopped: {:#}", e);
            }
        });
    }

    let mut config_watcher = ConfigWatcher::new(paths.config.clone(), store)?;
    info!("Configuration loaded with hot-reload enabled");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, applying...");
                engine.on_settings_saved(new_config);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    engine.shutdown().await;
    Ok(())
}

/// Console output plus a daily rolling file under the logs directory
fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "scorebridge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn list_inputs(driver: Arc<dyn Driver>, config: &AppConfig) -> Result<()> {
    use colored::*;

    let inputs = sync::list_inputs_once(driver, config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list vMix inputs: {}", e))?;

    println!(
        "\n{}",
        format!("=== vMix inputs at {}:{} ===", config.vmix.host, config.vmix.port)
            .bold()
            .cyan()
    );
    println!(
        "{:>4}  {:<38}  {:<10}  {}",
        "#".bold(),
        "Key".bold(),
        "Type".bold(),
        "Title".bold()
    );
    for input in &inputs {
        println!(
            "{:>4}  {:<38}  {:<10}  {}",
            input.number.yellow(),
            input.key.dimmed(),
            input.input_type,
            input.title.green()
        );
    }
    println!("\n{} input(s)", inputs.len().to_string().green());

    Ok(())
}
