use anyhow::{Context, Result};
use clap::Parser;
use kairos::aggregator::SessionAggregator;
use kairos::ai::AiTextService;
use kairos::config::{self, Config};
use kairos::engine::CycleEngine;
use kairos::ipc::IpcServer;
use kairos::notify::{DesktopNotifier, LogNotifier, Notifier, Offloaded};
use kairos::runtime::Runtime;
use kairos::settings::SettingsStore;
use kairos::store::JsonFileStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kairos")]
#[command(about = "Focus timer daemon", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, env = "KAIROS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the IPC socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = build_runtime(&config)?;
    let server = IpcServer::bind(&config.socket_path)?;
    let handle = runtime.handle();

    info!("kairos started");
    tokio::select! {
        _ = runtime.run() => {
            error!("Runtime stopped unexpectedly");
        }
        result = server.serve(handle) => {
            if let Err(e) = result {
                error!("IPC server failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

fn build_runtime(config: &Config) -> Result<Runtime> {
    let data_dir = config
        .data_dir()
        .context("Could not determine data directory")?;
    info!(path = %data_dir.display(), "Using data directory");

    let settings = SettingsStore::load(Box::new(JsonFileStore::new(&data_dir)));
    let sessions = SessionAggregator::load(
        Box::new(JsonFileStore::new(&data_dir)),
        config.sessions.clone(),
        config.export_dir(),
    );
    let engine = CycleEngine::new(settings.current(), config.engine.clone());
    let ai = AiTextService::from_config(&config.ai);

    let notifier: Arc<dyn Notifier> = if config.notifications {
        Arc::new(Offloaded::new(DesktopNotifier))
    } else {
        Arc::new(LogNotifier)
    };

    Ok(Runtime::new(engine, sessions, settings, ai, notifier))
}
