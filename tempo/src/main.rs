use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tempo::config::{self, Config};
use tempo::effects::{EffectBus, FocusPolicy};
use tempo::ipc::server;
use tempo::observers;
use tempo::persistence::Persistence;
use tempo::{Authority, AuthorityOptions};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EFFECT_BUS_CAPACITY: usize = 32;

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Countdown authority for tempoctl and friends", long_about = None)]
struct Args {
    /// Config file (defaults to tempo.toml in the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the socket path from the config
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_from(path)?,
        None => config::load_config()?,
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("tempo={}", config.log_level))),
        )
        .init();

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let state_path = match &config.state_path {
        Some(path) => path.clone(),
        None => Persistence::default_path()?,
    };

    let recovered = Persistence::recover(&state_path);
    let (store, writer) = Persistence::open(state_path.clone())?;
    info!("Persisting timer state to {}", state_path.display());

    let bus = EffectBus::new(EFFECT_BUS_CAPACITY);
    let observers = observers::spawn_all(&config, &bus);

    let options = AuthorityOptions {
        policy: FocusPolicy::new(config.focus.subjects.clone()),
        resume_on_restart: config.resume_on_restart,
    };
    let (authority, authority_task) = Authority::spawn(options, store, bus, recovered);

    server::serve(&config.socket_path, authority.clone(), shutdown_signal()).await?;

    if let Err(e) = authority.shutdown().await {
        warn!("Authority already stopped: {}", e);
    }
    authority_task.await?;
    // Store and bus went down with the authority: the writer drains and the
    // observers see the bus close.
    writer.await?;
    for observer in observers {
        let _ = observer.await;
    }

    info!("tempo shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
