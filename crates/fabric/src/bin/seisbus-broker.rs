//! seisbus broker daemon.
//!
//! Starts the brokers configured in `seisbus.toml` and runs until
//! SIGINT/SIGTERM. Exits 0 on clean shutdown and non-zero when
//! initialization fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use seisbus_fabric::{
    AuthenticatorService, BroadcastBroker, CommandBroker, Grasslands, RpcBroker, SeisbusConfig,
};

#[derive(Parser, Debug)]
#[command(name = "seisbus-broker", about = "seisbus messaging broker daemon")]
struct Args {
    /// Path to the broker configuration file.
    #[arg(short, long, env = "SEISBUS_CONFIG")]
    config: Option<PathBuf>,

    /// IPC root directory used when no config file is given.
    #[arg(long, default_value = "/tmp/seisbus")]
    ipc_root: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SeisbusConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SeisbusConfig::local(&args.ipc_root),
    };

    let mut tasks = Vec::new();

    if let Some(broadcast_config) = config.broadcast_config()? {
        let auth = Arc::new(AuthenticatorService::new(Arc::new(Grasslands)));
        let broker =
            Arc::new(BroadcastBroker::new(broadcast_config)?.with_authenticator(auth));
        let control = broker.control();
        tasks.push(tokio::spawn({
            let broker = broker.clone();
            async move {
                if let Err(e) = broker.run().await {
                    error!(error = %e, "broadcast broker failed");
                }
            }
        }));
        tasks.push(tokio::spawn(async move {
            shutdown_signal().await;
            control.terminate();
        }));
        info!("broadcast broker configured");
    }

    if let Some(rpc_config) = config.rpc_config()? {
        let auth = Arc::new(AuthenticatorService::new(Arc::new(Grasslands)));
        let broker = Arc::new(RpcBroker::new(rpc_config)?.with_authenticator(auth));
        tasks.push(tokio::spawn({
            let broker = broker.clone();
            async move {
                if let Err(e) = broker.run().await {
                    error!(error = %e, "rpc broker failed");
                }
            }
        }));
        tasks.push(tokio::spawn({
            let broker = broker.clone();
            async move {
                shutdown_signal().await;
                broker.stop();
            }
        }));
        info!("rpc broker configured");
    }

    if let Some(command_config) = config.command_config()? {
        let auth = Arc::new(AuthenticatorService::new(Arc::new(Grasslands)));
        let broker = Arc::new(CommandBroker::new(command_config)?.with_authenticator(auth));
        tasks.push(tokio::spawn({
            let broker = broker.clone();
            async move {
                if let Err(e) = broker.run().await {
                    error!(error = %e, "command broker failed");
                }
            }
        }));
        tasks.push(tokio::spawn({
            let broker = broker.clone();
            async move {
                shutdown_signal().await;
                broker.stop();
            }
        }));
        info!("command broker configured");
    }

    if tasks.is_empty() {
        anyhow::bail!("no broker sections configured");
    }

    info!("seisbus broker daemon running - Ctrl+C to stop");
    for task in tasks {
        let _ = task.await;
    }
    info!("seisbus broker daemon stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
