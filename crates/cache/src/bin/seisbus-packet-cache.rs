//! Packet-cache service daemon.
//!
//! Subscribes to waveform packets on the fan-out broker's backend,
//! feeds them into a capped collection, and serves data/sensor queries
//! behind the RPC broker until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use seisbus_cache::{CappedCollection, Packet, PacketCacheService};
use seisbus_fabric::{Endpoint, MessageFormat, SocketOptions, Subscriber};

#[derive(Parser, Debug)]
#[command(name = "seisbus-packet-cache", about = "seisbus waveform packet cache")]
struct Args {
    /// Fan-out broker backend to subscribe to for waveform packets.
    #[arg(long, env = "SEISBUS_BROADCAST_BACKEND")]
    broadcast: String,

    /// RPC broker backend to serve cache queries on.
    #[arg(long, env = "SEISBUS_RPC_BACKEND")]
    backend: String,

    /// Ring capacity per sensor.
    #[arg(long, default_value_t = 1024)]
    max_packets: usize,
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
    let collection = Arc::new(
        CappedCollection::new(args.max_packets).context("creating packet collection")?,
    );

    // Ingest side: every waveform packet on the broadcast plane lands
    // in the collection.
    let broadcast = Endpoint::parse(&args.broadcast).context("parsing broadcast endpoint")?;
    let subscriber = Subscriber::connect(&broadcast)
        .await
        .context("connecting to broadcast backend")?;
    subscriber.subscribe(Packet::TYPE_TAG).await?;
    let ingest_collection = collection.clone();
    let ingest = tokio::spawn(async move {
        loop {
            match subscriber.recv().await {
                Ok(envelope) => match envelope.unpack::<Packet>() {
                    Ok(packet) => {
                        if let Err(e) = ingest_collection.add_packet(packet) {
                            warn!(error = %e, "rejected packet");
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable packet dropped"),
                },
                Err(e) => {
                    warn!(error = %e, "broadcast receive error");
                }
            }
        }
    });

    // Query side: serve the wire surface behind the RPC broker.
    let backend = Endpoint::parse(&args.backend).context("parsing backend endpoint")?;
    let service = PacketCacheService::start(SocketOptions::new(backend), collection.clone())
        .await
        .context("starting packet cache service")?;
    info!(
        max_packets = args.max_packets,
        "packet cache running - Ctrl+C to stop"
    );

    shutdown_signal().await;
    info!(
        sensors = collection.sensor_names().len(),
        packets = collection.total_packets(),
        "packet cache shutting down"
    );
    service.stop().await;
    ingest.abort();
    let _ = ingest.await;
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
