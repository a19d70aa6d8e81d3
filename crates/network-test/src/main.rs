//! Private-Space Network Test Binary
//!
//! Runs one fleet node: heartbeat, scheduled reachability checks, and the
//! HTTP endpoints peers probe and operators read the report from.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use ps_network_test::{
    Args, FleetNode, HttpProbe, MemoryRegistry, RedisRegistry, Registry, Settings, logging,
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_json)?;

    let settings = Settings::from_args(&args, std::env::var("DYNO").ok())
        .context("invalid configuration")?;

    let registry: Arc<dyn Registry> = if args.memory_registry {
        info!("Using in-process registry");
        Arc::new(MemoryRegistry::new())
    } else {
        let url = args
            .redis_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .context("REDIS_URL not found")?;
        Arc::new(
            RedisRegistry::connect(url)
                .await
                .context("unable to connect to registry")?,
        )
    };

    let probe = Arc::new(HttpProbe::new().context("unable to build HTTP client")?);
    let node = FleetNode::new(settings.clone(), registry, probe);
    info!(node = node.node_id(), "Starting node");

    let heartbeat = node.start_heartbeat();
    let prober = node.start_prober();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listeners = Vec::new();

    let public_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port);
    listeners.push(tokio::spawn(server::serve(
        public_addr,
        node.router(),
        shutdown_rx.clone(),
    )));

    if let Some(private_ip) = settings.private_ip {
        let private_addr = SocketAddr::new(private_ip, settings.private_port);
        listeners.push(tokio::spawn(server::serve(
            private_addr,
            node.router(),
            shutdown_rx.clone(),
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    prober.stop().await;
    heartbeat.stop().await;
    for listener in listeners {
        match listener.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP listener failed"),
            Err(e) => error!(error = %e, "HTTP listener panicked"),
        }
    }

    Ok(())
}
