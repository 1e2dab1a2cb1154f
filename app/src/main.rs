mod bridge;
mod config;
mod error;
mod logging;
mod models;
mod mqtt;
mod rest;

use crate::bridge::{BridgeDispatcher, ClientRegistry};
use crate::error::StartupError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use zonelink_core::{TopicRouter, ZoneClock};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    if let Err(e) = run().await {
        error!("Startup failed: {}", e);
        logging::shutdown();
        std::process::exit(1);
    }
    logging::shutdown();
}

async fn run() -> Result<(), StartupError> {
    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info", false);
            return Err(e.into());
        }
    };
    logging::init(&config.log_filter, config.trace_stdout);
    info!(
        "Starting zonelink {} (core {})",
        env!("CARGO_PKG_VERSION"),
        zonelink_core::CORE_VERSION
    );

    let stores = models::connect(&config).await?;
    let bindings = stores.catalog.bindings(config.zone_group).await?;
    let router = TopicRouter::new(&config.zone, bindings);
    info!(zone = router.zone(), "Routing topics {:?}", router.subscriptions());

    let shutdown_rx = register_sigint_handler()?;
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (publisher, mqtt_loop) = mqtt::start(
        &config.mqtt,
        router.subscriptions(),
        inbound_tx.clone(),
        shutdown_rx.clone(),
    );
    let publisher = Arc::new(publisher);

    let clients = ClientRegistry::new(config.client_buffer);
    let dispatcher = BridgeDispatcher::new(
        router,
        ZoneClock::new(config.zone_utc_offset_secs),
        stores.measurements.clone(),
        stores.states.clone(),
        publisher.clone(),
        clients.clone(),
    )
    .with_store_timeout(config.db_timeout);
    let dispatch_loop = tokio::spawn(dispatcher.run(inbound_rx));

    let ctx = rest::ServerContext {
        inbound: inbound_tx,
        clients,
        publisher,
        probe: stores.probe.clone(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let served = rest::dispatch_server(addr, ctx, shutdown_rx).await;
    if served.is_err() {
        mqtt_loop.abort();
    }

    match mqtt_loop.await {
        Err(e) if e.is_panic() => error!("MQTT loop panicked: {}", e),
        _ => {}
    }
    // open sessions may still hold the queue
    if tokio::time::timeout(DRAIN_TIMEOUT, dispatch_loop).await.is_err() {
        warn!("Dispatcher did not drain in {:?}", DRAIN_TIMEOUT);
    }
    served?;
    info!("Shutdown complete");
    Ok(())
}

/// The first Ctrl-C shuts down gracefully, the second one exits
fn register_sigint_handler() -> Result<watch::Receiver<bool>, StartupError> {
    let (tx, rx) = watch::channel(false);
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("Forced exit");
            std::process::exit(130);
        }
        info!("Received Ctrl-C, shutting down");
        let _ = tx.send(true);
    })?;
    Ok(rx)
}
