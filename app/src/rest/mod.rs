use crate::bridge::{BridgeMessage, ClientRegistry};
use crate::models::StoreProbe;
use crate::mqtt::CommandPublisher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{error, info};
use warp::Filter;

mod metric_routes;
mod ws_routes;


/// Shared handles of every route
#[derive(Clone)]
pub struct ServerContext {
    pub inbound: UnboundedSender<BridgeMessage>,
    pub clients: ClientRegistry,
    pub publisher: Arc<dyn CommandPublisher>,
    pub probe: Arc<dyn StoreProbe>,
}

pub fn routes(
    ctx: &ServerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    ws_routes::routes(ctx)
        .or(metric_routes::routes(ctx))
        .with(warp::trace::request())
}

/// Serves until `shutdown` flips, open sessions are not awaited
pub async fn dispatch_server(
    addr: SocketAddr,
    ctx: ServerContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), warp::Error> {
    let (bound, server) = warp::serve(routes(&ctx)).try_bind_with_graceful_shutdown(
        addr,
        async move {
            if shutdown.changed().await.is_err() {
                error!("Shutdown channel closed");
            }
        },
    )?;

    info!("Starting webserver at: {}", bound);
    server.await;
    info!("Webserver stopped");
    Ok(())
}
