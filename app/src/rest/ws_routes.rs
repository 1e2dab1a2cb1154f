use super::ServerContext;
use crate::bridge::BridgeMessage;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

pub fn routes(
    ctx: &ServerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    push_channel(ctx.clone())
}

/// GET /ws
///
/// Push channel of the dashboard.
///
/// Every frame is a JSON `{"event", "data"}` envelope. A new client first
/// receives the current states and the retained chart history.
fn push_channel(
    ctx: ServerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::any()
        .map(move || ctx.clone())
        .and(warp::path!("ws"))
        .and(warp::ws())
        .map(|ctx: ServerContext, ws: warp::ws::Ws| {
            ws.on_upgrade(move |socket| session(socket, ctx))
        })
        .boxed()
}

async fn session(socket: WebSocket, ctx: ServerContext) {
    let (client, sender, mut outbound) = ctx.clients.channel();
    if ctx
        .inbound
        .send(BridgeMessage::ClientConnected { client, sender })
        .is_err()
    {
        warn!("Dispatcher is gone, rejecting client");
        return;
    }
    debug!(client = %client, "Session started");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let send_handle = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client = %client, "Receive failed: {}", e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        let text = match msg.to_str() {
            Ok(text) => text,
            // ping, pong and binary frames
            Err(_) => continue,
        };
        let frame = BridgeMessage::ClientFrame {
            client,
            text: text.to_owned(),
        };
        if ctx.inbound.send(frame).is_err() {
            break;
        }
    }

    send_handle.abort();
    let _ = ctx.inbound.send(BridgeMessage::ClientDisconnected(client));
    debug!(client = %client, "Session ended");
}
