//! WebSocket bridge: [`EventBus`] video and status lanes → browser.
//!
//! The bridge is one-way. Browser messages are read only to notice a close;
//! controls go over the JSON routes.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{Sink, SinkExt, StreamExt};
use telearm_middleware::{EventBus, Topic};
use telearm_types::Event;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    State(bus): State<Arc<EventBus>>,
    State(shutdown): State<CancellationToken>,
) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, bus, shutdown))
}

async fn bridge(socket: WebSocket, bus: Arc<EventBus>, shutdown: CancellationToken) {
    info!("ws client connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut video_rx = bus.subscribe_to(Topic::Video);
    let mut status_rx = bus.subscribe_to(Topic::RobotStatus);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            result = status_rx.recv() => result,
            result = video_rx.recv() => result,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                debug!(skipped = n, "ws client lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if !forward(&mut ws_tx, &event).await {
            break;
        }
    }

    info!("ws client disconnected");
}

/// Send `event` as a JSON text frame. Returns `false` once the client is gone.
async fn forward<S>(ws_tx: &mut S, event: &Event) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "event serialization error");
            true
        }
    }
}
