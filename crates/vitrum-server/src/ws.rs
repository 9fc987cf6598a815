//! The live channel.
//!
//! Each connected client gets its own bus subscription; emissions are
//! forwarded as JSON text frames in enqueue order. The client may send the
//! literal text `"ping"` and receives `"pong"`; protocol-level pings are
//! answered too. A client whose send fails is dropped.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::AppState;

/// Upgrade a connection to the live channel
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("Live channel client connected");
    let mut rx = state.bus.subscribe();

    loop {
        tokio::select! {
            emission = rx.recv() => {
                match emission {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            debug!("Live channel client dropped (send failed)");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Live channel client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Bus closed, ending live channel");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                        if socket.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Live channel client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Live channel client error");
                        break;
                    }
                }
            }
        }
    }
}
