use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::player_connections::{ConnectionRegistry, DeliveryCursor, OutboundFrame};
use crate::sync_server::SyncServer;

/// Drive one live-channel connection until the client leaves or the server
/// shuts down.
///
/// Inbound messages are handled one at a time, so updates from a single
/// client are applied in the order they were sent. Outbound frames go through
/// a separate writer task bounded by the registry's send timeout.
pub async fn handle_websocket(
    socket: WebSocket,
    sync: Arc<SyncServer>,
    cancellation_token: CancellationToken,
) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = ConnectionRegistry::channel();
    let write_deadline = sync.registry().send_timeout();

    let mut forward_task = tokio::spawn(forward_frames(
        ws_sink,
        rx,
        write_deadline,
        cancellation_token.clone(),
    ));

    let id = sync.connect(tx).await;
    info!("WebSocket connection {} established", id);

    let mut writer_finished = false;
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!("Closing connection {} for shutdown", id);
                break;
            }
            _ = &mut forward_task => {
                writer_finished = true;
                debug!("Writer for connection {} stopped", id);
                break;
            }
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = sync.handle_text(id, &text).await {
                        debug!("Message from {} not applied: {}", id, e);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client {} closed the connection", id);
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame from {}", id);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error on {}: {}", id, e);
                    break;
                }
            },
        }
    }

    sync.disconnect(id).await;

    // Unregistering drops the last sender, which lets the writer drain and close.
    if !writer_finished && timeout(write_deadline, &mut forward_task).await.is_err() {
        forward_task.abort();
    }
    info!("WebSocket connection {} closed", id);
}

async fn forward_frames(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    write_deadline: Duration,
    cancellation_token: CancellationToken,
) {
    let mut cursor = DeliveryCursor::default();

    loop {
        let frame = tokio::select! {
            _ = cancellation_token.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                }));
                let _ = timeout(write_deadline, ws_sink.send(close)).await;
                return;
            }
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if !cursor.admit(&frame) {
            trace!("Skipping stale leaderboard frame");
            continue;
        }

        match timeout(write_deadline, ws_sink.send(Message::Text(frame.payload().to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Failed to send message to WebSocket: {}", e);
                return;
            }
            Err(_) => {
                warn!("WebSocket write deadline exceeded, dropping client");
                return;
            }
        }
    }

    let _ = ws_sink.close().await;
}
