use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use super::dispatch::{dispatch_text, RoleHandler};
use super::protocol::Frame;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer gets to flush a queued close frame before it is aborted.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for one upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from the connection's channel
///   and control messages (pong, close) from the ping task and reader
/// - Reader loop: decodes text frames and dispatches them to the role handler
///
/// The handler's connection must already be registered; the actor drives its
/// lifecycle from `connect` through `disconnect`.
pub async fn run_connection<H: RoleHandler>(
    socket: WebSocket,
    handler: Arc<H>,
    frames: mpsc::UnboundedReceiver<Frame>,
) {
    let connection_id = handler.connection().id();
    let role = handler.connection().role();

    let (ws_sender, mut ws_receiver) = socket.split();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    // Spawn writer task: forwards frames and control messages to the WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, frames, control_rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = control_tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %connection_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    let _ = dead_tx.send(());
                    break;
                }
            }
        }
    });

    handler.connection().connect();
    tracing::info!(connection_id = %connection_id, role = %role, "Connection opened");
    handler.on_connect();

    let mut pong_timed_out = false;

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut dead_rx => {
                pong_timed_out = true;
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    dispatch_text(handler.as_ref(), text.as_str());
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        bytes = data.len(),
                        "Ignoring binary message (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    if pong_timed_out {
        // the ping task queued a close frame; let the writer send it
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, &mut writer_handle).await;
    }
    writer_handle.abort();
    ping_handle.abort();

    if handler.connection().disconnect() {
        handler.on_disconnect();
    }

    tracing::info!(connection_id = %connection_id, role = %role, "Connection closed");
}

/// Writer task: receives frames and control messages and forwards them to the WebSocket sink.
/// Stops after sending a close frame.
async fn writer_task<S>(
    mut ws_sender: S,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Message>,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let msg = tokio::select! {
            Some(frame) = frames.recv() => match frame.encode() {
                Ok(text) => Message::Text(text.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unencodable frame");
                    continue;
                }
            },
            Some(msg) = control.recv() => msg,
            else => break,
        };

        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_writer_flushes_close_frame_then_stops() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let sink = futures_util::sink::unfold(out_tx, |out, msg: Message| async move {
            out.send(msg).map_err(|_| ())?;
            Ok::<_, ()>(out)
        });
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_task(Box::pin(sink), frames, control_rx));

        frame_tx.send(Frame::event("queue", json!([]))).unwrap();
        match out_rx.recv().await.unwrap() {
            Message::Text(text) => assert!(text.as_str().contains("\"queue\"")),
            other => panic!("Expected text frame, got {:?}", other),
        }

        control_tx
            .send(Message::Close(Some(CloseFrame {
                code: 1001,
                reason: "Pong timeout".into(),
            })))
            .unwrap();

        // both senders are still alive, so only the close frame ends the writer
        timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should stop after the close frame")
            .unwrap();
        assert!(matches!(out_rx.recv().await, Some(Message::Close(Some(_)))));
        drop((frame_tx, control_tx));
    }
}
