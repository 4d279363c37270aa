//! Rust client for the session protocol.
//!
//! Runs the same [`Connection`] and frame dispatch as the server, over
//! `tokio-tungstenite`. [`SingerClient`] keeps a personal video queue;
//! [`ScreenClient`] follows the rotation and the now-playing video.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::session::QueueEntry;
use crate::ws::dispatch::{dispatch_text, RoleHandler};
use crate::ws::protocol::{optional_video_id, payload, Frame, ProtocolError};
use crate::ws::{Connection, ConnectionId, Role};

/// Error type for client connection setup.
#[derive(Debug)]
pub enum ClientError {
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "Failed to connect: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect(e) => Some(e.as_ref()),
        }
    }
}

/// A live client connection driving a role handler.
pub struct ClientLink<H: RoleHandler> {
    handler: Arc<H>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl<H: RoleHandler> ClientLink<H> {
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Send a close frame, stop both tasks and run the disconnect hook.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.writer).await;
        self.reader.abort();
        if self.handler.connection().disconnect() {
            self.handler.on_disconnect();
        }
    }
}

impl<H: RoleHandler> Drop for ClientLink<H> {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Open `<base_url>/ws/<role>` and drive `make_handler`'s handler over it.
///
/// `base_url` is the server root, e.g. `ws://127.0.0.1:8080`.
pub async fn connect<H, F>(
    base_url: &str,
    role: Role,
    reply_timeout: Option<Duration>,
    make_handler: F,
) -> Result<ClientLink<H>, ClientError>
where
    H: RoleHandler,
    F: FnOnce(Connection) -> H,
{
    let url = format!("{}{}", base_url.trim_end_matches('/'), role.namespace());
    let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| ClientError::Connect(Box::new(e)))?;
    let (mut sink, mut source) = stream.split();

    let (tx, mut frames) = mpsc::unbounded_channel::<Frame>();
    let handler = Arc::new(make_handler(Connection::new(
        ConnectionId(0),
        role,
        tx,
        reply_timeout,
    )));

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = frames.recv() => frame,
                _ = &mut shutdown_rx => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                else => break,
            };
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unencodable frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    handler.connection().connect();
    tracing::debug!(role = %role, url = %url, "Client connected");
    handler.on_connect();

    let reader_handler = handler.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => dispatch_text(reader_handler.as_ref(), text.as_str()),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        if reader_handler.connection().disconnect() {
            reader_handler.on_disconnect();
        }
    });

    Ok(ClientLink {
        handler,
        reader,
        writer,
        shutdown: Some(shutdown_tx),
    })
}

/// Singer side: a personal queue of video ids, head first.
pub struct SingerClient {
    connection: Connection,
    name: Mutex<String>,
    queue: watch::Sender<Vec<String>>,
}

impl SingerClient {
    pub fn new(connection: Connection, name: &str) -> Self {
        Self {
            connection,
            name: Mutex::new(name.to_string()),
            queue: watch::Sender::new(Vec::new()),
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name.to_string();
        self.connection.send("setName", name);
    }

    pub fn enqueue(&self, video_id: &str) {
        self.queue.send_modify(|queue| queue.push(video_id.to_string()));
        self.report_queue_length();
    }

    /// Drop every entry for `video_id`. Returns true if anything was removed.
    pub fn remove(&self, video_id: &str) -> bool {
        let changed = self.queue.send_if_modified(|queue| {
            let before = queue.len();
            queue.retain(|queued| queued != video_id);
            queue.len() != before
        });
        if changed {
            self.report_queue_length();
        }
        changed
    }

    pub fn queued(&self) -> Vec<String> {
        self.queue.borrow().clone()
    }

    /// Observe queue changes, including pops triggered by the server.
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.queue.subscribe()
    }

    fn report_queue_length(&self) {
        let length = self.queue.borrow().len() as u32;
        self.connection.send("setQueueLength", &length);
    }
}

impl RoleHandler for SingerClient {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn on_connect(&self) {
        let name = self.name();
        if !name.is_empty() {
            self.connection.send("setName", &name);
            self.report_queue_length();
        }
    }

    fn on_event(&self, name: &str, data: Value) -> Result<(), ProtocolError> {
        match name {
            // the now-playing video leaves the queue of whoever queued it
            "playingVideo" => {
                if let Some(video_id) = optional_video_id(&data) {
                    self.remove(&video_id);
                }
                Ok(())
            }
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }

    fn on_request(&self, name: &str, _data: Value) -> Result<Value, ProtocolError> {
        match name {
            "getNextVideo" => Ok(self
                .queue
                .borrow()
                .first()
                .map(|video_id| Value::String(video_id.clone()))
                .unwrap_or(Value::Null)),
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }
}

/// Screen side: mirrors the rotation and the now-playing video.
pub struct ScreenClient {
    connection: Connection,
    queue: watch::Sender<Vec<QueueEntry>>,
    now_playing: watch::Sender<String>,
}

impl ScreenClient {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            queue: watch::Sender::new(Vec::new()),
            now_playing: watch::Sender::new(String::new()),
        }
    }

    /// Ask the server for the current rotation.
    pub async fn get_queue(&self) -> Vec<QueueEntry> {
        match self.connection.send_with_reply("getQueue", &Value::Null).await {
            Some(reply) => payload("getQueue", reply).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Ask the server which video is playing; empty when none.
    pub async fn current_video_id(&self) -> String {
        self.connection
            .send_with_reply("getCurrentVideoID", &Value::Null)
            .await
            .and_then(|reply| optional_video_id(&reply))
            .unwrap_or_default()
    }

    /// Report the video the player shows; empty means it ended.
    pub fn report_current_video(&self, video_id: &str) {
        self.connection.send("setCurrentVideoID", video_id);
    }

    pub fn video_ended(&self) {
        self.report_current_video("");
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<QueueEntry>> {
        self.queue.subscribe()
    }

    pub fn subscribe_now_playing(&self) -> watch::Receiver<String> {
        self.now_playing.subscribe()
    }
}

impl RoleHandler for ScreenClient {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn on_event(&self, name: &str, data: Value) -> Result<(), ProtocolError> {
        match name {
            "queue" => {
                self.queue.send_replace(payload(name, data)?);
                Ok(())
            }
            "playVideo" => {
                if let Some(video_id) = optional_video_id(&data) {
                    self.now_playing.send_replace(video_id);
                }
                Ok(())
            }
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn singer() -> (SingerClient, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(ConnectionId(0), Role::Singer, tx, None);
        connection.connect();
        (SingerClient::new(connection, "Ann"), rx)
    }

    #[test]
    fn test_get_next_video_peeks_without_popping() {
        let (client, _rx) = singer();
        assert_eq!(client.on_request("getNextVideo", Value::Null).unwrap(), Value::Null);

        client.enqueue("abc");
        client.enqueue("def");
        assert_eq!(client.on_request("getNextVideo", Value::Null).unwrap(), json!("abc"));
        assert_eq!(client.queued(), vec!["abc", "def"]);
    }

    #[test]
    fn test_playing_video_pops_and_reports() {
        let (client, mut rx) = singer();
        client.enqueue("abc");
        client.enqueue("def");
        while rx.try_recv().is_ok() {}

        client.on_event("playingVideo", json!("abc")).unwrap();
        assert_eq!(client.queued(), vec!["def"]);
        assert_eq!(rx.try_recv().unwrap(), Frame::event("setQueueLength", json!(1)));

        // someone else's video: nothing to pop, nothing to report
        client.on_event("playingVideo", json!("zzz")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_on_connect_announces_name_and_length() {
        let (client, mut rx) = singer();
        client.on_connect();
        assert_eq!(rx.try_recv().unwrap(), Frame::event("setName", json!("Ann")));
        assert_eq!(rx.try_recv().unwrap(), Frame::event("setQueueLength", json!(0)));
    }

    #[test]
    fn test_screen_client_tracks_broadcasts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ScreenClient::new(Connection::new(ConnectionId(0), Role::Screen, tx, None));
        let now_playing = client.subscribe_now_playing();
        let queue = client.subscribe_queue();

        client.on_event("playVideo", json!("abc")).unwrap();
        client
            .on_event("queue", json!([{"name": "Ann", "queueLength": 2}]))
            .unwrap();

        assert_eq!(*now_playing.borrow(), "abc");
        assert_eq!(
            *queue.borrow(),
            vec![QueueEntry {
                name: "Ann".to_string(),
                queue_length: 2
            }]
        );
        assert!(client.on_event("getQueue", Value::Null).is_err());
    }
}
