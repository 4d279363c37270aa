//! Transport-agnostic connection handle.
//!
//! A [`Connection`] owns the sending half of a channel drained by the
//! transport's writer task, plus the table of in-flight requests waiting for a
//! reply. The server actor and the client library both drive it, so every
//! role on either side shares the same send / request / reply contract.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::protocol::Frame;
use super::{ConnectionId, Role};

/// Sender half of a connection's outbound frame channel.
pub type ConnectionSender = mpsc::UnboundedSender<Frame>;

/// Connection lifecycle. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected = 0,
    Connected = 1,
    Disconnected = 2,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unconnected,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    role: Role,
    tx: ConnectionSender,
    state: AtomicU8,
    next_request_id: AtomicU64,
    /// request id -> waiter for the reply
    pending: DashMap<u64, oneshot::Sender<Value>>,
    /// `None` waits forever.
    reply_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        role: Role,
        tx: ConnectionSender,
        reply_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            role,
            tx,
            state: AtomicU8::new(LinkState::Unconnected as u8),
            next_request_id: AtomicU64::new(1),
            pending: DashMap::new(),
            reply_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected && !self.tx.is_closed()
    }

    /// `Unconnected -> Connected`. Returns false if the connection was not unconnected.
    pub fn connect(&self) -> bool {
        self.state
            .compare_exchange(
                LinkState::Unconnected as u8,
                LinkState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Disconnected` and drop every reply waiter.
    ///
    /// Returns false when already disconnected, so the caller can skip
    /// duplicate cleanup.
    pub fn disconnect(&self) -> bool {
        let previous = self
            .state
            .swap(LinkState::Disconnected as u8, Ordering::AcqRel);
        // Dropping the oneshot senders resolves their waiters with "no reply".
        self.pending.clear();
        previous != LinkState::Disconnected as u8
    }

    /// Fire-and-forget. Silently dropped when not connected.
    pub fn send<T: Serialize + ?Sized>(&self, name: &str, data: &T) {
        match serde_json::to_value(data) {
            Ok(value) => self.send_value(name, value),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    name = name,
                    error = %e,
                    "Failed to serialize outbound payload"
                );
            }
        }
    }

    /// Like [`send`](Self::send) for a payload that is already a JSON value.
    pub fn send_value(&self, name: &str, data: Value) {
        if !self.is_connected() {
            tracing::trace!(connection_id = %self.id, name = name, "Dropped send, not connected");
            return;
        }
        let _ = self.tx.send(Frame::event(name, data));
    }

    /// Send a request and wait for the remote end to reply.
    ///
    /// Resolves to `None` when the connection is down, disconnects before
    /// answering, or the reply timeout elapses.
    pub async fn send_with_reply<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Option<Value> {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, name = name, error = %e, "Failed to serialize request payload");
                return None;
            }
        };

        if !self.is_connected() {
            return None;
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id, reply_tx);

        // a disconnect racing the insert above would otherwise strand the waiter
        if self.state() != LinkState::Connected
            || self.tx.send(Frame::request(request_id, name, data)).is_err()
        {
            self.pending.remove(&request_id);
            return None;
        }

        let reply = match self.reply_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    tracing::warn!(
                        connection_id = %self.id,
                        role = %self.role,
                        name = name,
                        request_id = request_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Reply timed out"
                    );
                    None
                }
            },
            None => reply_rx.await.ok(),
        };

        self.pending.remove(&request_id);
        reply
    }

    /// Deliver an inbound reply to the matching waiter. Returns false for unknown ids.
    pub fn resolve_reply(&self, request_id: u64, data: Value) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, waiter)) => waiter.send(data).is_ok(),
            None => {
                tracing::debug!(
                    connection_id = %self.id,
                    request_id = request_id,
                    "Reply for unknown or expired request"
                );
                false
            }
        }
    }

    /// Answer a request received from the remote end.
    pub fn reply(&self, request_id: u64, data: Value) {
        if !self.is_connected() {
            return;
        }
        let _ = self.tx.send(Frame::reply(request_id, data));
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn open(timeout: Option<Duration>) -> (Arc<Connection>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(ConnectionId(1), Role::Singer, tx, timeout));
        assert!(conn.connect());
        (conn, rx)
    }

    #[test]
    fn test_send_before_connect_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(ConnectionId(1), Role::Screen, tx, None);
        conn.send("playVideo", "abc");
        assert!(rx.try_recv().is_err());

        conn.connect();
        conn.send("playVideo", "abc");
        assert_eq!(rx.try_recv().unwrap(), Frame::event("playVideo", json!("abc")));
    }

    #[test]
    fn test_lifecycle_is_terminal() {
        let (conn, _rx) = open(None);
        assert_eq!(conn.state(), LinkState::Connected);
        assert!(conn.disconnect());
        assert!(!conn.disconnect());
        assert!(!conn.connect());
        assert_eq!(conn.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_with_reply_resolves() {
        let (conn, mut rx) = open(None);

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.send_with_reply("getNextVideo", &()).await })
        };

        let id = match rx.recv().await.unwrap() {
            Frame::Request { id, name, .. } => {
                assert_eq!(name, "getNextVideo");
                id
            }
            other => panic!("expected request, got {:?}", other),
        };
        assert!(conn.resolve_reply(id, json!("abc")));

        assert_eq!(waiter.await.unwrap(), Some(json!("abc")));
        assert_eq!(conn.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_reply_timeout_resolves_to_none() {
        let (conn, _rx) = open(Some(Duration::from_millis(20)));
        assert_eq!(conn.send_with_reply("getNextVideo", &()).await, None);
        assert_eq!(conn.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_waiters() {
        let (conn, mut rx) = open(None);

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.send_with_reply("getNextVideo", &()).await })
        };
        // wait until the request is on the wire
        assert!(matches!(rx.recv().await, Some(Frame::Request { .. })));

        conn.disconnect();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_request_on_disconnected_connection_is_none() {
        let (conn, _rx) = open(None);
        conn.disconnect();
        assert_eq!(conn.send_with_reply("getNextVideo", &()).await, None);
    }

    #[test]
    fn test_unknown_reply_id_is_ignored() {
        let (conn, _rx) = open(None);
        assert!(!conn.resolve_reply(99, json!("abc")));
    }
}
