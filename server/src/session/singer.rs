use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{scheduler, QueueEntry, Session};
use crate::ws::protocol::{optional_video_id, payload, ProtocolError};
use crate::ws::{Connection, ConnectionId, Member, RoleHandler};

/// A singer connection plus the state its client has announced.
pub struct Singer {
    connection: Connection,
    name: Mutex<String>,
    queue_length: Mutex<u32>,
    /// Logical time of the last selection, seeded with the connect time.
    last_up: AtomicU64,
    connected_at: chrono::DateTime<chrono::Utc>,
}

impl Singer {
    pub fn new(connection: Connection, connected_tick: u64) -> Self {
        Self {
            connection,
            name: Mutex::new(String::new()),
            queue_length: Mutex::new(0),
            last_up: AtomicU64::new(connected_tick),
            connected_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name;
    }

    pub fn queue_length(&self) -> u32 {
        *self.queue_length.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_queue_length(&self, queue_length: u32) {
        *self.queue_length.lock().unwrap_or_else(PoisonError::into_inner) = queue_length;
    }

    pub fn last_up(&self) -> u64 {
        self.last_up.load(Ordering::Acquire)
    }

    /// Move this singer to the back of the rotation.
    pub fn mark_up(&self, tick: u64) {
        self.last_up.store(tick, Ordering::Release);
    }

    pub fn connected_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.connected_at
    }

    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            name: self.name(),
            queue_length: self.queue_length(),
        }
    }

    /// Ask the client for the head of its queue without popping it.
    ///
    /// `None` covers an empty queue, no reply, and a dropped connection.
    pub async fn next_video(&self) -> Option<String> {
        let reply = self
            .connection
            .send_with_reply("getNextVideo", &Value::Null)
            .await?;
        optional_video_id(&reply)
    }
}

impl Member for Singer {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Messages a singer client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum SingerMessage {
    SetName(String),
    SetQueueLength(u32),
}

impl SingerMessage {
    pub fn decode(name: &str, data: Value) -> Result<Self, ProtocolError> {
        match name {
            "setName" => Ok(Self::SetName(payload(name, data)?)),
            "setQueueLength" => Ok(Self::SetQueueLength(payload(name, data)?)),
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }
}

pub struct SingerHandler {
    session: Arc<Session>,
    singer: Arc<Singer>,
}

impl SingerHandler {
    pub fn new(session: Arc<Session>, singer: Arc<Singer>) -> Self {
        Self { session, singer }
    }

    pub fn singer(&self) -> &Arc<Singer> {
        &self.singer
    }
}

impl RoleHandler for SingerHandler {
    fn connection(&self) -> &Connection {
        &self.singer.connection
    }

    fn on_event(&self, name: &str, data: Value) -> Result<(), ProtocolError> {
        match SingerMessage::decode(name, data)? {
            SingerMessage::SetName(name) => {
                tracing::info!(connection_id = %self.singer.id(), name = %name, "Singer named");
                self.singer.set_name(name);
                self.session.broadcast_queue();
            }
            SingerMessage::SetQueueLength(queue_length) => {
                tracing::debug!(
                    connection_id = %self.singer.id(),
                    queue_length = queue_length,
                    "Singer queue length updated"
                );
                self.singer.set_queue_length(queue_length);
                self.session.broadcast_queue();
                // the new queue may have something to play
                scheduler::spawn_try_play_next(self.session.clone());
            }
        }
        Ok(())
    }

    fn on_disconnect(&self) {
        self.session.singers().unregister(self.singer.id());
        tracing::info!(
            connection_id = %self.singer.id(),
            name = %self.singer.name(),
            "Singer left"
        );
        self.session.broadcast_queue();
        scheduler::spawn_try_play_next(self.session.clone());
    }
}
