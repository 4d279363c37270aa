//! Karaoke session coordination.
//!
//! One [`Session`] is built at process start and shared by every connection.
//! It owns the per-role registries, the single "now playing" slot and the
//! logical clock that orders singers for the round-robin rotation.

pub mod scheduler;
pub mod screen;
pub mod singer;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::ws::{Connection, ConnectionId, Frame, Registry, Role};

pub use screen::ScreenHandler;
pub use singer::{Singer, SingerHandler};

/// One row of the combined singer ordering shown on the screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub name: String,
    pub queue_length: u32,
}

/// Read-only view used by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub current_video_id: String,
    pub singers: Vec<SingerStatus>,
    pub screens: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingerStatus {
    pub name: String,
    pub queue_length: u32,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

pub struct Session {
    singers: Registry<Singer>,
    screens: Registry<Connection>,
    /// Empty means nothing is playing.
    current_video_id: Mutex<String>,
    /// Held for the whole scheduler walk so runs never overlap.
    scheduling: tokio::sync::Mutex<()>,
    clock: AtomicU64,
    next_connection_id: AtomicU64,
    reply_timeout: Option<Duration>,
}

impl Session {
    /// `reply_timeout` bounds every request the server sends; `None` waits forever.
    pub fn new(reply_timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            singers: Registry::new(Role::Singer),
            screens: Registry::new(Role::Screen),
            current_video_id: Mutex::new(String::new()),
            scheduling: tokio::sync::Mutex::new(()),
            clock: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(1),
            reply_timeout,
        })
    }

    pub fn singers(&self) -> &Registry<Singer> {
        &self.singers
    }

    pub fn screens(&self) -> &Registry<Connection> {
        &self.screens
    }

    /// Next value of the logical clock. Strictly increasing.
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn new_connection(&self, role: Role) -> (Connection, mpsc::UnboundedReceiver<Frame>) {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(id, role, tx, self.reply_timeout), rx)
    }

    /// Create and register a singer. The receiver feeds the transport writer.
    pub fn attach_singer(self: &Arc<Self>) -> (Arc<SingerHandler>, mpsc::UnboundedReceiver<Frame>) {
        let (connection, rx) = self.new_connection(Role::Singer);
        let singer = Arc::new(Singer::new(connection, self.tick()));
        self.singers.register(singer.clone());
        (Arc::new(SingerHandler::new(self.clone(), singer)), rx)
    }

    /// Create and register a screen. The receiver feeds the transport writer.
    pub fn attach_screen(self: &Arc<Self>) -> (Arc<ScreenHandler>, mpsc::UnboundedReceiver<Frame>) {
        let (connection, rx) = self.new_connection(Role::Screen);
        let connection = Arc::new(connection);
        self.screens.register(connection.clone());
        (Arc::new(ScreenHandler::new(self.clone(), connection)), rx)
    }

    pub fn current_video_id(&self) -> String {
        self.current_video_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_video_id(&self, video_id: &str) {
        let mut current = self
            .current_video_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = video_id.to_string();
    }

    /// Set the current video only if none is playing. Returns false when the
    /// slot was already taken.
    pub fn claim_current_video(&self, video_id: &str) -> bool {
        let mut current = self
            .current_video_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !current.is_empty() {
            return false;
        }
        *current = video_id.to_string();
        true
    }

    /// Connected singers in fairness order: least recently played first,
    /// never-played singers by connection order.
    pub fn singer_queue(&self) -> Vec<Arc<Singer>> {
        let mut singers: Vec<(u64, ConnectionId, Arc<Singer>)> = self
            .singers
            .instances()
            .into_iter()
            .map(|singer| (singer.last_up(), singer.id(), singer))
            .collect();
        singers.sort_by_key(|(last_up, id, _)| (*last_up, *id));
        singers.into_iter().map(|(_, _, singer)| singer).collect()
    }

    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.singer_queue()
            .iter()
            .map(|singer| singer.queue_entry())
            .collect()
    }

    /// Push the current singer ordering to every screen.
    pub fn broadcast_queue(&self) {
        self.screens.broadcast("queue", &self.queue_snapshot());
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            current_video_id: self.current_video_id(),
            singers: self
                .singer_queue()
                .iter()
                .map(|singer| {
                    let entry = singer.queue_entry();
                    SingerStatus {
                        name: entry.name,
                        queue_length: entry.queue_length,
                        connected_at: singer.connected_at(),
                    }
                })
                .collect(),
            screens: self.screens.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_only_fills_an_empty_slot() {
        let session = Session::new(None);
        assert!(session.claim_current_video("abc"));
        assert!(!session.claim_current_video("def"));
        assert_eq!(session.current_video_id(), "abc");

        // a screen report in between wins over a late selection
        session.set_current_video_id("x");
        assert!(!session.claim_current_video("abc"));
        assert_eq!(session.current_video_id(), "x");

        session.set_current_video_id("");
        assert!(session.claim_current_video("def"));
    }
}
