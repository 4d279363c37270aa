use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use super::connection::Connection;
use super::{ConnectionId, Role};

/// Anything that lives in a registry: a connection, or a role type wrapping one.
pub trait Member: Send + Sync {
    fn connection(&self) -> &Connection;
}

impl Member for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}

/// Live connections of one role.
///
/// Only connect (register) and disconnect (unregister) handling mutate it.
/// Iteration order is unspecified; callers that need an order sort the snapshot.
pub struct Registry<T> {
    role: Role,
    members: DashMap<ConnectionId, Arc<T>>,
}

impl<T: Member> Registry<T> {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            members: DashMap::new(),
        }
    }

    /// Record a newly constructed member.
    pub fn register(&self, member: Arc<T>) {
        let id = member.connection().id();
        if self.members.insert(id, member).is_some() {
            tracing::warn!(connection_id = %id, role = %self.role, "Connection registered twice");
        }

        tracing::debug!(
            connection_id = %id,
            role = %self.role,
            connections = self.members.len(),
            "Connection registered"
        );
    }

    /// Remove by identity. No-op when already absent.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<T>> {
        let removed = self.members.remove(&id).map(|(_, member)| member);
        if removed.is_some() {
            tracing::debug!(
                connection_id = %id,
                role = %self.role,
                connections = self.members.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Send a message to every registered member.
    ///
    /// A member that is no longer connected silently drops its copy; the rest
    /// still receive theirs.
    pub fn broadcast<P: Serialize + ?Sized>(&self, name: &str, data: &P) {
        let value = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(role = %self.role, name = name, error = %e, "Failed to serialize broadcast");
                return;
            }
        };

        for entry in self.members.iter() {
            entry.value().connection().send_value(name, value.clone());
        }
    }

    /// Snapshot of the current members. Does not track later changes.
    pub fn instances(&self) -> Vec<Arc<T>> {
        self.members.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
