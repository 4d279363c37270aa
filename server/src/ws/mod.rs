pub mod actor;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod registry;

use serde::Serialize;
use std::fmt;

pub use connection::{Connection, ConnectionSender, LinkState};
pub use dispatch::RoleHandler;
pub use protocol::{Frame, ProtocolError};
pub use registry::{Member, Registry};

/// Process-unique identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection role. Decides which handlers and which registry a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Singer,
    Screen,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singer => "singer",
            Self::Screen => "screen",
        }
    }

    /// Upgrade path for this role. Singer and Screen traffic never share a path.
    pub fn namespace(&self) -> String {
        format!("/ws/{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
