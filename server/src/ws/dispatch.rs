//! Inbound frame dispatch shared by every role on both ends of the link.

use serde_json::Value;

use super::connection::Connection;
use super::protocol::{is_reserved, Frame, ProtocolError};

/// Role-specific behaviour for one connection.
///
/// Each role decodes names through its own explicit table, so an unknown
/// name surfaces as [`ProtocolError::UnknownMessage`] instead of a silent miss.
pub trait RoleHandler: Send + Sync + 'static {
    fn connection(&self) -> &Connection;

    /// Runs once after the link is up.
    fn on_connect(&self) {}

    /// Fire-and-forget message from the remote end.
    fn on_event(&self, name: &str, data: Value) -> Result<(), ProtocolError>;

    /// Request from the remote end. The returned value is sent back as the reply.
    fn on_request(&self, name: &str, _data: Value) -> Result<Value, ProtocolError> {
        Err(ProtocolError::UnknownMessage(name.to_string()))
    }

    /// Runs once after the link is gone.
    fn on_disconnect(&self) {}
}

/// Route one decoded frame to the handler, or to the reply table.
///
/// Errors are logged and swallowed; they never close the connection.
pub fn dispatch_frame<H: RoleHandler + ?Sized>(handler: &H, frame: Frame) {
    let connection = handler.connection();

    match frame {
        Frame::Event { name, data } => {
            if is_reserved(&name) {
                tracing::trace!(connection_id = %connection.id(), name = %name, "Ignoring reserved message");
                return;
            }
            tracing::debug!(
                connection_id = %connection.id(),
                role = %connection.role(),
                name = %name,
                "Event received"
            );
            if let Err(e) = handler.on_event(&name, data) {
                tracing::warn!(
                    connection_id = %connection.id(),
                    role = %connection.role(),
                    error = %e,
                    "Ignoring message"
                );
            }
        }
        Frame::Request { id, name, data } => {
            if is_reserved(&name) {
                tracing::trace!(connection_id = %connection.id(), name = %name, "Ignoring reserved request");
                return;
            }
            match handler.on_request(&name, data) {
                Ok(reply) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        role = %connection.role(),
                        name = %name,
                        request_id = id,
                        "Replying to request"
                    );
                    connection.reply(id, reply);
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        role = %connection.role(),
                        request_id = id,
                        error = %e,
                        "Ignoring request"
                    );
                }
            }
        }
        Frame::Reply { id, data } => {
            connection.resolve_reply(id, data);
        }
    }
}

/// Decode a text frame and dispatch it.
pub fn dispatch_text<H: RoleHandler + ?Sized>(handler: &H, text: &str) {
    match Frame::decode(text) {
        Ok(frame) => dispatch_frame(handler, frame),
        Err(e) => {
            tracing::warn!(
                connection_id = %handler.connection().id(),
                error = %e,
                "Failed to decode frame"
            );
        }
    }
}
