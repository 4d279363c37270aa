use serde_json::Value;
use std::sync::Arc;

use super::{scheduler, Session};
use crate::ws::protocol::{payload, ProtocolError};
use crate::ws::{Connection, RoleHandler};

/// Fire-and-forget messages a screen client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenMessage {
    /// Empty means the current video ended.
    SetCurrentVideoId(String),
}

impl ScreenMessage {
    pub fn decode(name: &str, data: Value) -> Result<Self, ProtocolError> {
        match name {
            // only a string or null; anything else is not an end-of-video report
            "setCurrentVideoID" => Ok(Self::SetCurrentVideoId(
                payload::<Option<String>>(name, data)?.unwrap_or_default(),
            )),
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }
}

/// Requests a screen client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenRequest {
    GetQueue,
    GetCurrentVideoId,
}

impl ScreenRequest {
    pub fn decode(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "getQueue" => Ok(Self::GetQueue),
            "getCurrentVideoID" => Ok(Self::GetCurrentVideoId),
            _ => Err(ProtocolError::UnknownMessage(name.to_string())),
        }
    }
}

pub struct ScreenHandler {
    session: Arc<Session>,
    connection: Arc<Connection>,
}

impl ScreenHandler {
    pub fn new(session: Arc<Session>, connection: Arc<Connection>) -> Self {
        Self {
            session,
            connection,
        }
    }
}

impl RoleHandler for ScreenHandler {
    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn on_event(&self, name: &str, data: Value) -> Result<(), ProtocolError> {
        match ScreenMessage::decode(name, data)? {
            ScreenMessage::SetCurrentVideoId(video_id) => {
                tracing::info!(
                    connection_id = %self.connection.id(),
                    video_id = %video_id,
                    "Screen reported current video"
                );
                self.session.set_current_video_id(&video_id);
                if video_id.is_empty() {
                    scheduler::spawn_try_play_next(self.session.clone());
                }
            }
        }
        Ok(())
    }

    fn on_request(&self, name: &str, _data: Value) -> Result<Value, ProtocolError> {
        match ScreenRequest::decode(name)? {
            ScreenRequest::GetQueue => serde_json::to_value(self.session.queue_snapshot())
                .map_err(|e| ProtocolError::Encode(e.to_string())),
            ScreenRequest::GetCurrentVideoId => {
                Ok(Value::String(self.session.current_video_id()))
            }
        }
    }

    fn on_disconnect(&self) {
        self.session.screens().unregister(self.connection.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::dispatch::dispatch_frame;
    use crate::ws::Frame;
    use serde_json::json;

    #[test]
    fn test_decode_tables() {
        assert_eq!(
            ScreenMessage::decode("setCurrentVideoID", json!("abc")).unwrap(),
            ScreenMessage::SetCurrentVideoId("abc".to_string())
        );
        assert_eq!(
            ScreenMessage::decode("setCurrentVideoID", Value::Null).unwrap(),
            ScreenMessage::SetCurrentVideoId(String::new())
        );
        assert!(ScreenMessage::decode("getQueue", Value::Null).is_err());
        for bad in [json!(42), json!({}), json!(["abc"]), json!(true)] {
            assert!(matches!(
                ScreenMessage::decode("setCurrentVideoID", bad),
                Err(ProtocolError::InvalidPayload { .. })
            ));
        }

        assert_eq!(ScreenRequest::decode("getQueue").unwrap(), ScreenRequest::GetQueue);
        assert_eq!(
            ScreenRequest::decode("getCurrentVideoID").unwrap(),
            ScreenRequest::GetCurrentVideoId
        );
        assert!(ScreenRequest::decode("setCurrentVideoID").is_err());
    }

    #[test]
    fn test_requests_read_session_state() {
        let session = Session::new(None);
        let (screen, _rx) = session.attach_screen();

        assert_eq!(
            screen.on_request("getCurrentVideoID", Value::Null).unwrap(),
            json!("")
        );
        session.set_current_video_id("abc");
        assert_eq!(
            screen.on_request("getCurrentVideoID", Value::Null).unwrap(),
            json!("abc")
        );
        assert_eq!(screen.on_request("getQueue", Value::Null).unwrap(), json!([]));
    }

    #[test]
    fn test_disconnect_unregisters() {
        let session = Session::new(None);
        let (screen, _rx) = session.attach_screen();
        assert_eq!(session.screens().len(), 1);

        screen.on_disconnect();
        screen.on_disconnect();
        assert!(session.screens().is_empty());
    }

    #[test]
    fn test_malformed_current_video_keeps_playing() {
        let session = Session::new(None);
        let (screen, mut rx) = session.attach_screen();
        session.set_current_video_id("abc");

        for bad in [json!(42), json!({})] {
            dispatch_frame(screen.as_ref(), Frame::event("setCurrentVideoID", bad));
        }
        assert_eq!(session.current_video_id(), "abc");
        assert!(rx.try_recv().is_err());
    }
}
