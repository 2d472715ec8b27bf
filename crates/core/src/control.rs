//! Session control operations behind the HTTP API.

use std::sync::Arc;

use crate::error::{EgressError, Result};
use crate::registry::StreamRegistry;
use crate::stream::Session;
use crate::upstream::RoomConnector;

/// Starts, stops, and lists egress sessions.
///
/// `start_session` blocks for the duration of the upstream join; async
/// callers run it on a blocking thread.
#[derive(Clone)]
pub struct SessionControl {
    registry: StreamRegistry,
    connector: Arc<dyn RoomConnector>,
}

impl SessionControl {
    pub fn new(registry: StreamRegistry, connector: Arc<dyn RoomConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Join `room_name` and relay its `track_name` video track.
    ///
    /// Either the stream ends up registered and joined, or nothing is left
    /// behind: a failed join removes the registry entry again.
    pub fn start_session(&self, room_name: &str, track_name: &str) -> Result<Session> {
        if room_name.is_empty() {
            return Err(EgressError::Validation("room_name must be provided".into()));
        }
        if track_name.is_empty() {
            return Err(EgressError::Validation("track_name must be provided".into()));
        }

        let session = Session::new(room_name, track_name);
        let stream = self.registry.create(session.clone())?;

        if let Err(e) = stream.start(self.connector.as_ref()) {
            tracing::error!(sid = %session.sid, error = %e, "failed to start stream");
            self.registry.discard(&stream);
            return Err(e);
        }

        tracing::info!(sid = %session.sid, "session started");
        Ok(session)
    }

    pub fn stop_session(&self, sid: &str) -> Result<Session> {
        if sid.is_empty() {
            return Err(EgressError::Validation("sid must be provided".into()));
        }
        let session = self.registry.remove(sid)?;
        tracing::info!(%sid, "session stopped");
        Ok(session)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        let mut sessions = self.registry.list();
        sessions.sort_by(|a, b| a.sid.cmp(&b.sid));
        sessions
    }

    /// Check the room service is reachable.
    pub fn probe_upstream(&self) -> Result<String> {
        self.connector.probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::sink::tests::RecordingWriter;
    use crate::stream::StreamState;
    use crate::upstream::channel::ChannelConnector;
    use std::thread;
    use std::time::{Duration, Instant};

    fn control() -> (SessionControl, ChannelConnector) {
        let connector = ChannelConnector::new();
        let control = SessionControl::new(StreamRegistry::new(), Arc::new(connector.clone()));
        (control, connector)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn empty_names_are_rejected_before_any_state_change() {
        let (control, _) = control();
        let err = control.start_session("", "cam1").unwrap_err();
        assert_eq!(err.to_string(), "room_name must be provided");
        let err = control.start_session("demo", "").unwrap_err();
        assert_eq!(err.to_string(), "track_name must be provided");
        assert!(control.registry().is_empty());
    }

    #[test]
    fn failed_join_rolls_back() {
        let (control, connector) = control();
        connector.set_refuse_joins(true);
        assert!(matches!(
            control.start_session("demo", "cam1"),
            Err(EgressError::UpstreamJoin(_))
        ));
        assert!(control.list_sessions().is_empty());

        connector.set_refuse_joins(false);
        connector.open_room("demo");
        assert!(control.start_session("demo", "cam1").is_ok());
    }

    #[test]
    fn second_start_reports_already_exists() {
        let (control, connector) = control();
        connector.open_room("demo");
        control.start_session("demo", "cam1").unwrap();
        assert!(matches!(
            control.start_session("demo", "cam1"),
            Err(EgressError::AlreadyExists(_))
        ));
        assert_eq!(control.list_sessions().len(), 1);
    }

    #[test]
    fn stop_unknown_is_not_found() {
        let (control, _) = control();
        assert!(matches!(
            control.stop_session("demo/cam1"),
            Err(EgressError::NotFound(_))
        ));
    }

    #[test]
    fn start_relay_stop() {
        let (control, connector) = control();
        let room = connector.open_room("demo");

        let session = control.start_session("demo", "cam1").unwrap();
        assert_eq!(session.sid, "demo/cam1");
        assert_eq!(session.egress_identity, "egress-demo-cam1");
        assert_eq!(control.list_sessions(), vec![session.clone()]);

        let stream = control.registry().get("demo/cam1").unwrap();
        let viewer = RecordingWriter::new("127.0.0.1:7000");
        stream
            .media_sink()
            .unwrap()
            .attach("v", viewer.clone())
            .unwrap();

        let publisher = room.publish_h264("cam1", 9).unwrap();
        assert!(wait_for(|| stream.state() == StreamState::Active));
        publisher
            .send(RtpPacket::new(125, 1, 0, 9).with_payload(vec![0x67]))
            .unwrap();
        assert!(wait_for(|| viewer.received().len() == 1));
        assert_eq!(viewer.received()[0].payload_type, 96);

        assert_eq!(control.stop_session("demo/cam1").unwrap(), session);
        assert!(control.list_sessions().is_empty());
        assert!(room.participant().is_none());
    }
}
