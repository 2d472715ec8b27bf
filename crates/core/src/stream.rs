//! One egress session: a joined room, its relay, and its media sink.
//!
//! ```text
//!   Created ──start()──► Joined ──matching track──► Active
//!      │                   │                          │
//!      │                   │                    relay ends on its own
//!      │                   │                          ▼
//!      └──────stop()───────┴────────stop()─────────  Inert
//!                          ▼                          │
//!                       Stopped ◄──────stop()─────────┘
//! ```
//!
//! Every stream owns two kinds of threads:
//!
//! - a control thread that receives [`RoomEvent`]s and decides, on its own,
//!   whether a newly subscribed track gets a relay;
//! - at most one relay thread running a [`JitterRelay`].
//!
//! Both watch one cancellation flag. [`Stream::stop`] sets it, closes the
//! sink, leaves the room, then joins the threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{EgressError, Result};
use crate::media::MediaDescription;
use crate::relay::{JitterRelay, RelayExit};
use crate::sink::MediaSink;
use crate::upstream::{JoinRequest, RemoteTrack, RoomConnection, RoomConnector, RoomEvent};

/// How long the control thread waits for a room event before re-checking cancellation.
const EVENT_POLL: Duration = Duration::from_millis(100);

/// Stream identifier for a room and track: `"{room}/{track}"`.
pub fn session_id(room_name: &str, track_name: &str) -> String {
    format!("{room_name}/{track_name}")
}

/// Participant identity the gateway joins a room as.
pub fn egress_identity(room_name: &str, track_name: &str) -> String {
    format!("egress-{room_name}-{track_name}")
}

/// Identifying data of a stream, as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub sid: String,
    pub room_name: String,
    pub track_name: String,
    pub egress_identity: String,
}

impl Session {
    pub fn new(room_name: &str, track_name: &str) -> Self {
        Self {
            sid: session_id(room_name, track_name),
            room_name: room_name.to_string(),
            track_name: track_name.to_string(),
            egress_identity: egress_identity(room_name, track_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Registered, not yet joined.
    Created,
    /// Room joined and sink open; waiting for the requested track.
    Joined,
    /// Relay running.
    Active,
    /// Relay ended on its own. Stays registered until stopped.
    Inert,
    Stopped,
}

/// A live egress stream.
pub struct Stream {
    session: Session,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<StreamState>>,
    sink: RwLock<Option<Arc<MediaSink>>>,
    upstream: Mutex<Option<Box<dyn RoomConnection>>>,
    control: Mutex<Option<JoinHandle<()>>>,
    relays: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
}

impl Stream {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            cancelled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(StreamState::Created)),
            sink: RwLock::new(None),
            upstream: Mutex::new(None),
            control: Mutex::new(None),
            relays: Arc::new(Mutex::new(Vec::new())),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sid(&self) -> &str {
        &self.session.sid
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The sink viewers read from. `None` before the join completes and
    /// after the stream is stopped.
    pub fn media_sink(&self) -> Option<Arc<MediaSink>> {
        self.sink
            .read()
            .as_ref()
            .filter(|sink| !sink.is_closed())
            .cloned()
    }

    /// Join the upstream room and begin waiting for the requested track.
    ///
    /// On failure nothing is left running and the sink is never created.
    pub fn start(&self, connector: &dyn RoomConnector) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.is_cancelled() {
            return Err(EgressError::NotFound(self.session.sid.clone()));
        }
        if self.state() != StreamState::Created {
            return Err(EgressError::Validation(format!(
                "stream {} already started",
                self.session.sid
            )));
        }

        let room = connector.join(&JoinRequest {
            room_name: self.session.room_name.clone(),
            identity: self.session.egress_identity.clone(),
            track_name: self.session.track_name.clone(),
        })?;

        let sink = Arc::new(MediaSink::new(&self.session.sid, MediaDescription::h264()));
        *self.upstream.lock() = Some(room.connection);
        *self.sink.write() = Some(sink.clone());
        *self.state.lock() = StreamState::Joined;

        let supervisor = Supervisor {
            session: self.session.clone(),
            cancelled: self.cancelled.clone(),
            state: self.state.clone(),
            sink,
            relays: self.relays.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("stream-{}", self.session.sid))
            .spawn(move || supervisor.run(room.events))?;
        *self.control.lock() = Some(handle);

        tracing::info!(
            sid = %self.session.sid,
            identity = %self.session.egress_identity,
            "stream joined room"
        );
        Ok(())
    }

    /// Cancel the relay, close the sink, and leave the room.
    ///
    /// Both the close and the disconnect are attempted even if one fails;
    /// failures are reported together as [`EgressError::Teardown`].
    /// Calling it again is a no-op.
    pub fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();

        if let Some(sink) = self.sink.read().as_ref()
            && let Err(e) = sink.close()
        {
            failures.push(e.to_string());
        }

        if let Some(mut connection) = self.upstream.lock().take()
            && let Err(e) = connection.disconnect()
        {
            failures.push(e.to_string());
        }

        if let Some(handle) = self.control.lock().take()
            && handle.join().is_err()
        {
            failures.push("stream control thread panicked".to_string());
        }
        // The control thread has exited, so no relay can be added past this point.
        for handle in self.relays.lock().drain(..) {
            if handle.join().is_err() {
                failures.push("relay thread panicked".to_string());
            }
        }

        *self.state.lock() = StreamState::Stopped;

        if failures.is_empty() {
            tracing::info!(sid = %self.session.sid, "stream stopped");
            Ok(())
        } else {
            let reason = failures.join("; ");
            tracing::warn!(sid = %self.session.sid, %reason, "stream stopped with errors");
            Err(EgressError::Teardown(reason))
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("session", &self.session)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// State moved onto a stream's control thread.
struct Supervisor {
    session: Session,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<StreamState>>,
    sink: Arc<MediaSink>,
    relays: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Supervisor {
    fn run(self, events: Receiver<RoomEvent>) {
        let mut relaying = false;

        while !self.cancelled.load(Ordering::SeqCst) {
            match events.recv_timeout(EVENT_POLL) {
                Ok(RoomEvent::TrackSubscribed(track)) => {
                    if relaying {
                        tracing::debug!(sid = %self.session.sid, track = %track.name, "already relaying; ignoring track");
                    } else if !track.is_h264_video() {
                        tracing::debug!(sid = %self.session.sid, track = %track.name, mime = %track.mime_type, "ignoring non-H.264 track");
                    } else if track.name != self.session.track_name {
                        tracing::debug!(sid = %self.session.sid, track = %track.name, "ignoring unrequested track");
                    } else {
                        match self.spawn_relay(track) {
                            Ok(()) => relaying = true,
                            Err(e) => {
                                tracing::error!(sid = %self.session.sid, error = %e, "failed to start relay")
                            }
                        }
                    }
                }
                Ok(RoomEvent::Disconnected) => {
                    tracing::warn!(sid = %self.session.sid, "room disconnected");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn spawn_relay(&self, track: RemoteTrack) -> Result<()> {
        tracing::info!(
            sid = %self.session.sid,
            track = %track.name,
            ssrc = format_args!("{:#010X}", track.ssrc),
            "track subscribed, starting relay"
        );
        let relay = JitterRelay::new(
            &self.session.sid,
            track,
            self.sink.clone(),
            self.cancelled.clone(),
        );
        let cancelled = self.cancelled.clone();
        let state = self.state.clone();
        let sid = self.session.sid.clone();

        *self.state.lock() = StreamState::Active;
        let handle = thread::Builder::new()
            .name(format!("relay-{sid}"))
            .spawn(move || {
                let exit = relay.run();
                if !cancelled.load(Ordering::SeqCst) {
                    let mut state = state.lock();
                    if *state == StreamState::Active {
                        *state = StreamState::Inert;
                    }
                    match exit {
                        RelayExit::Upstream(e) => {
                            tracing::warn!(%sid, error = %e, "relay ended; stream inert until stopped")
                        }
                        other => tracing::warn!(%sid, reason = ?other, "relay ended; stream inert until stopped"),
                    }
                }
            })?;
        self.relays.lock().push(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::sink::tests::RecordingWriter;
    use crate::upstream::channel::ChannelConnector;
    use std::time::Instant;

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
    fn identifiers() {
        let session = Session::new("demo", "cam1");
        assert_eq!(session.sid, "demo/cam1");
        assert_eq!(session.egress_identity, "egress-demo-cam1");
    }

    #[test]
    fn failed_join_leaves_no_sink() {
        let connector = ChannelConnector::new();
        let stream = Stream::new(Session::new("missing", "cam1"));
        assert!(matches!(
            stream.start(&connector),
            Err(EgressError::UpstreamJoin(_))
        ));
        assert!(stream.media_sink().is_none());
        assert_eq!(stream.state(), StreamState::Created);
    }

    #[test]
    fn relays_matching_track_and_stops() {
        let connector = ChannelConnector::new();
        let room = connector.open_room("demo");
        let stream = Stream::new(Session::new("demo", "cam1"));
        stream.start(&connector).unwrap();
        assert_eq!(room.participant().as_deref(), Some("egress-demo-cam1"));

        let sink = stream.media_sink().unwrap();
        let viewer = RecordingWriter::new("127.0.0.1:6000");
        sink.attach("viewer", viewer.clone()).unwrap();

        let _other = room.publish_h264("screen", 1).unwrap();
        let publisher = room.publish_h264("cam1", 2).unwrap();
        assert!(wait_for(|| stream.state() == StreamState::Active));

        for seq in 0..5u16 {
            publisher
                .send(RtpPacket::new(125, seq, 0, 2).with_payload(vec![0x65]))
                .unwrap();
        }
        assert!(wait_for(|| viewer.received().len() == 5));

        stream.stop().unwrap();
        assert_eq!(stream.state(), StreamState::Stopped);
        assert!(stream.media_sink().is_none());
        assert!(room.participant().is_none());
        stream.stop().unwrap();
    }

    #[test]
    fn ended_track_makes_stream_inert() {
        let connector = ChannelConnector::new();
        let room = connector.open_room("demo");
        let stream = Stream::new(Session::new("demo", "cam1"));
        stream.start(&connector).unwrap();

        let publisher = room.publish_h264("cam1", 2).unwrap();
        assert!(wait_for(|| stream.state() == StreamState::Active));
        drop(publisher);
        assert!(wait_for(|| stream.state() == StreamState::Inert));
        assert!(stream.media_sink().is_some());
        stream.stop().unwrap();
    }

    #[test]
    fn stop_reports_disconnect_failure_after_closing_sink() {
        let connector = ChannelConnector::new();
        let room = connector.open_room("demo");
        let stream = Stream::new(Session::new("demo", "cam1"));
        stream.start(&connector).unwrap();
        let sink = stream.media_sink().unwrap();

        room.fail_disconnect();
        assert!(matches!(stream.stop(), Err(EgressError::Teardown(_))));
        assert!(sink.is_closed());
        assert_eq!(stream.state(), StreamState::Stopped);
    }

    #[test]
    fn start_after_stop_is_rejected() {
        let connector = ChannelConnector::new();
        connector.open_room("demo");
        let stream = Stream::new(Session::new("demo", "cam1"));
        stream.stop().unwrap();
        assert!(stream.start(&connector).is_err());
        assert!(stream.media_sink().is_none());
    }
}
