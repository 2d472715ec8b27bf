//! RTSP viewer sessions (RFC 2326 §3, §12.37).
//!
//! A viewer session is created by SETUP, bound to one stream sid, and
//! destroyed by TEARDOWN or when its TCP connection drops.
//!
//! ```text
//! SETUP          -> Ready
//! PLAY           -> Playing   (attached to the stream's sink)
//! PAUSE          -> Paused    (detached)
//! PLAY           -> Playing
//! TEARDOWN       -> removed
//! TCP disconnect -> removed, via cleanup
//! ```

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use transport::{Transport, TransportHeader};

/// Advertised in the `Session` header; the server does not expire sessions
/// on its own, TCP disconnect is what reclaims them.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Ready,
    Playing,
    Paused,
}

/// One viewer's RTSP session.
#[derive(Debug)]
pub struct ClientSession {
    /// 16 hex digits, returned in the `Session` header.
    pub id: String,
    /// Stream this session was set up against.
    pub sid: String,
    pub transport: RwLock<Option<Transport>>,
    pub state: RwLock<ClientState>,
    pub timeout_secs: u64,
}

impl ClientSession {
    pub fn new(sid: &str) -> Self {
        ClientSession {
            id: format!("{:016X}", rand::random::<u64>()),
            sid: sid.to_string(),
            transport: RwLock::new(None),
            state: RwLock::new(ClientState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn set_transport(&self, transport: Transport) {
        tracing::debug!(session_id = %self.id, destination = %transport.rtp_destination(), "transport configured");
        *self.transport.write() = Some(transport);
    }

    pub fn get_transport(&self) -> Option<Transport> {
        self.transport.read().clone()
    }

    pub fn set_state(&self, state: ClientState) {
        let mut current = self.state.write();
        tracing::debug!(session_id = %self.id, old_state = ?*current, new_state = ?state, "state transition");
        *current = state;
    }

    pub fn get_state(&self) -> ClientState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == ClientState::Playing
    }

    /// `Session` header value, e.g. `"00A1B2C3D4E5F607;timeout=60"`.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// All viewer sessions on the server, across connections.
#[derive(Clone, Default)]
pub struct ClientManager {
    sessions: Arc<RwLock<HashMap<String, Arc<ClientSession>>>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, sid: &str) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(sid));
        let mut sessions = self.sessions.write();
        sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, sid, total_sessions = sessions.len(), "client session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "client session removed");
        }
        removed
    }

    /// Remove several sessions at once (TCP disconnect cleanup).
    pub fn remove_sessions(&self, ids: &[String]) -> Vec<Arc<ClientSession>> {
        let mut sessions = self.sessions.write();
        let removed: Vec<_> = ids.iter().filter_map(|id| sessions.remove(id)).collect();
        if !removed.is_empty() {
            tracing::debug!(
                removed = removed.len(),
                remaining = sessions.len(),
                "batch session cleanup"
            );
        }
        removed
    }

    pub fn get_playing_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
