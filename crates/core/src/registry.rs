//! Process-wide map from sid to live [`Stream`].
//!
//! Shared by the control plane (which creates and removes streams) and the
//! RTSP server (which only looks them up). Lookups take a read lock and
//! never wait on a stream's teardown: removal takes the entry out of the
//! map first and stops it afterwards, outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EgressError, Result};
use crate::stream::{Session, Stream};

/// Cheaply cloneable handle to the shared stream table.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<Stream>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream for `session`.
    ///
    /// The check and the insert happen under one write lock, so of several
    /// concurrent creates for the same sid exactly one succeeds.
    pub fn create(&self, session: Session) -> Result<Arc<Stream>> {
        let mut streams = self.streams.write();
        if streams.contains_key(&session.sid) {
            return Err(EgressError::AlreadyExists(session.sid));
        }
        let sid = session.sid.clone();
        let stream = Arc::new(Stream::new(session));
        streams.insert(sid.clone(), stream.clone());
        tracing::debug!(%sid, total = streams.len(), "stream registered");
        Ok(stream)
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Stream>> {
        self.streams.read().get(sid).cloned()
    }

    /// Sessions of every registered stream, in no particular order.
    pub fn list(&self) -> Vec<Session> {
        self.streams
            .read()
            .values()
            .map(|stream| stream.session().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    /// Unregister and stop the stream for `sid`.
    ///
    /// The entry is gone even if stopping reports a failure; that failure
    /// is logged rather than returned.
    pub fn remove(&self, sid: &str) -> Result<Session> {
        let stream = self
            .streams
            .write()
            .remove(sid)
            .ok_or_else(|| EgressError::NotFound(sid.to_string()))?;
        Self::shut_down(&stream);
        Ok(stream.session().clone())
    }

    /// Unregister `stream` if it is still the entry for its sid, then stop it.
    pub fn discard(&self, stream: &Arc<Stream>) {
        {
            let mut streams = self.streams.write();
            if streams
                .get(stream.sid())
                .is_some_and(|current| Arc::ptr_eq(current, stream))
            {
                streams.remove(stream.sid());
            }
        }
        Self::shut_down(stream);
    }

    /// Remove and stop every stream. Returns how many were stopped.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.streams.write().drain().map(|(_, s)| s).collect();
        for stream in &drained {
            Self::shut_down(stream);
        }
        drained.len()
    }

    fn shut_down(stream: &Stream) {
        match stream.stop() {
            Ok(()) => tracing::debug!(sid = %stream.sid(), "stream removed"),
            Err(e) => tracing::warn!(sid = %stream.sid(), error = %e, "stream removed with teardown errors"),
        }
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.len())
            .finish()
    }
}
