//! Wire messages of the session control API, generated from
//! `proto/session.proto`.
//!
//! Bodies are protobuf (`application/x-protobuf`). Every response carries a
//! `result` oneof: the payload on success, or an error string.

use crate::stream;

include!(concat!(env!("OUT_DIR"), "/egress.session.rs"));

impl From<stream::Session> for Session {
    fn from(session: stream::Session) -> Self {
        Self {
            sid: session.sid,
            room_name: session.room_name,
            track_name: session.track_name,
            egress_identity: session.egress_identity,
        }
    }
}
