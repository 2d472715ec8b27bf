//! HTTP control plane.
//!
//! | Route | Method | Body | Response |
//! |-------|--------|------|----------|
//! | `/session/start` | POST | [`StartSessionRequest`](proto::StartSessionRequest) | [`StartSessionResponse`](proto::StartSessionResponse) |
//! | `/session/stop` | POST | [`StopSessionRequest`](proto::StopSessionRequest) | [`StopSessionResponse`](proto::StopSessionResponse) |
//! | `/session/list` | POST | [`ListSessionsRequest`](proto::ListSessionsRequest) | [`ListSessionsResponse`](proto::ListSessionsResponse) |
//! | `/health` | GET | | JSON |
//!
//! Failed operations answer `400` with the error in the response's
//! `result` oneof.

pub mod proto;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use prost::Message;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::control::SessionControl;
use crate::error::{EgressError, Result};
use proto::{list_sessions_response, start_session_response, stop_session_response};

pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Delay before the first upstream probe.
pub const HEALTH_INITIAL_DELAY: Duration = Duration::from_secs(5);
/// Interval between upstream probes.
pub const HEALTH_PERIOD: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiState {
    pub control: SessionControl,
    pub health: HealthMonitor,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/session/list", post(list_sessions))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the control plane on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP control plane listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn protobuf<M: Message>(status: StatusCode, message: &M) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)],
        message.encode_to_vec(),
    )
        .into_response()
}

fn failure_status(error: &EgressError) -> StatusCode {
    match error {
        EgressError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn start_session(State(state): State<ApiState>, body: Bytes) -> Response {
    let reply = |status, result| protobuf(status, &proto::StartSessionResponse { result: Some(result) });

    let request = match proto::StartSessionRequest::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                start_session_response::Result::Error(format!("invalid request body: {e}")),
            );
        }
    };

    tracing::info!(room = %request.room_name, track = %request.track_name, "start session requested");
    let control = state.control.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        control.start_session(&request.room_name, &request.track_name)
    })
    .await;

    match outcome {
        Ok(Ok(session)) => reply(
            StatusCode::OK,
            start_session_response::Result::Session(session.into()),
        ),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "start session failed");
            reply(failure_status(&e), start_session_response::Result::Error(e.to_string()))
        }
        Err(e) => {
            tracing::error!(error = %e, "start session task failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                start_session_response::Result::Error(e.to_string()),
            )
        }
    }
}

async fn stop_session(State(state): State<ApiState>, body: Bytes) -> Response {
    let reply = |status, result| protobuf(status, &proto::StopSessionResponse { result: Some(result) });

    let request = match proto::StopSessionRequest::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                stop_session_response::Result::Error(format!("invalid request body: {e}")),
            );
        }
    };

    tracing::info!(sid = %request.sid, "stop session requested");
    let control = state.control.clone();
    let outcome = tokio::task::spawn_blocking(move || control.stop_session(&request.sid)).await;

    match outcome {
        Ok(Ok(session)) => reply(
            StatusCode::OK,
            stop_session_response::Result::Session(session.into()),
        ),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "stop session failed");
            reply(failure_status(&e), stop_session_response::Result::Error(e.to_string()))
        }
        Err(e) => {
            tracing::error!(error = %e, "stop session task failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                stop_session_response::Result::Error(e.to_string()),
            )
        }
    }
}

async fn list_sessions(State(state): State<ApiState>, body: Bytes) -> Response {
    if let Err(e) = proto::ListSessionsRequest::decode(body) {
        return protobuf(
            StatusCode::BAD_REQUEST,
            &proto::ListSessionsResponse {
                result: Some(list_sessions_response::Result::Error(format!(
                    "invalid request body: {e}"
                ))),
            },
        );
    }

    let sessions = state
        .control
        .list_sessions()
        .into_iter()
        .map(proto::Session::from)
        .collect();
    protobuf(
        StatusCode::OK,
        &proto::ListSessionsResponse {
            result: Some(list_sessions_response::Result::Sessions(proto::Sessions {
                sessions,
            })),
        },
    )
}

async fn health(State(state): State<ApiState>) -> Response {
    let sessions = state.control.registry().len();
    let (status, upstream) = match state.health.last() {
        None => (StatusCode::OK, json!({ "status": "pending" })),
        Some(check) => {
            let checked_at = check
                .checked_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let (status, label) = if check.healthy {
                (StatusCode::OK, "passing")
            } else {
                (StatusCode::SERVICE_UNAVAILABLE, "failing")
            };
            (
                status,
                json!({
                    "status": label,
                    "message": check.message,
                    "checked_at": checked_at,
                }),
            )
        }
    };

    (
        status,
        Json(json!({
            "sessions": sessions,
            "checks": { "upstream": upstream },
        })),
    )
        .into_response()
}

/// Outcome of one upstream probe.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub healthy: bool,
    pub message: String,
    pub checked_at: SystemTime,
}

/// Last result of the periodic upstream probe.
#[derive(Clone, Default)]
pub struct HealthMonitor {
    last: Arc<RwLock<Option<HealthCheck>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<HealthCheck> {
        self.last.read().clone()
    }

    pub fn record(&self, outcome: &Result<String>) {
        let check = match outcome {
            Ok(message) => HealthCheck {
                healthy: true,
                message: message.clone(),
                checked_at: SystemTime::now(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "upstream health check failed");
                HealthCheck {
                    healthy: false,
                    message: e.to_string(),
                    checked_at: SystemTime::now(),
                }
            }
        };
        *self.last.write() = Some(check);
    }

    /// Probe the room service after `initial_delay`, then every `period`.
    pub fn spawn(
        &self,
        control: SessionControl,
        initial_delay: Duration,
        period: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let control = control.clone();
                let outcome = tokio::task::spawn_blocking(move || control.probe_upstream())
                    .await
                    .unwrap_or_else(|e| {
                        Err(EgressError::UpstreamJoin(format!("probe task failed: {e}")))
                    });
                monitor.record(&outcome);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamRegistry;
    use crate::upstream::channel::ChannelConnector;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> (ApiState, ChannelConnector) {
        let connector = ChannelConnector::new();
        let control = SessionControl::new(StreamRegistry::new(), Arc::new(connector.clone()));
        (
            ApiState {
                control,
                health: HealthMonitor::new(),
            },
            connector,
        )
    }

    async fn call(state: &ApiState, path: &str, body: Vec<u8>) -> (StatusCode, Bytes) {
        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header(header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    fn start_body(room: &str, track: &str) -> Vec<u8> {
        proto::StartSessionRequest {
            room_name: room.into(),
            track_name: track.into(),
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn start_list_stop() {
        let (state, connector) = state();
        connector.open_room("demo");

        let (status, body) = call(&state, "/session/start", start_body("demo", "cam1")).await;
        assert_eq!(status, StatusCode::OK);
        let response = proto::StartSessionResponse::decode(body).unwrap();
        let Some(start_session_response::Result::Session(session)) = response.result else {
            panic!("expected session");
        };
        assert_eq!(session.sid, "demo/cam1");
        assert_eq!(session.egress_identity, "egress-demo-cam1");

        let (status, body) = call(&state, "/session/list", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        let response = proto::ListSessionsResponse::decode(body).unwrap();
        let Some(list_sessions_response::Result::Sessions(sessions)) = response.result else {
            panic!("expected sessions");
        };
        assert_eq!(sessions.sessions, vec![session.clone()]);

        let stop = proto::StopSessionRequest {
            sid: "demo/cam1".into(),
        }
        .encode_to_vec();
        let (status, body) = call(&state, "/session/stop", stop.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let response = proto::StopSessionResponse::decode(body).unwrap();
        assert_eq!(
            response.result,
            Some(stop_session_response::Result::Session(session))
        );

        let (status, body) = call(&state, "/session/stop", stop).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response = proto::StopSessionResponse::decode(body).unwrap();
        assert!(matches!(
            response.result,
            Some(stop_session_response::Result::Error(e)) if e.contains("not found")
        ));
    }

    #[tokio::test]
    async fn validation_error_is_400() {
        let (state, _) = state();
        let (status, body) = call(&state, "/session/start", start_body("", "cam1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response = proto::StartSessionResponse::decode(body).unwrap();
        assert_eq!(
            response.result,
            Some(start_session_response::Result::Error(
                "room_name must be provided".into()
            ))
        );
    }

    #[tokio::test]
    async fn join_failure_is_400_and_rolled_back() {
        let (state, connector) = state();
        connector.set_refuse_joins(true);
        let (status, _) = call(&state, "/session/start", start_body("demo", "cam1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.control.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn garbage_body_is_400() {
        let (state, _) = state();
        let (status, body) = call(&state, "/session/start", vec![0xff, 0xff, 0xff]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response = proto::StartSessionResponse::decode(body).unwrap();
        assert!(matches!(
            response.result,
            Some(start_session_response::Result::Error(_))
        ));
    }

    #[tokio::test]
    async fn health_reflects_last_probe() {
        let (state, connector) = state();
        let get_health = |state: ApiState| async move {
            let response = router(state)
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            (status, json)
        };

        let (status, json) = get_health(state.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["checks"]["upstream"]["status"], "pending");

        connector.set_refuse_joins(true);
        state.health.record(&state.control.probe_upstream());
        let (status, json) = get_health(state.clone()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["checks"]["upstream"]["status"], "failing");

        connector.set_refuse_joins(false);
        state.health.record(&state.control.probe_upstream());
        let (status, json) = get_health(state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn monitor_probes_after_initial_delay() {
        let (state, _) = state();
        let handle = state.health.spawn(
            state.control.clone(),
            Duration::from_millis(300),
            Duration::from_secs(10),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.health.last().is_none());

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if state.health.last().is_some() {
                break;
            }
        }
        assert!(state.health.last().is_some_and(|c| c.healthy));
        handle.abort();
    }
}
