//! Agent RPC endpoints: `/v1/iface/down`, `/v1/iface/up`,
//! `/v1/iface/restart`, and `/health`.
//!
//! Every iface endpoint is idempotent by `command_id` — a retried request
//! with a previously-seen `command_id` replays the cached result rather than
//! re-running `ip link set`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::idempotency::IdempotencyStore;
use crate::linkctl::LinkController;
use crate::model::{AgentRequest, AgentResult};

/// Shared state for the Agent RPC router.
#[derive(Clone)]
pub struct AgentRouterState {
    pub linkctl: Arc<dyn LinkController>,
    pub idempotency: Arc<IdempotencyStore>,
}

/// `GET /health` — unauthenticated liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// Parse the raw request body as an [`AgentRequest`], returning a `400 Bad
/// Request` JSON error response (rather than axum's default `422`) when the
/// body isn't valid JSON or is missing `command_id`/`iface`.
fn parse_request(body: &Bytes) -> Result<AgentRequest, Response> {
    serde_json::from_slice::<AgentRequest>(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid request body: {e}")})),
        )
            .into_response()
    })
}

/// `POST /v1/iface/down`
pub async fn down(State(state): State<AgentRouterState>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    handle(&state, req, false).await.into_response()
}

/// `POST /v1/iface/up`
pub async fn up(State(state): State<AgentRouterState>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    handle(&state, req, true).await.into_response()
}

/// `POST /v1/iface/restart` — down then up, reported as a single result.
pub async fn restart(State(state): State<AgentRouterState>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    if let Some(cached) = state.idempotency.get(&req.command_id) {
        return Json(cached).into_response();
    }

    let result = match state.linkctl.set(&req.iface, false).await {
        Ok(()) => match state.linkctl.set(&req.iface, true).await {
            Ok(()) => AgentResult {
                ok: true,
                command_id: req.command_id.clone(),
                iface: req.iface.clone(),
                out: Some(String::new()),
                error: None,
            },
            Err(e) => {
                tracing::error!(command_id = %req.command_id, iface = %req.iface, error = %e, "restart (up) failed");
                AgentResult {
                    ok: false,
                    command_id: req.command_id.clone(),
                    iface: req.iface.clone(),
                    out: None,
                    error: Some(e.to_string()),
                }
            }
        },
        Err(e) => {
            tracing::error!(command_id = %req.command_id, iface = %req.iface, error = %e, "restart (down) failed");
            AgentResult {
                ok: false,
                command_id: req.command_id.clone(),
                iface: req.iface.clone(),
                out: None,
                error: Some(e.to_string()),
            }
        }
    };

    state.idempotency.set(&req.command_id, result.clone());
    Json(result).into_response()
}

async fn handle(state: &AgentRouterState, req: AgentRequest, up: bool) -> Json<AgentResult> {
    if let Some(cached) = state.idempotency.get(&req.command_id) {
        return Json(cached);
    }

    let result = match state.linkctl.set(&req.iface, up).await {
        Ok(()) => {
            tracing::info!(command_id = %req.command_id, iface = %req.iface, "cmd ok");
            AgentResult {
                ok: true,
                command_id: req.command_id.clone(),
                iface: req.iface.clone(),
                out: Some(String::new()),
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(command_id = %req.command_id, iface = %req.iface, error = %e, "cmd fail");
            AgentResult {
                ok: false,
                command_id: req.command_id.clone(),
                iface: req.iface.clone(),
                out: None,
                error: Some(e.to_string()),
            }
        }
    };

    state.idempotency.set(&req.command_id, result.clone());
    Json(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkctl::LinkCtlError;

    struct AlwaysOk;

    #[async_trait::async_trait]
    impl LinkController for AlwaysOk {
        async fn set(&self, _iface: &str, _up: bool) -> Result<(), LinkCtlError> {
            Ok(())
        }
    }

    struct AlwaysFail;

    #[async_trait::async_trait]
    impl LinkController for AlwaysFail {
        async fn set(&self, _iface: &str, _up: bool) -> Result<(), LinkCtlError> {
            Err(LinkCtlError::CommandFailed("no such device".to_string()))
        }
    }

    fn state_with(ctl: Arc<dyn LinkController>) -> AgentRouterState {
        AgentRouterState {
            linkctl: ctl,
            idempotency: Arc::new(IdempotencyStore::new(3600)),
        }
    }

    #[tokio::test]
    async fn repeated_command_id_replays_cached_result() {
        let state = state_with(Arc::new(AlwaysOk));
        let req = AgentRequest {
            command_id: "cmd-1".to_string(),
            iface: "gre-kh-7".to_string(),
        };
        let first = handle(&state, req.clone(), true).await.0;
        let second = handle(&state, req, true).await.0;
        assert_eq!(first.ok, second.ok);
        assert_eq!(first.command_id, second.command_id);
    }

    #[tokio::test]
    async fn failed_command_reports_error() {
        let state = state_with(Arc::new(AlwaysFail));
        let req = AgentRequest {
            command_id: "cmd-2".to_string(),
            iface: "gre-kh-7".to_string(),
        };
        let result = handle(&state, req, false).await.0;
        assert!(!result.ok);
        assert!(result.error.is_some());
    }

    #[test]
    fn parse_request_rejects_missing_required_field() {
        let body = Bytes::from_static(br#"{"command_id":"cmd-3"}"#);
        let err = parse_request(&body).expect_err("missing iface should be rejected");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn parse_request_rejects_non_json_body() {
        let body = Bytes::from_static(b"not json");
        let err = parse_request(&body).expect_err("non-JSON body should be rejected");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn parse_request_accepts_well_formed_body() {
        let body = Bytes::from_static(br#"{"command_id":"cmd-4","iface":"gre-kh-7"}"#);
        let req = parse_request(&body).expect("well-formed body should parse");
        assert_eq!(req.command_id, "cmd-4");
        assert_eq!(req.iface, "gre-kh-7");
    }
}
