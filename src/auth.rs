//! Agent RPC authentication (CIDR allow-list + HMAC signature) and the
//! manual control surface's separate bearer-token authentication.
//!
//! The Agent RPC server requires a valid `x-ts`/`x-sig` pair signing the
//! request body, from a source address that matches the configured
//! CIDR allow-list. The manual control surface uses a simpler shared bearer
//! token, since it's meant to be reached only by the operator's own CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::security::{cidr_allowed, constant_time_eq, hmac_verify};

/// Shared secret and allow-list for the Agent RPC server, injected via
/// [`axum::Extension`].
#[derive(Clone)]
pub struct AgentAuth {
    pub shared_secret: Arc<String>,
    pub allow_cidrs: Arc<Vec<String>>,
    pub max_clock_skew_sec: i64,
}

/// Axum middleware enforcing CIDR allow-listing and HMAC signature
/// verification on every Agent RPC request.
///
/// # Error responses
///
/// - `403 Forbidden` — source address not in the allow-list
/// - `401 Unauthorized` — missing, malformed, stale, or invalid signature
/// - `500 Internal Server Error` — [`AgentAuth`] extension not found
pub async fn require_agent_signature(request: Request, next: Next) -> Response {
    let Some(auth) = request.extensions().get::<AgentAuth>().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server configuration error"})),
        )
            .into_response();
    };

    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = peer_ip {
        if !cidr_allowed(ip, &auth.allow_cidrs) {
            return (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"}))).into_response();
        }
    }

    let ts = request
        .headers()
        .get("x-ts")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let sig = request
        .headers()
        .get("x-sig")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "failed to read body"})),
            )
                .into_response();
        }
    };

    if !hmac_verify(&auth.shared_secret, &bytes, &ts, &sig, auth.max_clock_skew_sec) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    next.run(request).await
}

/// Extension carrying the expected control-surface bearer token.
#[derive(Clone)]
pub struct ControlToken(pub String);

/// Axum middleware guarding the manual control surface with a plain bearer
/// token — no HMAC, no CIDR check, since this surface is meant to be reached
/// by the operator's own `ctl` CLI, typically over loopback.
pub async fn require_control_token(request: Request, next: Next) -> Response {
    let expected = match request.extensions().get::<ControlToken>() {
        Some(t) => t.0.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "server configuration error"})),
            )
                .into_response();
        }
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match provided {
        Some(token) if constant_time_eq(expected.as_bytes(), token.as_bytes()) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_tokens() {
        assert!(constant_time_eq(b"secret-token", b"secret-token"));
    }

    #[test]
    fn constant_time_eq_rejects_different_tokens() {
        assert!(!constant_time_eq(b"secret-token", b"wrong-token!"));
    }
}
