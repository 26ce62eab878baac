//! Signed, retrying RPC client used by the Coordinator to reach a tunnel's
//! peer Agent.
//!
//! Every call carries the same `command_id` across all retry attempts, so a
//! request the Agent executed but whose response was lost gets the Agent's
//! idempotency cache replayed instead of re-executing the operation.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::model::AgentResult;
use crate::security::hmac_sign;
use crate::state::now_unix;

/// HTTP client for a single tunnel's peer Agent.
pub struct AgentRpcClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    timeout: Duration,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl AgentRpcClient {
    pub fn new(
        base_url: String,
        secret: String,
        timeout_sec: u64,
        max_attempts: u32,
        base_backoff_ms: u64,
        max_backoff_ms: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            timeout: Duration::from_secs(timeout_sec),
            max_attempts,
            base_backoff_ms,
            max_backoff_ms,
        }
    }

    /// `POST` a signed request to `path` with the given `iface` payload and a
    /// freshly generated `command_id`, retrying with jittered exponential
    /// backoff on transport errors or non-2xx responses.
    ///
    /// When `must_ok` is true, an Agent response with `"ok": false` is also
    /// treated as a failed attempt and retried — matching the reference
    /// behavior where `must_ok=True` calls (remote down/up during a
    /// coordinated reset) must succeed or the whole reset aborts, while
    /// `must_ok=False` calls (best-effort rollback) accept whatever the Agent
    /// reports.
    pub async fn call(
        &self,
        path: &str,
        iface: &str,
        must_ok: bool,
    ) -> Result<AgentResult, AgentClientError> {
        let command_id = uuid::Uuid::new_v4().to_string();
        let request = WireRequest {
            command_id: command_id.clone(),
            iface: iface.to_string(),
        };
        let body = serde_json::to_vec(&request).map_err(AgentClientError::Encode)?;

        let mut backoff_ms = self.base_backoff_ms;
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            match self.try_once(path, &body, must_ok).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        path,
                        error = %e,
                        "agent call failed"
                    );
                    last_err = Some(e);
                    if attempt == self.max_attempts {
                        break;
                    }
                    tokio::time::sleep(jittered(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.max_backoff_ms);
                }
            }
        }

        Err(AgentClientError::ExhaustedRetries(Box::new(
            last_err.expect("at least one attempt is always made"),
        )))
    }

    async fn try_once(
        &self,
        path: &str,
        body: &[u8],
        must_ok: bool,
    ) -> Result<AgentResult, AgentClientError> {
        let ts = now_unix().to_string();
        let sig = hmac_sign(&self.secret, body, &ts);

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .header("content-type", "application/json")
            .header("x-ts", &ts)
            .header("x-sig", &sig)
            .body(body.to_vec())
            .send()
            .await
            .map_err(AgentClientError::Request)?;

        let status = resp.status();
        let text = resp.text().await.map_err(AgentClientError::Request)?;

        if !status.is_success() {
            return Err(AgentClientError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let result: AgentResult =
            serde_json::from_str(&text).map_err(|e| AgentClientError::Decode(e.to_string()))?;

        if must_ok && !result.ok {
            return Err(AgentClientError::AgentRejected(
                result.error.clone().unwrap_or_else(|| "agent error".to_string()),
            ));
        }

        Ok(result)
    }
}

/// Sleep for `base_ms` scaled by a random factor in `[0.7, 1.3)`.
fn jittered(base_ms: u64) -> Duration {
    let factor = rand::thread_rng().gen_range(0.7..1.3);
    Duration::from_millis((base_ms as f64 * factor) as u64)
}

#[derive(Serialize)]
struct WireRequest {
    command_id: String,
    iface: String,
}

/// Errors from a single [`AgentRpcClient::call`] attempt, or the retries
/// wrapper around them.
#[derive(Debug)]
pub enum AgentClientError {
    Encode(serde_json::Error),
    Request(reqwest::Error),
    HttpStatus { status: u16, body: String },
    Decode(String),
    AgentRejected(String),
    ExhaustedRetries(Box<AgentClientError>),
}

impl std::fmt::Display for AgentClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentClientError::Encode(e) => write!(f, "failed to encode request: {e}"),
            AgentClientError::Request(e) => write!(f, "HTTP request failed: {e}"),
            AgentClientError::HttpStatus { status, body } => {
                write!(f, "agent returned HTTP {status}: {body}")
            }
            AgentClientError::Decode(e) => write!(f, "failed to decode agent response: {e}"),
            AgentClientError::AgentRejected(e) => write!(f, "agent reported failure: {e}"),
            AgentClientError::ExhaustedRetries(inner) => {
                write!(f, "agent call failed after retries: {inner}")
            }
        }
    }
}

impl std::error::Error for AgentClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_stays_within_expected_band() {
        for _ in 0..100 {
            let d = jittered(1000);
            assert!(d.as_millis() >= 700 && d.as_millis() < 1300);
        }
    }
}
