//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `GREGUARD_SHARED_SECRET`, `GREGUARD_LISTEN`,
//!    `GREGUARD_CONTROL_TOKEN`
//! 2. **Config file** — path via `--config <path>`, or `greguard.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [coordinator]
//! listen = "0.0.0.0:8700"
//! agent_base_url = "https://peer.example.net:8701"
//! loss_ok_percent = 20.0
//! ping_count = 5
//! ping_timeout_sec = 3
//! check_interval_sec = 30
//! confirm_bad_rounds = 3
//! down_hold_sec = 20
//! up_gap_sec = 5
//! max_resets_per_30min = 3
//! pause_after_limit_min = 60
//!
//! [rpc]
//! timeout_sec = 15
//! max_attempts = 4
//! base_backoff_ms = 500
//! max_backoff_ms = 8000
//!
//! [security]
//! shared_secret = "change-me"
//! max_clock_skew_sec = 30
//!
//! [agent]
//! listen = "0.0.0.0:8701"
//! allow_cidrs = ["10.0.0.0/8"]
//! idempotency_ttl_sec = 3600
//!
//! [control]
//! token = "change-me-too"
//! listen = "127.0.0.1:8702"
//!
//! [state]
//! path = "/var/lib/greguard/state.json"
//!
//! [logging]
//! level = "info"
//!
//! [supervisor]
//! max_backoff_sec = 60
//! stable_threshold_sec = 60
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML. Shared by both the
/// `coordinator` and `agent` roles — each role reads only the sections it
/// needs and ignores the rest.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Scheduler, classifier, and reset-orchestrator thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Socket address the manual-control-free part of the coordinator binds
    /// (reserved for future peer-to-peer use; the manual control surface has
    /// its own listen address, see [`ControlConfig::listen`]).
    #[serde(default = "default_coordinator_listen")]
    pub listen: String,
    /// Base URL of this tunnel's peer Agent, e.g. `https://10.1.2.2:8701`.
    #[serde(default = "default_agent_base_url")]
    pub agent_base_url: String,
    /// Packet loss at/below this percentage counts as "ok" (default 20.0).
    #[serde(default = "default_loss_ok_percent")]
    pub loss_ok_percent: f64,
    /// Pings sent per probe (default 5).
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    /// Per-probe ping timeout in seconds (default 3).
    #[serde(default = "default_ping_timeout_sec")]
    pub ping_timeout_sec: u64,
    /// Seconds between scheduler sweeps (default 30).
    #[serde(default = "default_check_interval_sec")]
    pub check_interval_sec: u64,
    /// Consecutive bad rounds required before a reset is triggered (default 3).
    #[serde(default = "default_confirm_bad_rounds")]
    pub confirm_bad_rounds: u32,
    /// Seconds both interfaces stay down during a reset (default 20).
    #[serde(default = "default_down_hold_sec")]
    pub down_hold_sec: u64,
    /// Seconds between bringing the local interface up and the remote one
    /// (default 5).
    #[serde(default = "default_up_gap_sec")]
    pub up_gap_sec: u64,
    /// Maximum automatic resets allowed within a rolling 30-minute window
    /// before a tunnel is paused (default 3).
    #[serde(default = "default_max_resets_per_30min")]
    pub max_resets_per_30min: usize,
    /// Minutes a tunnel stays paused after hitting the reset-rate limit
    /// (default 60).
    #[serde(default = "default_pause_after_limit_min")]
    pub pause_after_limit_min: u64,
}

/// Agent RPC client retry behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Per-attempt request timeout in seconds (default 15).
    #[serde(default = "default_rpc_timeout_sec")]
    pub timeout_sec: u64,
    /// Maximum attempts, including the first, before giving up (default 4).
    #[serde(default = "default_rpc_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in milliseconds before jitter (default 500).
    #[serde(default = "default_rpc_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff ceiling in milliseconds (default 8000).
    #[serde(default = "default_rpc_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Request-signing settings, shared by the RPC client and server.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Pre-shared HMAC key. Override with `GREGUARD_SHARED_SECRET`.
    /// Defaults to `"change-me"`, which triggers a startup warning.
    #[serde(default = "default_shared_secret")]
    pub shared_secret: String,
    /// Maximum allowed difference between a request's `x-ts` header and the
    /// receiver's clock, in seconds (default 30).
    #[serde(default = "default_max_clock_skew_sec")]
    pub max_clock_skew_sec: i64,
}

/// Agent RPC server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Socket address the Agent RPC server binds (default `0.0.0.0:8701`).
    #[serde(default = "default_agent_listen")]
    pub listen: String,
    /// CIDR blocks allowed to reach the Agent RPC server. Empty means allow
    /// any source (not recommended).
    #[serde(default)]
    pub allow_cidrs: Vec<String>,
    /// Seconds an idempotency entry is retained before garbage collection
    /// (default 3600).
    #[serde(default = "default_idempotency_ttl_sec")]
    pub idempotency_ttl_sec: u64,
}

/// Manual control surface settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Bearer token for `POST /control/action`. Override with
    /// `GREGUARD_CONTROL_TOKEN`. Defaults to `"change-me-too"`.
    #[serde(default = "default_control_token")]
    pub token: String,
    /// Socket address the control surface binds (default `127.0.0.1:8702`).
    #[serde(default = "default_control_listen")]
    pub listen: String,
}

/// State-file location.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Path to the persisted JSON state document.
    #[serde(default = "default_state_path")]
    pub path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Supervisor settings for `greguard coordinator supervise` /
/// `greguard agent supervise`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum seconds between restart attempts (default 60).
    #[serde(default = "default_supervisor_max_backoff_sec")]
    pub max_backoff_sec: u64,
    /// Seconds of uptime before resetting backoff (default 60).
    #[serde(default = "default_supervisor_stable_threshold_sec")]
    pub stable_threshold_sec: u64,
}

fn default_coordinator_listen() -> String {
    "0.0.0.0:8700".to_string()
}
fn default_agent_base_url() -> String {
    "https://127.0.0.1:8701".to_string()
}
fn default_loss_ok_percent() -> f64 {
    20.0
}
fn default_ping_count() -> u32 {
    5
}
fn default_ping_timeout_sec() -> u64 {
    3
}
fn default_check_interval_sec() -> u64 {
    30
}
fn default_confirm_bad_rounds() -> u32 {
    3
}
fn default_down_hold_sec() -> u64 {
    20
}
fn default_up_gap_sec() -> u64 {
    5
}
fn default_max_resets_per_30min() -> usize {
    3
}
fn default_pause_after_limit_min() -> u64 {
    60
}
fn default_rpc_timeout_sec() -> u64 {
    15
}
fn default_rpc_max_attempts() -> u32 {
    4
}
fn default_rpc_base_backoff_ms() -> u64 {
    500
}
fn default_rpc_max_backoff_ms() -> u64 {
    8000
}
fn default_shared_secret() -> String {
    "change-me".to_string()
}
fn default_max_clock_skew_sec() -> i64 {
    30
}
fn default_agent_listen() -> String {
    "0.0.0.0:8701".to_string()
}
fn default_idempotency_ttl_sec() -> u64 {
    3600
}
fn default_control_token() -> String {
    "change-me-too".to_string()
}
fn default_control_listen() -> String {
    "127.0.0.1:8702".to_string()
}
fn default_state_path() -> String {
    "/var/lib/greguard/state.json".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_supervisor_max_backoff_sec() -> u64 {
    60
}
fn default_supervisor_stable_threshold_sec() -> u64 {
    60
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen: default_coordinator_listen(),
            agent_base_url: default_agent_base_url(),
            loss_ok_percent: default_loss_ok_percent(),
            ping_count: default_ping_count(),
            ping_timeout_sec: default_ping_timeout_sec(),
            check_interval_sec: default_check_interval_sec(),
            confirm_bad_rounds: default_confirm_bad_rounds(),
            down_hold_sec: default_down_hold_sec(),
            up_gap_sec: default_up_gap_sec(),
            max_resets_per_30min: default_max_resets_per_30min(),
            pause_after_limit_min: default_pause_after_limit_min(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_sec: default_rpc_timeout_sec(),
            max_attempts: default_rpc_max_attempts(),
            base_backoff_ms: default_rpc_base_backoff_ms(),
            max_backoff_ms: default_rpc_max_backoff_ms(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: default_shared_secret(),
            max_clock_skew_sec: default_max_clock_skew_sec(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: default_agent_listen(),
            allow_cidrs: Vec::new(),
            idempotency_ttl_sec: default_idempotency_ttl_sec(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            token: default_control_token(),
            listen: default_control_listen(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff_sec: default_supervisor_max_backoff_sec(),
            stable_threshold_sec: default_supervisor_stable_threshold_sec(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            rpc: RpcConfig::default(),
            security: SecurityConfig::default(),
            agent: AgentConfig::default(),
            control: ControlConfig::default(),
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `greguard.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("greguard.toml").exists() {
            let content =
                std::fs::read_to_string("greguard.toml").expect("Failed to read greguard.toml");
            toml::from_str(&content).expect("Failed to parse greguard.toml")
        } else {
            Config::default()
        };

        if let Ok(secret) = std::env::var("GREGUARD_SHARED_SECRET") {
            config.security.shared_secret = secret;
        }
        if let Ok(listen) = std::env::var("GREGUARD_LISTEN") {
            config.agent.listen = listen;
        }
        if let Ok(token) = std::env::var("GREGUARD_CONTROL_TOKEN") {
            config.control.token = token;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.coordinator.confirm_bad_rounds, 3);
        assert_eq!(config.coordinator.max_resets_per_30min, 3);
        assert_eq!(config.rpc.max_attempts, 4);
        assert_eq!(config.security.shared_secret, "change-me");
        assert!(config.agent.allow_cidrs.is_empty());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let toml_src = r#"
            [coordinator]
            loss_ok_percent = 10.0
        "#;
        let config: Config = toml::from_str(toml_src).expect("parse");
        assert_eq!(config.coordinator.loss_ok_percent, 10.0);
        assert_eq!(config.coordinator.check_interval_sec, 30);
        assert_eq!(config.agent.listen, "0.0.0.0:8701");
    }
}
