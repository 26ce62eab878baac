//! Per-tunnel status, counters, and the bounded event log, atomically
//! persisted to a single JSON document.
//!
//! ## Design
//!
//! - **Atomic writes**: [`StateStore::save`] writes to a sibling `.tmp` path
//!   and renames over the target, so a reader never observes a partial
//!   write — either the prior snapshot or the new one, never both mixed.
//! - **Best-effort load**: a missing or unreadable file yields an empty
//!   [`AppState`] rather than an error; there is nothing sensible to recover
//!   to on first run.
//! - **Bounded event ring**: `events` is truncated to [`MAX_EVENTS`] on every
//!   save, oldest first.
//! - **No cross-process locking**: exactly one Coordinator process owns the
//!   state file, so in-process synchronization (a `tokio::sync::Mutex`
//!   wrapping the whole [`AppState`]) is sufficient.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::TunnelDescriptor;

/// Maximum number of events retained in the ring buffer.
pub const MAX_EVENTS: usize = 2000;

/// Tunnel health classification, see [`crate::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunnelStatus {
    Init,
    Ok,
    FilteredOrDown,
    PublicOkGreBad,
    WeirdPublicBadGreOk,
    Resetting,
    Error,
    Paused,
    PausedManual,
}

impl Default for TunnelStatus {
    fn default() -> Self {
        Self::Init
    }
}

/// Persisted, cumulative state for a single tunnel id.
///
/// Descriptor fields (`iface_local`, `peer_public`, ...) are refreshed on
/// every discovery pass. Measurement and status fields are mutated only by
/// the Scheduler or the Reset Orchestrator for this tunnel id, never both at
/// once — the per-tunnel mutex in [`crate::scheduler::TunnelLocks`]
/// guarantees that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelState {
    pub id: u32,
    pub iface_local: String,
    pub iface_remote: String,
    pub peer_public: String,
    pub local_private: String,
    pub peer_private: String,

    #[serde(default)]
    pub status: TunnelStatus,
    #[serde(default)]
    pub bad_rounds: u32,
    #[serde(default)]
    pub last_seen: u64,
    #[serde(default = "default_loss")]
    pub last_public_loss: f64,
    #[serde(default = "default_loss")]
    pub last_gre_loss: f64,
    #[serde(default = "default_dash")]
    pub last_action: String,
    #[serde(default)]
    pub last_error: String,
    /// Absolute unix-seconds timestamp. While `> now`, no automatic reset is
    /// attempted for this tunnel.
    #[serde(default)]
    pub paused_until: u64,
    /// Reset-start timestamps (unix seconds) within the last 30 minutes.
    #[serde(default)]
    pub resets_window: Vec<u64>,
    #[serde(default)]
    pub last_reset_started_at: u64,
    #[serde(default)]
    pub last_reset_finished_at: u64,
}

fn default_loss() -> f64 {
    100.0
}

fn default_dash() -> String {
    "-".to_string()
}

impl TunnelState {
    /// Create a freshly-discovered tunnel's state, in `INIT` status.
    pub fn new(descriptor: &TunnelDescriptor) -> Self {
        Self {
            id: descriptor.id,
            iface_local: descriptor.iface_local.clone(),
            iface_remote: descriptor.iface_remote.clone(),
            peer_public: descriptor.peer_public.clone(),
            local_private: descriptor.local_private.clone(),
            peer_private: descriptor.peer_private.clone(),
            status: TunnelStatus::Init,
            bad_rounds: 0,
            last_seen: 0,
            last_public_loss: default_loss(),
            last_gre_loss: default_loss(),
            last_action: default_dash(),
            last_error: String::new(),
            paused_until: 0,
            resets_window: Vec::new(),
            last_reset_started_at: 0,
            last_reset_finished_at: 0,
        }
    }

    /// Refresh the fields that discovery owns, leaving measurement/status
    /// fields untouched.
    pub fn refresh_descriptor(&mut self, descriptor: &TunnelDescriptor) {
        self.iface_local = descriptor.iface_local.clone();
        self.iface_remote = descriptor.iface_remote.clone();
        self.peer_public = descriptor.peer_public.clone();
        self.local_private = descriptor.local_private.clone();
        self.peer_private = descriptor.peer_private.clone();
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warn,
    Error,
    Action,
}

/// One entry in the bounded event ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// The full persisted document: every tunnel's state, plus the event ring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub tunnels: HashMap<String, TunnelState>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl AppState {
    /// Append an event, evicting the oldest entries beyond [`MAX_EVENTS`].
    pub fn add_event(
        &mut self,
        kind: EventKind,
        message: impl Into<String>,
        tunnel_id: Option<u32>,
        extra: Option<serde_json::Value>,
    ) {
        let timestamp = now_unix();
        self.events.push(Event {
            timestamp,
            kind,
            message: message.into(),
            tunnel_id,
            extra,
        });
        if self.events.len() > MAX_EVENTS {
            let excess = self.events.len() - MAX_EVENTS;
            self.events.drain(0..excess);
        }
    }

    pub fn tunnel(&self, id: u32) -> Option<&TunnelState> {
        self.tunnels.get(&id.to_string())
    }

    pub fn tunnel_mut(&mut self, id: u32) -> Option<&mut TunnelState> {
        self.tunnels.get_mut(&id.to_string())
    }
}

/// Current unix time in whole seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Load/save wrapper around a fixed state-file path. Cloneable — all clones
/// share the same path, not any in-memory state (the state itself is held by
/// the caller, typically inside a `tokio::sync::Mutex<AppState>`).
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Best-effort load: a missing or unreadable/unparseable file yields an
    /// empty [`AppState`] rather than propagating an error. There is no
    /// sensible fallback on first run other than "start empty".
    pub fn load(&self) -> AppState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<AppState>(&raw) {
                Ok(mut state) => {
                    if state.events.len() > MAX_EVENTS {
                        let excess = state.events.len() - MAX_EVENTS;
                        state.events.drain(0..excess);
                    }
                    state
                }
                Err(e) => {
                    tracing::warn!(
                        "state file {} is unparseable: {e}, starting empty",
                        self.path.display()
                    );
                    AppState::default()
                }
            },
            Err(_) => AppState::default(),
        }
    }

    /// Write-temp-then-rename. Readers observe either the prior complete
    /// snapshot or the new complete one, never a partial write.
    pub fn save(&self, state: &AppState) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = Self::tmp_path(&self.path);
        let raw = serde_json::to_vec(state)?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> TunnelDescriptor {
        TunnelDescriptor {
            id: 7,
            iface_local: "gre-ir-7".to_string(),
            iface_remote: "gre-kh-7".to_string(),
            peer_public: "203.0.113.5".to_string(),
            local_private: "10.10.7.1".to_string(),
            peer_private: "10.10.7.2".to_string(),
        }
    }

    #[test]
    fn load_missing_file_yields_empty_state() {
        let store = StateStore::new("/nonexistent/path/does-not-exist.json");
        let state = store.load();
        assert!(state.tunnels.is_empty());
        assert!(state.events.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);

        let mut state = AppState::default();
        let descriptor = sample_descriptor();
        let mut tstate = TunnelState::new(&descriptor);
        tstate.status = TunnelStatus::Ok;
        tstate.resets_window = vec![1, 2, 3];
        state.tunnels.insert(descriptor.id.to_string(), tstate);
        state.add_event(EventKind::Info, "tunnel discovered", Some(7), None);

        store.save(&state).expect("save");
        let loaded = store.load();

        assert_eq!(loaded.tunnels.len(), 1);
        let loaded_tunnel = loaded.tunnel(7).expect("tunnel 7 present");
        assert_eq!(loaded_tunnel.status, TunnelStatus::Ok);
        assert_eq!(loaded_tunnel.resets_window, vec![1, 2, 3]);
        assert_eq!(loaded.events.len(), 1);
    }

    #[test]
    fn event_ring_is_truncated_to_max() {
        let mut state = AppState::default();
        for i in 0..MAX_EVENTS + 50 {
            state.add_event(EventKind::Info, format!("event {i}"), None, None);
        }
        assert_eq!(state.events.len(), MAX_EVENTS);
        assert_ne!(state.events[0].message, "event 0");
    }

    #[test]
    fn corrupt_state_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json at all").expect("write garbage");
        let store = StateStore::new(&path);
        let state = store.load();
        assert!(state.tunnels.is_empty());
    }
}
