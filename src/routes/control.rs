//! Manual control surface: `POST /control/action`.
//!
//! Accepts `pause`, `resume`, `reset`, `down`, `up`, `restart`, and
//! `reset_all`. `down`/`up`/`restart` call the Agent and local interface
//! operator directly (the same must_ok semantics the reset orchestrator
//! uses) but are **not** subject to the per-tunnel reset-rate-limit window.
//! `reset`/`reset_all` go through the ordinary [`crate::reset::coordinated_reset`]
//! and so are subject to both the mutex and the rate limit.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agent_client::AgentRpcClient;
use crate::config::CoordinatorConfig;
use crate::linkctl::LinkController;
use crate::model::TunnelDescriptor;
use crate::reset::coordinated_reset;
use crate::scheduler::TunnelLocks;
use crate::state::{AppState, EventKind, StateStore, TunnelStatus};

/// One year in seconds — the reference implementation's "paused
/// indefinitely until manually resumed" sentinel.
const MANUAL_PAUSE_SECS: u64 = 365 * 24 * 3600;

#[derive(Clone)]
pub struct ControlRouterState {
    pub state: Arc<Mutex<AppState>>,
    pub store: StateStore,
    pub cfg: CoordinatorConfig,
    pub agent: Arc<AgentRpcClient>,
    pub linkctl: Arc<dyn LinkController>,
    pub locks: TunnelLocks,
    /// Current tunnel descriptors, refreshed by the scheduler's discovery
    /// pass. `down`/`up`/`restart`/`reset` need `iface_local`/`iface_remote`
    /// for a specific tunnel id.
    pub descriptors: Arc<Mutex<Vec<TunnelDescriptor>>>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub tunnel_id: Option<u32>,
}

/// `POST /control/action`
pub async fn action(
    State(state): State<ControlRouterState>,
    Json(req): Json<ActionRequest>,
) -> Json<Value> {
    let result = dispatch(&state, &req.action, req.tunnel_id).await;
    Json(json!({
        "ok": result.is_ok(),
        "action": req.action,
        "tunnel_id": req.tunnel_id,
        "error": result.err(),
    }))
}

async fn dispatch(
    state: &ControlRouterState,
    action: &str,
    tunnel_id: Option<u32>,
) -> Result<(), String> {
    match action {
        "pause" => pause(state, tunnel_id.ok_or("tunnel_id required")?).await,
        "resume" => resume(state, tunnel_id.ok_or("tunnel_id required")?).await,
        "reset" => reset_one(state, tunnel_id.ok_or("tunnel_id required")?).await,
        "reset_all" => reset_all(state).await,
        "down" => iface_action(state, tunnel_id.ok_or("tunnel_id required")?, IfaceAction::Down).await,
        "up" => iface_action(state, tunnel_id.ok_or("tunnel_id required")?, IfaceAction::Up).await,
        "restart" => {
            iface_action(state, tunnel_id.ok_or("tunnel_id required")?, IfaceAction::Restart).await
        }
        other => Err(format!("unknown action: {other}")),
    }
}

async fn pause(state: &ControlRouterState, tunnel_id: u32) -> Result<(), String> {
    let mut st = state.state.lock().await;
    let now = crate::state::now_unix();
    let Some(t) = st.tunnel_mut(tunnel_id) else {
        return Err("unknown tunnel".to_string());
    };
    t.paused_until = now + MANUAL_PAUSE_SECS;
    t.status = TunnelStatus::PausedManual;
    st.add_event(EventKind::Info, "paused manually", Some(tunnel_id), None);
    persist(state, &st);
    Ok(())
}

async fn resume(state: &ControlRouterState, tunnel_id: u32) -> Result<(), String> {
    let mut st = state.state.lock().await;
    let Some(t) = st.tunnel_mut(tunnel_id) else {
        return Err("unknown tunnel".to_string());
    };
    t.paused_until = 0;
    st.add_event(EventKind::Info, "resumed manually", Some(tunnel_id), None);
    persist(state, &st);
    Ok(())
}

async fn reset_one(state: &ControlRouterState, tunnel_id: u32) -> Result<(), String> {
    let descriptor = find_descriptor(state, tunnel_id).await?;
    let lock = crate::scheduler::lock_for(&state.locks, tunnel_id).await;
    state.state.lock().await.add_event(
        EventKind::Action,
        "manual reset triggered",
        Some(tunnel_id),
        None,
    );
    coordinated_reset(
        tunnel_id,
        descriptor.iface_local,
        descriptor.iface_remote,
        &state.state,
        &state.cfg,
        &state.agent,
        state.linkctl.as_ref(),
        lock,
    )
    .await;
    let st = state.state.lock().await;
    persist(state, &st);
    Ok(())
}

async fn reset_all(state: &ControlRouterState) -> Result<(), String> {
    let descriptors = state.descriptors.lock().await.clone();
    for descriptor in &descriptors {
        let lock = crate::scheduler::lock_for(&state.locks, descriptor.id).await;
        let d = descriptor.clone();
        let s = state.state.clone();
        let cfg = state.cfg.clone();
        let agent = state.agent.clone();
        let linkctl = state.linkctl.clone();
        tokio::spawn(async move {
            coordinated_reset(
                d.id,
                d.iface_local,
                d.iface_remote,
                &s,
                &cfg,
                &agent,
                linkctl.as_ref(),
                lock,
            )
            .await;
        });
    }
    let mut st = state.state.lock().await;
    st.add_event(EventKind::Action, "reset all triggered", None, None);
    persist(state, &st);
    Ok(())
}

enum IfaceAction {
    Down,
    Up,
    Restart,
}

async fn iface_action(
    state: &ControlRouterState,
    tunnel_id: u32,
    kind: IfaceAction,
) -> Result<(), String> {
    let descriptor = find_descriptor(state, tunnel_id).await?;
    let outcome: Result<(), String> = async {
        match kind {
            IfaceAction::Down => {
                state
                    .agent
                    .call("/v1/iface/down", &descriptor.iface_remote, true)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .linkctl
                    .set(&descriptor.iface_local, false)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            IfaceAction::Up => {
                state
                    .linkctl
                    .set(&descriptor.iface_local, true)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .agent
                    .call("/v1/iface/up", &descriptor.iface_remote, true)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            IfaceAction::Restart => {
                state
                    .agent
                    .call("/v1/iface/restart", &descriptor.iface_remote, true)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .linkctl
                    .set(&descriptor.iface_local, false)
                    .await
                    .map_err(|e| e.to_string())?;
                state
                    .linkctl
                    .set(&descriptor.iface_local, true)
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
    .await;

    let mut st = state.state.lock().await;
    match &outcome {
        Ok(()) => st.add_event(
            EventKind::Action,
            "manual iface action ok",
            Some(tunnel_id),
            None,
        ),
        Err(e) => st.add_event(
            EventKind::Error,
            format!("manual action failed: {e}"),
            Some(tunnel_id),
            None,
        ),
    }
    persist(state, &st);
    outcome
}

async fn find_descriptor(
    state: &ControlRouterState,
    tunnel_id: u32,
) -> Result<TunnelDescriptor, String> {
    state
        .descriptors
        .lock()
        .await
        .iter()
        .find(|d| d.id == tunnel_id)
        .cloned()
        .ok_or_else(|| "unknown tunnel".to_string())
}

fn persist(state: &ControlRouterState, app_state: &AppState) {
    if let Err(e) = state.store.save(app_state) {
        tracing::error!(error = %e, "failed to persist state after manual action");
    }
}
