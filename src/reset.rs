//! The coordinated two-endpoint reset sequence.
//!
//! Ordering rationale (unchanged from the reference): remote goes down
//! first so the far side stops forwarding into a half-torn tunnel; local
//! comes up before remote so the local side is ready to receive the moment
//! the remote re-establishes, rather than racing a window where remote is up
//! and local isn't.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent_client::AgentRpcClient;
use crate::config::CoordinatorConfig;
use crate::linkctl::LinkController;
use crate::state::{AppState, EventKind, TunnelStatus};

/// Prune timestamps older than 30 minutes from a reset-rate-limit window.
fn prune_window(times: &[u64], now: u64) -> Vec<u64> {
    let cutoff = now.saturating_sub(30 * 60);
    times.iter().copied().filter(|t| *t >= cutoff).collect()
}

/// Runs the full coordinated reset for tunnel `tunnel_id`, serialized by
/// `lock` so a manual reset can never interleave with an automatic one for
/// the same tunnel.
///
/// The lock is held for the entire sequence, including the hold-sleep — this
/// is deliberate: a second reset request arriving mid-flight must wait for
/// the first to finish rather than racing it.
pub async fn coordinated_reset(
    tunnel_id: u32,
    iface_local: String,
    iface_remote: String,
    state: &Arc<Mutex<AppState>>,
    cfg: &CoordinatorConfig,
    agent: &AgentRpcClient,
    linkctl: &dyn LinkController,
    lock: Arc<tokio::sync::Mutex<()>>,
) {
    let _guard = lock.lock().await;
    let now = crate::state::now_unix();

    {
        let mut st = state.lock().await;
        let Some(t) = st.tunnel(tunnel_id) else {
            return;
        };
        if t.paused_until > now {
            st.add_event(
                EventKind::Info,
                "reset skipped (paused)",
                Some(tunnel_id),
                None,
            );
            return;
        }
    }

    {
        let mut st = state.lock().await;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.status = TunnelStatus::Resetting;
            t.last_action = "reset_start".to_string();
            t.last_reset_started_at = now;
        }
        st.add_event(EventKind::Action, "reset started", Some(tunnel_id), None);
    }

    // Rate-limit window check.
    {
        let mut st = state.lock().await;
        let pruned = st
            .tunnel(tunnel_id)
            .map(|t| prune_window(&t.resets_window, now))
            .unwrap_or_default();
        let over_limit = pruned.len() >= cfg.max_resets_per_30min;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.resets_window = pruned;
            if over_limit {
                t.paused_until = now + cfg.pause_after_limit_min * 60;
                t.status = TunnelStatus::Paused;
                t.last_action = "paused_due_to_rate_limit".to_string();
            }
        }
        if over_limit {
            st.add_event(
                EventKind::Warn,
                "paused due to reset rate limit",
                Some(tunnel_id),
                None,
            );
            return;
        }
    }

    // Step 1: remote down. Abort with no rollback if this fails — nothing
    // has changed locally yet.
    if let Err(e) = agent.call("/v1/iface/down", &iface_remote, true).await {
        let mut st = state.lock().await;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.status = TunnelStatus::Error;
            t.last_action = "remote_down_failed".to_string();
            t.last_error = e.to_string();
        }
        st.add_event(
            EventKind::Error,
            format!("remote down failed: {e}"),
            Some(tunnel_id),
            None,
        );
        return;
    }

    // Step 2: local down. On failure, try to roll back the remote side.
    if let Err(e) = linkctl.set(&iface_local, false).await {
        let mut st = state.lock().await;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.status = TunnelStatus::Error;
            t.last_action = "local_down_failed".to_string();
            t.last_error = e.to_string();
        }
        st.add_event(
            EventKind::Error,
            format!("local down failed: {e}"),
            Some(tunnel_id),
            None,
        );
        let _ = agent.call("/v1/iface/up", &iface_remote, false).await;
        return;
    }

    // Step 3: hold both ends down.
    tokio::time::sleep(tokio::time::Duration::from_secs(cfg.down_hold_sec)).await;

    // Step 4: local up.
    if let Err(e) = linkctl.set(&iface_local, true).await {
        let mut st = state.lock().await;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.status = TunnelStatus::Error;
            t.last_action = "local_up_failed".to_string();
            t.last_error = e.to_string();
        }
        st.add_event(
            EventKind::Error,
            format!("local up failed: {e}"),
            Some(tunnel_id),
            None,
        );
        return;
    }

    // Step 5: gap, then remote up.
    tokio::time::sleep(tokio::time::Duration::from_secs(cfg.up_gap_sec)).await;
    if let Err(e) = agent.call("/v1/iface/up", &iface_remote, true).await {
        let mut st = state.lock().await;
        if let Some(t) = st.tunnel_mut(tunnel_id) {
            t.status = TunnelStatus::Error;
            t.last_action = "remote_up_failed".to_string();
            t.last_error = e.to_string();
        }
        st.add_event(
            EventKind::Error,
            format!("remote up failed: {e}"),
            Some(tunnel_id),
            None,
        );
        return;
    }

    let finished_at = crate::state::now_unix();
    let mut st = state.lock().await;
    if let Some(t) = st.tunnel_mut(tunnel_id) {
        t.resets_window.push(finished_at);
        t.bad_rounds = 0;
        t.status = TunnelStatus::Ok;
        t.last_action = "reset_done".to_string();
        t.last_error.clear();
        t.last_reset_finished_at = finished_at;
    }
    st.add_event(EventKind::Action, "reset done", Some(tunnel_id), None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_window_drops_entries_older_than_30_minutes() {
        let now = 10_000u64;
        let times = vec![now - 31 * 60, now - 29 * 60, now - 10];
        let pruned = prune_window(&times, now);
        assert_eq!(pruned, vec![now - 29 * 60, now - 10]);
    }

    #[test]
    fn prune_window_keeps_everything_within_range() {
        let now = 10_000u64;
        let times = vec![now - 100, now];
        assert_eq!(prune_window(&times, now), times);
    }
}
