//! Periodic discover/probe/classify/reset loop.
//!
//! One sweep: discover tunnels, fold any newly-seen ones into state, probe
//! and classify every tunnel concurrently, dispatch resets for tunnels that
//! just crossed the bad-rounds threshold as background tasks, then persist.
//! A single tunnel's probe or classify failure never aborts the sweep for
//! the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent_client::AgentRpcClient;
use crate::classify::classify;
use crate::config::CoordinatorConfig;
use crate::discovery::Discovery;
use crate::linkctl::LinkController;
use crate::probe::Prober;
use crate::reset::coordinated_reset;
use crate::state::{AppState, EventKind, StateStore, TunnelState, TunnelStatus};

/// Per-tunnel mutexes serializing reset attempts. Keyed by tunnel id, shared
/// between the scheduler's automatic resets and the manual control surface's
/// manual ones.
pub type TunnelLocks = Arc<Mutex<HashMap<u32, Arc<Mutex<()>>>>>;

pub fn new_tunnel_locks() -> TunnelLocks {
    Arc::new(Mutex::new(HashMap::new()))
}

pub async fn lock_for(locks: &TunnelLocks, tunnel_id: u32) -> Arc<Mutex<()>> {
    let mut map = locks.lock().await;
    map.entry(tunnel_id)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Whether the Classifier must leave a tunnel's status/bad_rounds/reset
/// decision alone this sweep. `PAUSED`, `PAUSED_MANUAL`, and `RESETTING`
/// tunnels are only moved out of those states by a manual resume or by the
/// reset orchestrator itself — never by the next sweep's classification.
fn classifier_holds(status: TunnelStatus, paused_until: u64, now: u64) -> bool {
    matches!(
        status,
        TunnelStatus::Paused | TunnelStatus::PausedManual | TunnelStatus::Resetting
    ) || paused_until > now
}

/// Shared dependencies for one scheduler sweep.
pub struct Scheduler {
    pub discovery: Arc<dyn Discovery>,
    pub prober: Arc<dyn Prober>,
    pub linkctl: Arc<dyn LinkController>,
    pub agent: Arc<AgentRpcClient>,
    pub state: Arc<Mutex<AppState>>,
    pub store: StateStore,
    pub locks: TunnelLocks,
    pub cfg: CoordinatorConfig,
}

impl Scheduler {
    /// Run sweeps forever at `cfg.check_interval_sec` intervals.
    pub async fn run(&self) {
        loop {
            self.sweep().await;
            tokio::time::sleep(tokio::time::Duration::from_secs(
                self.cfg.check_interval_sec,
            ))
            .await;
        }
    }

    /// Run a single discover/probe/classify/reset/persist sweep.
    pub async fn sweep(&self) {
        let descriptors = match self.discovery.discover().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "discovery failed, skipping this sweep");
                return;
            }
        };

        self.sync_state(&descriptors).await;

        let mut handles = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let prober = self.prober.clone();
            let state = self.state.clone();
            let cfg = self.cfg.clone();
            let agent = self.agent.clone();
            let linkctl = self.linkctl.clone();
            let locks = self.locks.clone();

            handles.push(tokio::spawn(async move {
                let loss = prober
                    .probe(&descriptor.peer_public, &descriptor.peer_private)
                    .await;
                let classification = classify(loss, cfg.loss_ok_percent);

                let now = crate::state::now_unix();
                let should_reset = {
                    let mut st = state.lock().await;
                    let Some(t) = st.tunnel_mut(descriptor.id) else {
                        return;
                    };
                    t.last_seen = now;
                    t.last_public_loss = loss.public_loss;
                    t.last_gre_loss = loss.gre_loss;

                    if classifier_holds(t.status, t.paused_until, now) {
                        false
                    } else {
                        t.status = classification.status;
                        if classification.increments_bad_rounds {
                            t.bad_rounds += 1;
                            t.last_action = format!("bad_round_{}", t.bad_rounds);
                        } else {
                            t.bad_rounds = 0;
                            t.last_action = "none".to_string();
                        }
                        t.bad_rounds >= cfg.confirm_bad_rounds
                            && classification.status == TunnelStatus::PublicOkGreBad
                    }
                };

                if should_reset {
                    state.lock().await.add_event(
                        EventKind::Warn,
                        "reset triggered (confirmed)",
                        Some(descriptor.id),
                        None,
                    );
                    let lock = lock_for(&locks, descriptor.id).await;
                    tokio::spawn(async move {
                        coordinated_reset(
                            descriptor.id,
                            descriptor.iface_local,
                            descriptor.iface_remote,
                            &state,
                            &cfg,
                            &agent,
                            linkctl.as_ref(),
                            lock,
                        )
                        .await;
                    });
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "tunnel check task panicked");
            }
        }

        let snapshot = self.state.lock().await.clone();
        if let Err(e) = self.store.save(&snapshot) {
            tracing::error!(error = %e, "failed to persist state");
        }
    }

    async fn sync_state(&self, descriptors: &[crate::model::TunnelDescriptor]) {
        let mut st = self.state.lock().await;
        for descriptor in descriptors {
            if let Some(existing) = st.tunnel_mut(descriptor.id) {
                existing.refresh_descriptor(descriptor);
            } else {
                let tunnel_id = descriptor.id;
                st.tunnels
                    .insert(tunnel_id.to_string(), TunnelState::new(descriptor));
                st.add_event(
                    EventKind::Info,
                    "tunnel discovered",
                    Some(tunnel_id),
                    None,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_for_returns_same_mutex_for_same_id() {
        let locks = new_tunnel_locks();
        let a = lock_for(&locks, 7).await;
        let b = lock_for(&locks, 7).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn lock_for_returns_distinct_mutex_for_different_ids() {
        let locks = new_tunnel_locks();
        let a = lock_for(&locks, 7).await;
        let b = lock_for(&locks, 8).await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn classifier_holds_for_paused_statuses() {
        assert!(classifier_holds(TunnelStatus::Paused, 0, 100));
        assert!(classifier_holds(TunnelStatus::PausedManual, 0, 100));
        assert!(classifier_holds(TunnelStatus::Resetting, 0, 100));
    }

    #[test]
    fn classifier_holds_while_paused_until_is_in_the_future() {
        assert!(classifier_holds(TunnelStatus::Ok, 200, 100));
    }

    #[test]
    fn classifier_does_not_hold_a_live_tunnel() {
        assert!(!classifier_holds(TunnelStatus::Ok, 0, 100));
        assert!(!classifier_holds(TunnelStatus::PublicOkGreBad, 50, 100));
    }
}
