//! The Agent's command de-duplication store.
//!
//! A retried RPC call carries the same `command_id` on every attempt, so a
//! request that the Agent actually executed but whose response was lost in
//! transit doesn't get re-executed — it gets the cached result replayed.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::AgentResult;
use crate::state::now_unix;

struct Entry {
    recorded_at: u64,
    result: AgentResult,
}

/// Maps `command_id` to the [`AgentResult`] it produced, garbage-collected by
/// age on every access.
pub struct IdempotencyStore {
    ttl_sec: u64,
    entries: Mutex<HashMap<String, Entry>>,
}

impl IdempotencyStore {
    pub fn new(ttl_sec: u64) -> Self {
        Self {
            ttl_sec,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a previously recorded result for `command_id`, if still live.
    pub fn get(&self, command_id: &str) -> Option<AgentResult> {
        let mut entries = self.entries.lock().expect("idempotency store lock");
        self.gc(&mut entries);
        entries.get(command_id).map(|e| e.result.clone())
    }

    /// Record the result of executing `command_id`.
    pub fn set(&self, command_id: &str, result: AgentResult) {
        let mut entries = self.entries.lock().expect("idempotency store lock");
        self.gc(&mut entries);
        entries.insert(
            command_id.to_string(),
            Entry {
                recorded_at: now_unix(),
                result,
            },
        );
    }

    fn gc(&self, entries: &mut HashMap<String, Entry>) {
        let now = now_unix();
        entries.retain(|_, e| now.saturating_sub(e.recorded_at) <= self.ttl_sec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(command_id: &str) -> AgentResult {
        AgentResult {
            ok: true,
            command_id: command_id.to_string(),
            iface: "gre-kh-7".to_string(),
            out: Some("".to_string()),
            error: None,
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = IdempotencyStore::new(3600);
        store.set("cmd-1", sample_result("cmd-1"));
        let got = store.get("cmd-1").expect("entry present");
        assert_eq!(got.command_id, "cmd-1");
    }

    #[test]
    fn unknown_key_returns_none() {
        let store = IdempotencyStore::new(3600);
        assert!(store.get("never-set").is_none());
    }

    #[test]
    fn expired_entry_is_gced_on_access() {
        let store = IdempotencyStore::new(60);
        store.set("cmd-1", sample_result("cmd-1"));
        {
            let mut entries = store.entries.lock().unwrap();
            let entry = entries.get_mut("cmd-1").unwrap();
            entry.recorded_at = now_unix().saturating_sub(120);
        }
        assert!(store.get("cmd-1").is_none());
    }
}
