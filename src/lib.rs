#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! greguard library — exposes the building blocks shared by the `coordinator`
//! and `agent` roles.
//!
//! - `model` — tunnel descriptor and wire-level value types
//! - `state` — per-tunnel status, counters, event log, atomic persistence
//! - `config` — configuration loading for both roles
//! - `security` — HMAC request signing/verification and CIDR allow-listing
//! - `auth` — axum middleware built on `security`: Agent RPC signature
//!   enforcement and the control surface's bearer token check
//! - `discovery` — tunnel discovery from OS link tables
//! - `linkctl` — local interface up/down control
//! - `probe` — outer/inner packet-loss measurement
//! - `classify` — loss-pair to tunnel-condition mapping
//! - `scheduler` — periodic discover/probe/classify/reset loop
//! - `reset` — the coordinated two-endpoint reset sequence
//! - `idempotency` — the Agent's command de-duplication store
//! - `agent_client` — signed, retrying RPC client used by the Coordinator
//! - `routes` — Agent RPC server and Coordinator manual-control handlers
//! - `supervisor` — crash-restart supervisor shared by both roles

pub mod agent_client;
pub mod auth;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod idempotency;
pub mod linkctl;
pub mod model;
pub mod probe;
pub mod reset;
pub mod routes;
pub mod scheduler;
pub mod security;
pub mod state;
pub mod supervisor;

pub use config::Config;
pub use state::{AppState, StateStore};
