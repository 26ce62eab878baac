#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]

//! # greguard
//!
//! Coordinated GRE tunnel health watchdog. Two cooperating roles run on each
//! end of a tunnel:
//!
//! - `greguard coordinator serve` — discovers tunnels, probes them, and
//!   triggers coordinated resets through the peer Agent
//! - `greguard agent serve` — executes signed `ip link set` commands on
//!   behalf of a remote Coordinator
//!
//! Both roles support `supervise` (crash-restart wrapper around `serve`).
//! `greguard ctl` is the operator's CLI against a running Coordinator's
//! manual control surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::post, Extension, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use greguard::agent_client::AgentRpcClient;
use greguard::auth::{require_agent_signature, require_control_token, AgentAuth, ControlToken};
use greguard::discovery::LinkTableDiscovery;
use greguard::idempotency::IdempotencyStore;
use greguard::linkctl::IpLinkController;
use greguard::probe::PingProber;
use greguard::routes::agent::{self, AgentRouterState};
use greguard::routes::control::{self, ControlRouterState};
use greguard::scheduler::{new_tunnel_locks, Scheduler};
use greguard::supervisor::run_supervisor;
use greguard::{AppState, Config, StateStore};

/// The coordinated GRE tunnel health watchdog.
#[derive(Parser)]
#[command(name = "greguard", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as the Coordinator: discovers tunnels, probes them, and triggers
    /// coordinated resets.
    Coordinator {
        #[command(subcommand)]
        action: RoleAction,
    },
    /// Run as the Agent: executes signed local interface commands on behalf
    /// of a peer Coordinator.
    Agent {
        #[command(subcommand)]
        action: RoleAction,
    },
    /// Talk to a running Coordinator's manual control surface.
    Ctl {
        #[command(subcommand)]
        action: CtlAction,
        /// Path to TOML config file, used to resolve the control endpoint
        /// and token.
        #[arg(long, global = true)]
        config: Option<String>,
    },
}

#[derive(Subcommand)]
enum RoleAction {
    /// Run the role's server loop in the foreground.
    Serve {
        #[arg(long)]
        config: Option<String>,
    },
    /// Run as supervisor: starts `serve` and restarts it on crash.
    Supervise {
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Subcommand)]
enum CtlAction {
    /// Print every tunnel's persisted status.
    Status,
    /// Print the most recent events.
    Events {
        #[arg(long, default_value_t = 50)]
        n: usize,
    },
    /// Trigger a reset for one tunnel.
    Reset { tunnel_id: u32 },
    /// Trigger resets for every known tunnel.
    ResetAll,
    /// Bring a tunnel's local and remote interfaces down.
    Down { tunnel_id: u32 },
    /// Bring a tunnel's local and remote interfaces up.
    Up { tunnel_id: u32 },
    /// Restart a tunnel's local and remote interfaces.
    Restart { tunnel_id: u32 },
    /// Pause automatic monitoring for one tunnel.
    Pause { tunnel_id: u32 },
    /// Resume automatic monitoring for one tunnel.
    Resume { tunnel_id: u32 },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Coordinator { action } => match action {
            RoleAction::Serve { config } => run_coordinator(config.as_deref()).await,
            RoleAction::Supervise { config } => {
                run_supervisor_mode("coordinator", config.as_deref()).await
            }
        },
        Commands::Agent { action } => match action {
            RoleAction::Serve { config } => run_agent(config.as_deref()).await,
            RoleAction::Supervise { config } => run_supervisor_mode("agent", config.as_deref()).await,
        },
        Commands::Ctl { action, config } => run_ctl(action, config.as_deref()).await,
    }
}

fn init_tracing(config: &Config) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();
}

async fn run_supervisor_mode(role: &'static str, config_path: Option<&str>) -> ! {
    let config = Config::load(config_path);
    init_tracing(&config);
    info!("greguard {role} supervisor starting");
    run_supervisor(role, config_path, &config.supervisor).await
}

async fn run_coordinator(config_path: Option<&str>) {
    let config = Config::load(config_path);
    init_tracing(&config);

    if config.security.shared_secret == "change-me" {
        warn!("Using default shared secret — set GREGUARD_SHARED_SECRET or update config");
    }
    if config.control.token == "change-me-too" {
        warn!("Using default control token — set GREGUARD_CONTROL_TOKEN or update config");
    }

    info!("greguard coordinator v{} starting", env!("CARGO_PKG_VERSION"));

    let store = StateStore::new(config.state.path.clone());
    let state = Arc::new(Mutex::new(store.load()));
    let locks = new_tunnel_locks();

    let discovery = Arc::new(
        LinkTableDiscovery::new(r"^gre-ir-(\d+)$").expect("compile built-in iface regex"),
    );
    let prober = Arc::new(PingProber {
        count: config.coordinator.ping_count,
        timeout_sec: config.coordinator.ping_timeout_sec,
    });
    let linkctl = Arc::new(IpLinkController);
    let agent = Arc::new(AgentRpcClient::new(
        config.coordinator.agent_base_url.clone(),
        config.security.shared_secret.clone(),
        config.rpc.timeout_sec,
        config.rpc.max_attempts,
        config.rpc.base_backoff_ms,
        config.rpc.max_backoff_ms,
    ));

    let descriptors = Arc::new(Mutex::new(Vec::new()));

    let scheduler = Arc::new(Scheduler {
        discovery: discovery.clone(),
        prober,
        linkctl: linkctl.clone(),
        agent: agent.clone(),
        state: state.clone(),
        store: store.clone(),
        locks: locks.clone(),
        cfg: config.coordinator.clone(),
    });

    let sweep_task = {
        let scheduler = scheduler.clone();
        let descriptors = descriptors.clone();
        let discovery = discovery.clone();
        tokio::spawn(async move {
            loop {
                scheduler.sweep().await;
                if let Ok(d) = discovery.discover().await {
                    *descriptors.lock().await = d;
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(
                    scheduler.cfg.check_interval_sec,
                ))
                .await;
            }
        })
    };

    let control_state = ControlRouterState {
        state: state.clone(),
        store: store.clone(),
        cfg: config.coordinator.clone(),
        agent,
        linkctl,
        locks,
        descriptors,
    };

    let app = Router::new()
        .route("/control/action", post(control::action))
        .layer(middleware::from_fn(require_control_token))
        .layer(Extension(ControlToken(config.control.token.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(control_state);

    let listener = TcpListener::bind(&config.control.listen)
        .await
        .expect("failed to bind control listener");
    info!("Control surface listening on {}", config.control.listen);

    let shutdown = shutdown_signal();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "control server error");
    }

    sweep_task.abort();
    info!("Coordinator shutting down");
}

async fn run_agent(config_path: Option<&str>) {
    let config = Config::load(config_path);
    init_tracing(&config);

    if config.security.shared_secret == "change-me" {
        warn!("Using default shared secret — set GREGUARD_SHARED_SECRET or update config");
    }

    info!("greguard agent v{} starting", env!("CARGO_PKG_VERSION"));

    let router_state = AgentRouterState {
        linkctl: Arc::new(IpLinkController),
        idempotency: Arc::new(IdempotencyStore::new(config.agent.idempotency_ttl_sec)),
    };

    let auth = AgentAuth {
        shared_secret: Arc::new(config.security.shared_secret.clone()),
        allow_cidrs: Arc::new(config.agent.allow_cidrs.clone()),
        max_clock_skew_sec: config.security.max_clock_skew_sec,
    };

    let authed = Router::new()
        .route("/v1/iface/down", post(agent::down))
        .route("/v1/iface/up", post(agent::up))
        .route("/v1/iface/restart", post(agent::restart))
        .layer(middleware::from_fn(require_agent_signature))
        .layer(Extension(auth));

    let app = Router::new()
        .route("/health", axum::routing::get(agent::health))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .with_state(router_state);

    let listener = TcpListener::bind(&config.agent.listen)
        .await
        .expect("failed to bind agent listener");
    info!("Agent RPC server listening on {}", config.agent.listen);

    let shutdown = shutdown_signal();
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "agent server error");
    }

    info!("Agent shutting down");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}

async fn run_ctl(action: CtlAction, config_path: Option<&str>) {
    let config = Config::load(config_path);

    match action {
        CtlAction::Status => {
            let store = StateStore::new(config.state.path.clone());
            let state: AppState = store.load();
            let mut tunnels: Vec<_> = state.tunnels.values().collect();
            tunnels.sort_by_key(|t| t.id);
            for t in tunnels {
                println!(
                    "tunnel {:>3}  {:<12}  {:?}  bad_rounds={}  last_action={}",
                    t.id, t.iface_local, t.status, t.bad_rounds, t.last_action
                );
            }
        }
        CtlAction::Events { n } => {
            let store = StateStore::new(config.state.path.clone());
            let state: AppState = store.load();
            for event in state.events.iter().rev().take(n).rev() {
                println!(
                    "[{}] {:?} {:?} {}",
                    event.timestamp, event.kind, event.tunnel_id, event.message
                );
            }
        }
        CtlAction::Reset { tunnel_id } => post_action(&config, "reset", Some(tunnel_id)).await,
        CtlAction::ResetAll => post_action(&config, "reset_all", None).await,
        CtlAction::Down { tunnel_id } => post_action(&config, "down", Some(tunnel_id)).await,
        CtlAction::Up { tunnel_id } => post_action(&config, "up", Some(tunnel_id)).await,
        CtlAction::Restart { tunnel_id } => post_action(&config, "restart", Some(tunnel_id)).await,
        CtlAction::Pause { tunnel_id } => post_action(&config, "pause", Some(tunnel_id)).await,
        CtlAction::Resume { tunnel_id } => post_action(&config, "resume", Some(tunnel_id)).await,
    }
}

async fn post_action(config: &Config, action: &str, tunnel_id: Option<u32>) {
    let url = format!("http://{}/control/action", config.control.listen);
    let client = reqwest::Client::new();
    let body = serde_json::json!({"action": action, "tunnel_id": tunnel_id});

    let resp = client
        .post(&url)
        .bearer_auth(&config.control.token)
        .json(&body)
        .send()
        .await;

    match resp {
        Ok(r) => match r.text().await {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("failed to read response: {e}"),
        },
        Err(e) => eprintln!("request failed: {e}"),
    }
}
