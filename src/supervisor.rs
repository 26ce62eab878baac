//! Built-in supervisor that restarts a `serve` process on crash.
//!
//! Both `greguard coordinator supervise` and `greguard agent supervise` fork
//! the corresponding `serve` subcommand of the current executable and
//! monitor it. On abnormal exit the child is restarted with exponential
//! backoff that resets once the child has stayed up past
//! `stable_threshold_sec`. A clean exit (code 0) stops the supervisor.
//! SIGINT/SIGTERM are forwarded to the child.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;

/// Run the supervisor loop, re-spawning `<role> serve [--config <path>]` on
/// every abnormal exit. Does not return unless the child exits cleanly.
pub async fn run_supervisor(
    role: &str,
    config_path: Option<&str>,
    sup_config: &SupervisorConfig,
) -> ! {
    let mut backoff = 1u64;
    let max_backoff = sup_config.max_backoff_sec;
    let stable_threshold = Duration::from_secs(sup_config.stable_threshold_sec);

    let exe = std::env::current_exe().expect("resolve own executable path");

    loop {
        let started = Instant::now();

        let mut cmd = Command::new(&exe);
        cmd.arg(role).arg("serve");
        if let Some(p) = config_path {
            cmd.args(["--config", p]);
        }

        let mut child = cmd.spawn().expect("failed to spawn child process");
        let child_pid = child.id();
        info!("Supervisor: started {role} (pid {child_pid:?})");

        // Forward SIGINT and SIGTERM to child
        let fwd_pid = child_pid;
        let _signal_task = tokio::spawn(async move {
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                    .expect("register SIGINT");
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("register SIGTERM");
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Supervisor: forwarding SIGINT to child");
                    if let Some(pid) = fwd_pid {
                        #[allow(clippy::cast_possible_wrap)]
                        unsafe { libc::kill(pid as i32, libc::SIGINT); }
                    }
                }
                _ = sigterm.recv() => {
                    info!("Supervisor: forwarding SIGTERM to child");
                    if let Some(pid) = fwd_pid {
                        #[allow(clippy::cast_possible_wrap)]
                        unsafe { libc::kill(pid as i32, libc::SIGTERM); }
                    }
                }
            }
        });

        let status = child.wait().await;
        let uptime = started.elapsed();

        match status {
            Ok(s) if s.success() => {
                info!("{role} exited cleanly, supervisor stopping");
                std::process::exit(0);
            }
            Ok(s) => {
                warn!(
                    "{role} exited: {s} (uptime {:.1}s), restarting in {backoff}s",
                    uptime.as_secs_f64()
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            Err(e) => {
                error!(
                    "{role} wait error: {e} (uptime {:.1}s), restarting in {backoff}s",
                    uptime.as_secs_f64()
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        if uptime >= stable_threshold {
            backoff = 1;
        } else {
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}
