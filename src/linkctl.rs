//! Local interface up/down control.
//!
//! [`LinkController`] is the trait the reset orchestrator and manual control
//! surface depend on; [`IpLinkController`] shells out to `ip link set`.

use std::process::Stdio;
use tokio::process::Command;

/// Abstraction over "bring this local interface up or down", so the reset
/// orchestrator never depends on the shell-out mechanics.
#[async_trait::async_trait]
pub trait LinkController: Send + Sync {
    async fn set(&self, iface: &str, up: bool) -> Result<(), LinkCtlError>;
}

#[derive(Debug)]
pub enum LinkCtlError {
    SpawnFailed(String),
    CommandFailed(String),
}

impl std::fmt::Display for LinkCtlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkCtlError::SpawnFailed(e) => write!(f, "failed to spawn ip link: {e}"),
            LinkCtlError::CommandFailed(e) => write!(f, "ip link set failed: {e}"),
        }
    }
}

impl std::error::Error for LinkCtlError {}

/// Runs `ip link set dev <iface> up|down` via a child process.
pub struct IpLinkController;

#[async_trait::async_trait]
impl LinkController for IpLinkController {
    async fn set(&self, iface: &str, up: bool) -> Result<(), LinkCtlError> {
        let state = if up { "up" } else { "down" };
        let output = Command::new("ip")
            .args(["link", "set", "dev", iface, state])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LinkCtlError::SpawnFailed(e.to_string()))?;

        if !output.status.success() {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            let msg = combined.trim();
            return Err(LinkCtlError::CommandFailed(if msg.is_empty() {
                "ip link failed".to_string()
            } else {
                msg.to_string()
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeController {
        fail_on: Option<(String, bool)>,
    }

    #[async_trait::async_trait]
    impl LinkController for FakeController {
        async fn set(&self, iface: &str, up: bool) -> Result<(), LinkCtlError> {
            if let Some((ref fail_iface, fail_up)) = self.fail_on {
                if fail_iface == iface && fail_up == up {
                    return Err(LinkCtlError::CommandFailed("simulated failure".to_string()));
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fake_controller_reports_configured_failure() {
        let ctl = FakeController {
            fail_on: Some(("gre-ir-7".to_string(), false)),
        };
        assert!(ctl.set("gre-ir-7", true).await.is_ok());
        assert!(ctl.set("gre-ir-7", false).await.is_err());
    }
}
