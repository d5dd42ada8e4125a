// ABOUTME: SSH local port-forward for reaching databases behind a bastion
// ABOUTME: The ssh child lives as long as the tunnel handle

use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::error::{BackupError, Result};

/// Grace period for ssh to authenticate and bind the forward.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// A running `ssh -N -L` forward. Dropping it kills ssh.
#[derive(Debug)]
pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

impl SshTunnel {
    /// Forward a free local port to `remote_host:remote_port` through `target`
    /// (`[user@]bastion`), then wait [`SETTLE_DELAY`] before returning.
    pub async fn open(target: &str, remote_host: &str, remote_port: u16) -> Result<Self> {
        let local_port = free_local_port()?;
        let args = forward_arguments(target, local_port, remote_host, remote_port);
        tracing::info!(
            "Opening SSH tunnel via {} (127.0.0.1:{} -> {}:{})",
            target,
            local_port,
            remote_host,
            remote_port
        );

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::Connection {
                message: format!("Failed to start ssh: {}", e),
                source: None,
            })?;

        tokio::time::sleep(SETTLE_DELAY).await;

        if let Some(status) = child.try_wait().map_err(|e| BackupError::Connection {
            message: format!("Failed to check ssh tunnel: {}", e),
            source: None,
        })? {
            return Err(BackupError::Connection {
                message: format!("SSH tunnel via {} exited early ({})", target, status),
                source: None,
            });
        }

        tracing::info!("✓ SSH tunnel established");
        Ok(Self { child, local_port })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop the forward and wait for ssh to exit.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("⚠ Failed to stop ssh tunnel: {}", e);
        }
    }
}

fn forward_arguments(target: &str, local_port: u16, remote_host: &str, remote_port: u16) -> Vec<String> {
    vec![
        "-N".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-L".to_string(),
        format!("127.0.0.1:{}:{}:{}", local_port, remote_host, remote_port),
        target.to_string(),
    ]
}

/// Ask the OS for an unused port. Racy by nature, but ssh fails loudly
/// (`ExitOnForwardFailure`) if someone grabs it first.
fn free_local_port() -> Result<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .map_err(|e| BackupError::Connection {
            message: format!("Failed to find a free local port for the SSH tunnel: {}", e),
            source: None,
        })
}
