use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::config::SandboxConfig;

/// Lifecycle states of the disposable fork node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Stopped,
    Starting,
    Ready,
    Stopping,
}

/// Supervises one disposable forked-chain process. An instance is
/// acquired per simulation and never reused; `kill_on_drop` guarantees
/// the subprocess dies even if the owning task panics before `stop`.
pub struct SandboxSupervisor {
    child: Child,
    endpoint: String,
    state: SandboxState,
    grace: Duration,
}

impl SandboxSupervisor {
    /// Spawn the fork node and poll its endpoint until it accepts
    /// connections. Bounded: exhausting the poll budget kills the
    /// process and fails with a sandbox-unavailable error.
    pub async fn start(config: &SandboxConfig) -> eyre::Result<Self> {
        let mut command = Command::new(&config.binary);
        if let Some(fork_url) = &config.fork_url {
            command.arg("--fork-url").arg(fork_url);
        }
        command
            .arg("--port")
            .arg(config.port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            eyre::eyre!("failed to spawn sandbox binary '{}': {}", config.binary, e)
        })?;

        let mut state = SandboxState::Starting;
        tracing::debug!(binary = %config.binary, port = config.port, ?state, "Sandbox starting");

        let bind_addr = format!("127.0.0.1:{}", config.port);
        for attempt in 1..=config.startup_attempts {
            tokio::time::sleep(Duration::from_millis(config.startup_poll_ms)).await;

            if let Some(status) = child.try_wait()? {
                return Err(eyre::eyre!(
                    "sandbox unavailable: process exited during startup ({})",
                    status
                ));
            }

            if tokio::net::TcpStream::connect(&bind_addr).await.is_ok() {
                state = SandboxState::Ready;
                tracing::debug!(endpoint = %config.endpoint(), attempt, ?state, "Sandbox ready");
                return Ok(Self {
                    child,
                    endpoint: config.endpoint(),
                    state,
                    grace: Duration::from_millis(config.shutdown_grace_ms),
                });
            }
        }

        let _ = child.start_kill();
        Err(eyre::eyre!(
            "sandbox unavailable: no connection on {} after {} attempts",
            bind_addr,
            config.startup_attempts
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Graceful-then-forced termination: SIGTERM, wait out the grace
    /// period, then kill if the process is still up.
    pub async fn stop(mut self) {
        self.state = SandboxState::Stopping;

        if let Some(pid) = self.child.id() {
            // SAFETY: signalling our own child process by pid.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(_) => {
                tracing::debug!("Sandbox terminated gracefully");
            }
            Err(_) => {
                tracing::debug!("Sandbox ignored SIGTERM, force killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }

        self.state = SandboxState::Stopped;
    }
}
