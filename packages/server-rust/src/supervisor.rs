//! Function runtime process supervision.
//!
//! The proxy owns the function runtime's lifecycle: it spawns the
//! runtime CLI as a child process, mirrors its output into the proxy's
//! log stream, and restarts it when the health check finds it
//! unresponsive. An unexpected child exit takes the proxy down with it
//! so the platform restarts the pair together.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;

struct RunningFunction {
    stop: oneshot::Sender<()>,
    pid: Option<u32>,
}

/// Spawns and supervises the function runtime child process.
pub struct Supervisor {
    config: Arc<Config>,
    running: Mutex<Option<RunningFunction>>,
    restarts: AtomicU64,
    exit_on_termination: bool,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            restarts: AtomicU64::new(0),
            exit_on_termination: true,
        }
    }

    /// Disables taking the whole process down on child exit. Test-only
    /// escape hatch; production keeps the default.
    #[must_use]
    pub fn with_exit_on_termination(mut self, exit_on_termination: bool) -> Self {
        self.exit_on_termination = exit_on_termination;
        self
    }

    /// Number of health-check-triggered restarts since startup.
    #[must_use]
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Spawns the function runtime and begins supervising it.
    ///
    /// # Errors
    ///
    /// Returns an error when the runtime CLI cannot be spawned.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut command = Command::new(&self.config.runtime_cli_filepath);
        command
            .arg("serve")
            .arg(&self.config.function_dir)
            .arg("-p")
            .arg(self.config.function_port.to_string());
        if let Some(debug_port) = self.config.debug_port {
            command.arg("-d").arg(debug_port.to_string());
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = command.spawn().with_context(|| {
            format!(
                "unable to spawn function runtime {}",
                self.config.runtime_cli_filepath.display()
            )
        })?;
        let pid = child.id();
        info!(?pid, port = self.config.function_port, "function runtime started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_logs(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_logs(stderr));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let exit_on_termination = self.exit_on_termination;
        tokio::spawn(monitor(child, stop_rx, exit_on_termination));

        *self.running.lock().await = Some(RunningFunction { stop: stop_tx, pid });
        Ok(())
    }

    /// Kills the current child and spawns a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error when the replacement child cannot be spawned.
    pub async fn restart(&self) -> anyhow::Result<()> {
        if let Some(running) = self.running.lock().await.take() {
            warn!(pid = ?running.pid, "restarting function runtime");
            // The monitor task owns the child; dropping the sender is
            // enough if it already exited.
            let _ = running.stop.send(());
        }
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.start().await
    }

    /// Stops the child without restarting, for proxy shutdown.
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            info!(pid = ?running.pid, "stopping function runtime");
            let _ = running.stop.send(());
        }
    }
}

async fn monitor(mut child: Child, stop: oneshot::Receiver<()>, exit_on_termination: bool) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => error!(%status, "function runtime exited unexpectedly"),
                Err(err) => error!(error = %err, "lost track of the function runtime"),
            }
            if exit_on_termination {
                std::process::exit(1);
            }
        }
        _ = stop => {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "unable to kill function runtime");
            }
        }
    }
}

/// Mirrors one of the child's output streams, line by line.
async fn stream_logs<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!("[fn] {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt as _;
    use std::path::PathBuf;
    use std::time::Duration;

    fn script(body: &str) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::new().expect("temp script");
        writeln!(file, "#!/bin/sh\n{body}").expect("write script");
        let mut perms = file.as_file().metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        file.as_file().set_permissions(perms).expect("chmod");
        // Close the write handle before exec to avoid ETXTBSY.
        file.into_temp_path()
    }

    fn config(cli: PathBuf) -> Arc<Config> {
        Arc::new(Config {
            proxy_port: 0,
            org_id_18: "00Dxx0000006IYJEAM".to_string(),
            function_base_url: "http://localhost:8080".to_string(),
            function_port: 8080,
            debug_port: None,
            private_key: String::new(),
            consumer_key: "key".to_string(),
            audience: None,
            runtime_cli_filepath: cli,
            function_dir: PathBuf::from("."),
            health_retry_delay: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn start_spawns_and_shutdown_stops() {
        let cli = script("sleep 30");
        let supervisor =
            Supervisor::new(config(cli.to_path_buf())).with_exit_on_termination(false);
        supervisor.start().await.expect("start");
        assert!(supervisor.running.lock().await.is_some());
        supervisor.shutdown().await;
        assert!(supervisor.running.lock().await.is_none());
    }

    #[tokio::test]
    async fn restart_increments_counter() {
        let cli = script("sleep 30");
        let supervisor =
            Supervisor::new(config(cli.to_path_buf())).with_exit_on_termination(false);
        supervisor.start().await.expect("start");
        supervisor.restart().await.expect("restart");
        assert_eq!(supervisor.restart_count(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn start_fails_for_unspawnable_cli() {
        let supervisor = Supervisor::new(config(PathBuf::from("/nonexistent/cli")))
            .with_exit_on_termination(false);
        assert!(supervisor.start().await.is_err());
    }
}
