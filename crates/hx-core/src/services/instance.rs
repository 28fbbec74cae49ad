use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{HaxigonError, Result};
use crate::models::{InstanceInfo, InstanceStatus};

/// Executable expected at the root of every fetched application tree.
pub const ENTRY_POINT: &str = "main";

/// Environment variable carrying the assigned port to the application.
pub const PORT_ENV: &str = "PORT";

/// One running deployment: a child process and the directory it runs from.
///
/// Both are owned exclusively. [`Instance::destroy`] is the only way the
/// process state changes after launch.
#[derive(Debug)]
pub struct Instance {
    name: String,
    working_directory: PathBuf,
    port: u16,
    child: Child,
    pid: Option<u32>,
    status: InstanceStatus,
    started_at: DateTime<Utc>,
}

impl Instance {
    /// Spawn `<working_directory>/main` with `PORT=<port>` on top of the
    /// inherited environment. stdout and stderr are forwarded to the log.
    pub fn launch(name: &str, working_directory: &Path, port: u16) -> Result<Self> {
        let entry_point = working_directory.join(ENTRY_POINT);
        info!(app = name, port, status = %InstanceStatus::Starting, "launching application");

        let mut cmd = Command::new(&entry_point);
        cmd.env(PORT_ENV, port.to_string());
        cmd.current_dir(working_directory);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            HaxigonError::Launch(format!("failed to spawn {}: {e}", entry_point.display()))
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(name.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(name.to_string(), "stderr", stderr);
        }

        let pid = child.id();
        info!(app = name, port, pid = ?pid, "application running");

        Ok(Self {
            name: name.to_string(),
            working_directory: working_directory.to_path_buf(),
            port,
            child,
            pid,
            status: InstanceStatus::Running,
            started_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            name: self.name.clone(),
            port: self.port,
            pid: self.pid,
            working_directory: self.working_directory.clone(),
            status: self.status,
            started_at: self.started_at,
        }
    }

    /// SIGTERM, wait up to `grace_period`, SIGKILL if still alive, then remove
    /// the working directory.
    ///
    /// Runs to completion once started. Must not be called again after it
    /// returned `Ok`.
    pub async fn destroy(&mut self, grace_period: Duration) -> Result<()> {
        self.status = InstanceStatus::Stopping;
        info!(app = %self.name, pid = ?self.pid, "stopping application");

        self.signal_terminate()?;

        match tokio::time::timeout(grace_period, self.child.wait()).await {
            Ok(Ok(exit)) => {
                debug!(app = %self.name, %exit, "application exited");
            }
            Ok(Err(e)) => {
                return Err(HaxigonError::Termination(format!(
                    "failed to wait for {}: {e}",
                    self.name
                )));
            }
            Err(_) => {
                warn!(
                    app = %self.name,
                    grace_secs = grace_period.as_secs_f64(),
                    "application ignored SIGTERM, killing"
                );
                self.child.kill().await.map_err(|e| {
                    HaxigonError::Termination(format!("failed to kill {}: {e}", self.name))
                })?;
            }
        }

        match tokio::fs::remove_dir_all(&self.working_directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HaxigonError::Termination(format!(
                    "failed to remove {}: {e}",
                    self.working_directory.display()
                )));
            }
        }

        self.status = InstanceStatus::Terminated;
        let uptime = Utc::now() - self.started_at;
        info!(
            app = %self.name,
            uptime_secs = uptime.num_seconds(),
            "application terminated"
        );
        Ok(())
    }

    fn signal_terminate(&mut self) -> Result<()> {
        // `id()` is None once the exit status has been collected.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(HaxigonError::Termination(format!(
                    "failed to send SIGTERM to {} (pid {pid}): {}",
                    self.name,
                    std::io::Error::last_os_error()
                )));
            }
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill().map_err(|e| {
                HaxigonError::Termination(format!(
                    "failed to stop {} (pid {pid}): {e}",
                    self.name
                ))
            })?;
        }
        Ok(())
    }
}

fn forward_output<R>(name: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(app = %name, stream, "{line}");
        }
    });
}
