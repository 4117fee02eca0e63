//! Starting and stopping the subject.
//!
//! The subject is invoked as
//! `program [leading args…] <channel path> [scenario args…]`. Launching
//! returns as soon as the process is spawned; readiness is signalled by the
//! port line on the event channel.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::OutputMode;
use crate::error::{HarnessError, Result};

/// Starts subjects for scenarios.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Subject: Subject;

    /// Start a subject writing its events to `channel`.
    async fn launch(&self, channel: &Path, scenario_args: &[&str]) -> Result<Self::Subject>;
}

/// A running subject.
#[allow(async_fn_in_trait)]
pub trait Subject {
    /// Fail if the subject has already terminated abnormally.
    fn ensure_running(&mut self) -> Result<()>;

    /// Terminate the subject. Calling it again, or on a subject that already
    /// exited, is not an error.
    async fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
    output: OutputMode,
    stop_timeout: Option<Duration>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            output: OutputMode::Inherit,
            stop_timeout: None,
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Bound the wait for the process to exit after it is killed.
    pub fn with_stop_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn command(&self, channel: &Path, scenario_args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(channel)
            .args(scenario_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match self.output {
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Prefixed => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }
        command
    }
}

impl Launcher for ProcessLauncher {
    type Subject = SubjectProcess;

    async fn launch(&self, channel: &Path, scenario_args: &[&str]) -> Result<SubjectProcess> {
        let started = Instant::now();
        let mut child = self
            .command(channel, scenario_args)
            .spawn()
            .map_err(|e| {
                HarnessError::ProcessFailure(format!(
                    "failed to spawn {}: {e}",
                    self.program.display()
                ))
            })?;

        tracing::info!(
            program = %self.program.display(),
            pid = child.id(),
            args = ?scenario_args,
            "subject started"
        );

        let mut relays = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            relays.push(tokio::spawn(relay_lines(stdout, started)));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(tokio::spawn(relay_lines(stderr, started)));
        }

        Ok(SubjectProcess {
            child,
            relays,
            status: None,
            stop_timeout: self.stop_timeout,
        })
    }
}

/// Subject running as a child process.
pub struct SubjectProcess {
    child: Child,
    relays: Vec<JoinHandle<()>>,
    status: Option<ExitStatus>,
    stop_timeout: Option<Duration>,
}

impl SubjectProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    fn poll_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    async fn finish_relays(&mut self) {
        for relay in self.relays.drain(..) {
            // A grandchild may still hold the pipes open.
            if tokio::time::timeout(Duration::from_millis(200), relay)
                .await
                .is_err()
            {
                tracing::debug!("subject output relay still open after exit");
            }
        }
    }
}

impl Subject for SubjectProcess {
    fn ensure_running(&mut self) -> Result<()> {
        match self.poll_exit()? {
            Some(status) if !status.success() => Err(HarnessError::ProcessFailure(format!(
                "subject exited with {status}"
            ))),
            _ => Ok(()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.poll_exit()?.is_none() {
            if let Err(e) = self.child.start_kill() {
                // Raced with a natural exit.
                tracing::debug!(error = %e, "kill after exit");
            }
            let status = match self.stop_timeout {
                Some(limit) => tokio::time::timeout(limit, self.child.wait())
                    .await
                    .map_err(|_| {
                        HarnessError::ProcessFailure(format!(
                            "subject did not exit within {limit:?} of being killed"
                        ))
                    })??,
                None => self.child.wait().await?,
            };
            tracing::debug!(%status, "subject stopped");
            self.status = Some(status);
        }
        self.finish_relays().await;
        Ok(())
    }
}

/// Format elapsed time as uptime-style string (e.g., "0.00123s").
fn format_uptime(start: Instant) -> String {
    format!("{:>8.5}s", start.elapsed().as_secs_f64())
}

/// Relay lines from the subject to stderr with a tag and uptime.
async fn relay_lines<R: AsyncRead + Unpin>(reader: R, start: Instant) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("{} {} {}", format_uptime(start), "[subj]".yellow(), line);
    }
}
