//! In-guest bootstrap: upload, run and reboot for each setup script.
//!
//! Scripts run in order. Each one gets a fresh SSH session because the
//! previous script ended with a reboot. A script can short-circuit the whole
//! sequence by printing [`ALREADY_CONFIGURED_SENTINEL`], in which case the
//! instance is left running without a reboot.

use std::net::IpAddr;
use std::time::Duration;

use shell_escape::unix::escape;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::lab::LabSpec;
use crate::poll::{PollError, Poller};
use crate::shell::{CommandRunner, RemoteCommandOutput, RemoteShell, ShellError};

/// Output line a script prints when the guest needs no further setup.
pub const ALREADY_CONFIGURED_SENTINEL: &str = "VM is already configured";

/// Pause after a reboot before the next script connects.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(60);

/// What a successful script run reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptOutcome {
    /// The script did its work; a reboot follows.
    Completed,
    /// The script found the guest already configured.
    AlreadyConfigured,
}

impl ScriptOutcome {
    /// Classifies script output. Some line, once trimmed, must equal the
    /// sentinel ignoring ASCII case; a line that merely mentions it does not
    /// count.
    #[must_use]
    pub fn from_stdout(stdout: &str) -> Self {
        if stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case(ALREADY_CONFIGURED_SENTINEL))
        {
            Self::AlreadyConfigured
        } else {
            Self::Completed
        }
    }
}

/// Result of the whole bootstrap sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootstrapOutcome {
    /// Every script ran and the instance was rebooted after each.
    Configured,
    /// A script reported the guest was already configured.
    AlreadyConfigured,
}

/// Failures during bootstrap.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// The instance never accepted an SSH login.
    #[error("script {script}: could not reach {address} after {attempts} attempts: {last_error}")]
    ConnectExhausted {
        /// Script about to run.
        script: String,
        /// Instance address.
        address: IpAddr,
        /// Attempts made.
        attempts: u32,
        /// Rendering of the last failure.
        last_error: String,
    },
    /// A bootstrap step failed on the instance or in the local client.
    #[error("script {script}: {step} failed: {message}")]
    RemoteCommand {
        /// Script being processed.
        script: String,
        /// Step that failed (`connect`, `upload`, `chmod`, `run`, `reboot`).
        step: &'static str,
        /// Failure details.
        message: String,
    },
    /// The run was cancelled.
    #[error("bootstrap cancelled before script {script} finished")]
    Cancelled {
        /// Script being processed.
        script: String,
    },
}

/// Runs the bootstrap scripts of one lab.
#[derive(Debug)]
pub struct Bootstrapper<'a, R: CommandRunner> {
    shell: &'a RemoteShell<R>,
    lab: &'a LabSpec,
    settle: Duration,
    cancel: CancellationToken,
}

impl<'a, R: CommandRunner> Bootstrapper<'a, R> {
    /// Creates a bootstrapper for `lab` using `shell`.
    #[must_use]
    pub const fn new(
        shell: &'a RemoteShell<R>,
        lab: &'a LabSpec,
        settle: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shell,
            lab,
            settle,
            cancel,
        }
    }

    /// Runs every script against `address`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] for the first failing step; later scripts
    /// are not attempted.
    pub async fn run(&self, address: IpAddr) -> Result<BootstrapOutcome, BootstrapError> {
        let total = self.lab.scripts.len();
        for (index, script) in self.lab.scripts.iter().enumerate() {
            if self.run_script(address, script).await? == ScriptOutcome::AlreadyConfigured {
                info!(script = %script, "guest already configured; skipping remaining scripts");
                return Ok(BootstrapOutcome::AlreadyConfigured);
            }
            if index + 1 < total {
                self.settle(script).await?;
            }
        }
        info!(lab = %self.lab.name, scripts = total, "bootstrap complete");
        Ok(BootstrapOutcome::Configured)
    }

    async fn run_script(
        &self,
        address: IpAddr,
        script: &str,
    ) -> Result<ScriptOutcome, BootstrapError> {
        self.ensure_live(script)?;
        let session = self
            .shell
            .connect(address, self.shell.config().connect_attempts, &self.cancel)
            .await
            .map_err(|err| connect_error(script, err))?;

        let remote_path = self.lab.remote_script_path(script);
        let local_path = self.lab.local_script_path(script);
        self.ensure_live(script)?;
        self.shell
            .upload(&session, &local_path, &remote_path)
            .map_err(|err| step_error(script, "upload", &err))?;

        let escaped = escape(remote_path.as_str().into());
        self.ensure_live(script)?;
        let chmod = self
            .shell
            .run_command(&session, &format!("chmod +x {escaped}"))
            .map_err(|err| step_error(script, "chmod", &err))?;
        require_success(script, "chmod", &chmod)?;

        self.ensure_live(script)?;
        info!(script, address = %address, "running bootstrap script");
        let output = self
            .shell
            .run_command(&session, &format!("sudo {escaped}"))
            .map_err(|err| step_error(script, "run", &err))?;
        require_success(script, "run", &output)?;

        let outcome = ScriptOutcome::from_stdout(&output.stdout);
        if outcome == ScriptOutcome::Completed {
            self.ensure_live(script)?;
            self.shell
                .reboot(session)
                .map_err(|err| step_error(script, "reboot", &err))?;
        }
        Ok(outcome)
    }

    /// Fails with [`BootstrapError::Cancelled`] once the token fires. Called
    /// before every remote round trip.
    fn ensure_live(&self, script: &str) -> Result<(), BootstrapError> {
        if self.cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled {
                script: script.to_owned(),
            });
        }
        Ok(())
    }

    async fn settle(&self, script: &str) -> Result<(), BootstrapError> {
        info!(settle = ?self.settle, "waiting for instance to come back");
        Poller::new(self.settle, self.cancel.clone())
            .pause::<ShellError>("instance reboot")
            .await
            .map_err(|err| match err {
                PollError::Cancelled { .. } => BootstrapError::Cancelled {
                    script: script.to_owned(),
                },
                other => BootstrapError::RemoteCommand {
                    script: script.to_owned(),
                    step: "reboot",
                    message: other.to_string(),
                },
            })
    }
}

fn connect_error(script: &str, err: ShellError) -> BootstrapError {
    match err {
        ShellError::ConnectExhausted {
            address,
            attempts,
            last_error,
        } => BootstrapError::ConnectExhausted {
            script: script.to_owned(),
            address,
            attempts,
            last_error,
        },
        ShellError::Cancelled { .. } => BootstrapError::Cancelled {
            script: script.to_owned(),
        },
        other => step_error(script, "connect", &other),
    }
}

fn step_error(script: &str, step: &'static str, err: &ShellError) -> BootstrapError {
    BootstrapError::RemoteCommand {
        script: script.to_owned(),
        step,
        message: err.to_string(),
    }
}

fn require_success(
    script: &str,
    step: &'static str,
    output: &RemoteCommandOutput,
) -> Result<(), BootstrapError> {
    if output.is_success() {
        return Ok(());
    }
    let status = output
        .exit_code
        .map_or_else(|| String::from("none"), |code| code.to_string());
    Err(BootstrapError::RemoteCommand {
        script: script.to_owned(),
        step,
        message: format!("exit status {status}: {}", output.stderr.trim()),
    })
}
