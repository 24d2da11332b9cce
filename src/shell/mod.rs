//! SSH access to the lab instance through the system `ssh` and `scp`
//! clients.
//!
//! [`RemoteShell::connect`] probes the instance until it accepts a login and
//! hands back a [`Session`]. Uploads and commands borrow the session;
//! [`RemoteShell::reboot`] consumes it, because the connection does not
//! survive the reboot.

use std::ffi::OsString;
use std::future;
use std::net::IpAddr;

use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::local_fs;
use crate::poll::{PollError, Poller};

mod config;
mod error;
mod types;

pub use config::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF, DEFAULT_SSH_PORT, ShellConfig, expand_home,
};
pub use error::ShellError;
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput};

/// Exit code `ssh` reports when the connection itself failed.
const SSH_CONNECTION_LOST: i32 = 255;
const CONNECT_TIMEOUT_SECS: u16 = 15;

/// A login confirmed to work against one instance.
#[derive(Debug, Eq, PartialEq)]
pub struct Session {
    address: IpAddr,
    port: u16,
    user: String,
}

impl Session {
    /// Instance address.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Remote login user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    fn scp_destination(&self, remote_path: &str) -> String {
        match self.address {
            IpAddr::V4(address) => format!("{}@{address}:{remote_path}", self.user),
            IpAddr::V6(address) => format!("{}@[{address}]:{remote_path}", self.user),
        }
    }
}

/// Drives `ssh` and `scp` through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: ShellConfig,
    runner: R,
}

impl RemoteShell<ProcessCommandRunner> {
    /// Shell backed by real processes.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: ShellConfig) -> Result<Self, ShellError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a shell after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] when validation fails.
    pub fn new(config: ShellConfig, runner: R) -> Result<Self, ShellError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Runner in use.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Probes `address` with `ssh … true` until a login succeeds.
    ///
    /// Failed attempts are retried after the configured backoff, up to
    /// `max_attempts` in total. No backoff follows the last attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::ConnectExhausted`] carrying the last failure when
    /// every attempt fails, or [`ShellError::Cancelled`] when `cancel` fires.
    pub async fn connect(
        &self,
        address: IpAddr,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Session, ShellError> {
        let session = Session {
            address,
            port: self.config.ssh_port,
            user: self.config.ssh_user.clone(),
        };
        let poller = Poller::new(self.config.connect_backoff, cancel.clone())
            .with_max_attempts(max_attempts.max(1));
        info!(%address, %poller, "connecting over ssh");

        let what = format!("ssh login on {address}");
        match poller
            .retry(&what, || future::ready(self.probe(&session)))
            .await
        {
            Ok(()) => {
                debug!(%address, "ssh session established");
                Ok(session)
            }
            Err(PollError::Exhausted {
                attempts,
                last_error,
                ..
            }) => {
                warn!(%address, attempts, "ssh connection attempts exhausted");
                Err(ShellError::ConnectExhausted {
                    address,
                    attempts,
                    last_error,
                })
            }
            Err(PollError::Cancelled { what }) => Err(ShellError::Cancelled { operation: what }),
            Err(PollError::Probe { source, .. }) => Err(source),
        }
    }

    /// Copies `local` to `remote_path` on the instance with `scp`.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::MissingLocalFile`] when `local` does not exist
    /// and [`ShellError::CommandFailed`] when `scp` fails.
    pub fn upload(
        &self,
        session: &Session,
        local: &Utf8Path,
        remote_path: &str,
    ) -> Result<(), ShellError> {
        let present = local_fs::is_file(local).map_err(|err| ShellError::LocalIo {
            path: local.to_path_buf(),
            message: err.to_string(),
        })?;
        if !present {
            return Err(ShellError::MissingLocalFile {
                path: local.to_path_buf(),
            });
        }

        let mut args = self.client_options("-P", session.port);
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(session.scp_destination(remote_path)));
        debug!(local = %local, remote = remote_path, "uploading");

        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(ShellError::CommandFailed {
            program: self.config.scp_bin.clone(),
            status: output.code_text(),
            stderr: output.stderr,
        })
    }

    /// Runs `command` on the instance and returns its output unjudged.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Spawn`] when `ssh` cannot be started.
    ///
    /// # Security
    ///
    /// `command` reaches the remote shell verbatim; quote untrusted input
    /// before calling.
    pub fn run_command(
        &self,
        session: &Session,
        command: &str,
    ) -> Result<RemoteCommandOutput, ShellError> {
        debug!(address = %session.address, command, "running remote command");
        self.ssh(session, command).map(RemoteCommandOutput::from)
    }

    /// Reboots the instance, consuming the session.
    ///
    /// The connection usually drops before `ssh` sees an exit status, so a
    /// lost connection counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::CommandFailed`] when the reboot command itself
    /// is rejected.
    pub fn reboot(&self, session: Session) -> Result<(), ShellError> {
        info!(address = %session.address, "rebooting instance");
        let output = self.ssh(&session, "sudo reboot -f")?;
        match output.code {
            None | Some(0 | SSH_CONNECTION_LOST) => Ok(()),
            Some(_) => Err(ShellError::CommandFailed {
                program: self.config.ssh_bin.clone(),
                status: output.code_text(),
                stderr: output.stderr,
            }),
        }
    }

    fn probe(&self, session: &Session) -> Result<(), ShellError> {
        let output = self.ssh(session, "true")?;
        if output.is_success() {
            return Ok(());
        }
        Err(ShellError::CommandFailed {
            program: self.config.ssh_bin.clone(),
            status: output.code_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn ssh(&self, session: &Session, command: &str) -> Result<CommandOutput, ShellError> {
        let mut args = self.client_options("-p", session.port);
        args.push(OsString::from(session.destination()));
        args.push(OsString::from(command));
        self.runner.run(&self.config.ssh_bin, &args)
    }

    fn client_options(&self, port_flag: &str, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from(port_flag), OsString::from(port.to_string())];

        if let Some(identity_file) = &self.config.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_home(identity_file)));
        }

        let mut options = vec![format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}")];
        if self.config.batch_mode {
            options.push(String::from("BatchMode=yes"));
        }
        if !self.config.strict_host_key_checking {
            options.push(String::from("StrictHostKeyChecking=no"));
        }
        if !self.config.known_hosts_file.trim().is_empty() {
            options.push(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            ));
        }
        for option in options {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }

        args
    }
}
