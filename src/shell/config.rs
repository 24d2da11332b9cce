//! SSH client settings.

use std::time::Duration;

use super::ShellError;

/// Default SSH port on lab instances.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Connection attempts made before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Delay between failed connection attempts.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(20);

/// Settings used to build `ssh` and `scp` invocations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShellConfig {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// Remote login user.
    pub ssh_user: String,
    /// SSH port on the instance.
    pub ssh_port: u16,
    /// Private key passed with `-i`; `~/` is expanded.
    pub identity_file: Option<String>,
    /// Adds `BatchMode=yes` so prompts fail instead of hanging.
    pub batch_mode: bool,
    /// When `false`, host keys are accepted without verification.
    pub strict_host_key_checking: bool,
    /// Known-hosts file; empty leaves the client default in place.
    pub known_hosts_file: String,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between failed connection attempts.
    pub connect_backoff: Duration,
}

impl ShellConfig {
    /// Settings for `user` with every other value at its default.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            ssh_user: user.into(),
            ssh_port: DEFAULT_SSH_PORT,
            identity_file: None,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
        }
    }

    /// Checks that binaries and user are set and that at least one
    /// connection attempt is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidConfig`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ShellError> {
        for (value, field) in [
            (&self.ssh_bin, "ssh_bin"),
            (&self.scp_bin, "scp_bin"),
            (&self.ssh_user, "ssh_user"),
        ] {
            if value.trim().is_empty() {
                return Err(ShellError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        if self.connect_attempts == 0 {
            return Err(ShellError::InvalidConfig {
                field: String::from("connect_attempts"),
            });
        }
        Ok(())
    }
}

/// Expands a leading `~/` using `HOME`; other paths pass through.
#[must_use]
pub fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.to_string_lossy()),
        _ => path.to_owned(),
    }
}
