//! Command execution seam and captured outputs.

use std::ffi::OsString;
use std::process::Command;

use super::ShellError;

/// Exit status and streams captured from a local process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit code rendered for messages.
    #[must_use]
    pub fn code_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("none"), |code| code.to_string())
    }
}

/// Runs local programs. Tests substitute a scripted implementation.
pub trait CommandRunner {
    /// Runs `program` to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Spawn`] when the program cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError>;
}

/// Runner backed by [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError> {
        let output =
            Command::new(program)
                .args(args)
                .output()
                .map_err(|err| ShellError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Output of a command executed on the lab instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Remote exit code; `None` when the connection dropped first.
    pub exit_code: Option<i32>,
    /// Remote standard output.
    pub stdout: String,
    /// Remote standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

impl From<CommandOutput> for RemoteCommandOutput {
    fn from(output: CommandOutput) -> Self {
        Self {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}
