//! Local command execution used for `ssh-keygen` and `ssh`.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Describes a failed run for error messages.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let code = self
            .code
            .map_or_else(|| String::from("signal"), |code| code.to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit status {code}")
        } else {
            format!("exit status {code}: {stderr}")
        }
    }
}

/// Errors raised before a command produced any output.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and extra environment variables,
    /// capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError> {
        let output = Command::new(program)
            .args(args)
            .envs(envs.iter().copied())
            .output()
            .map_err(|err| CommandError::Spawn {
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

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(0), "", "exit status 0")]
    #[case(Some(255), "Permission denied\n", "exit status 255: Permission denied")]
    #[case(None, "", "exit status signal")]
    fn failure_summary_includes_code_and_stderr(
        #[case] code: Option<i32>,
        #[case] stderr: &str,
        #[case] expected: &str,
    ) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
        };
        assert_eq!(output.failure_summary(), expected);
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = ProcessCommandRunner
            .run("ucloud-machine-no-such-program", &[], &[])
            .expect_err("program should not exist");
        assert!(matches!(err, CommandError::Spawn { .. }), "got {err:?}");
    }
}
