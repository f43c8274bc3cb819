//! Centralized command execution with consistent error handling.
//!
//! Every external tool the provisioner drives (fdisk, losetup, qemu-img,
//! curl, ...) goes through [`Cmd`], so stderr is always captured and a
//! non-zero exit always produces a useful message. fdisk speaks an
//! interactive protocol, so the builder can also pipe a script to stdin.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin_input: Option<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            stdin_input: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Pipe a script into the command's stdin.
    pub fn input(mut self, script: impl AsRef<str>) -> Self {
        self.stdin_input = Some(script.as_ref().to_string());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = if let Some(ref script) = self.stdin_input {
            cmd.stdin(Stdio::piped());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            let mut child = cmd.spawn().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?;
            child
                .stdin
                .as_mut()
                .context("child stdin not captured")?
                .write_all(script.as_bytes())
                .with_context(|| format!("Failed to write to '{}' stdin", self.program))?;
            child.wait_with_output().with_context(|| {
                format!("Failed to collect output from '{}'", self.program)
            })?
        } else {
            cmd.output().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?
        };

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").args(["hello"]).run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_captures_stderr() {
        // `ls` on a non-existent file writes to stderr
        let result = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .allow_fail()
            .run()
            .unwrap();

        assert!(!result.success());
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .run()
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_input_is_piped_to_stdin() {
        let result = Cmd::new("cat").input("d\n3\nw\n").run().unwrap();
        assert_eq!(result.stdout, "d\n3\nw\n");
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Partition step failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("Partition step failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_cmd_builder_chaining() {
        let result = Cmd::new("echo").arg("hello").arg("world").run().unwrap();
        assert_eq!(result.stdout_trimmed(), "hello world");
    }
}
