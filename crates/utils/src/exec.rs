use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};

/// An extra command line argument passed through to an external utility.
///
/// An empty `val` means the option is flag-only (`-f`); a non-empty `val` is
/// appended as a separate argument after the option. An empty `opt` with a
/// non-empty `val` appends a bare positional value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraArg {
    pub opt: String,
    pub val: String,
}

impl ExtraArg {
    pub fn new(opt: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            opt: opt.into(),
            val: val.into(),
        }
    }

    /// A flag-only argument (no value).
    pub fn flag(opt: impl Into<String>) -> Self {
        Self {
            opt: opt.into(),
            val: String::new(),
        }
    }

    /// Append this argument to `cmd`.
    pub fn apply(&self, cmd: &mut Command) {
        if !self.opt.is_empty() {
            cmd.arg(&self.opt);
        }
        if !self.val.is_empty() {
            cmd.arg(&self.val);
        }
    }
}

/// Errors from running external utilities.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The process could not be spawned or its pipes could not be serviced.
    #[error("failed to execute '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    /// The process ran but exited unsuccessfully.
    #[error("'{cmd}' failed (exit status {status}): {stderr}")]
    Failed {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
    /// The process produced output that was not valid UTF-8.
    #[error("'{cmd}' emitted non-UTF-8 output")]
    NonUtf8 { cmd: String },
}

impl ExecError {
    /// Name of the command the error relates to.
    pub fn command(&self) -> &str {
        match self {
            ExecError::Spawn { cmd, .. }
            | ExecError::Failed { cmd, .. }
            | ExecError::NonUtf8 { cmd } => cmd,
        }
    }
}

fn cmdline(cmd: &Command) -> String {
    let mut r = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        r.push(' ');
        r.push_str(&arg.to_string_lossy());
    }
    r
}

/// Extension helpers for [`std::process::Command`].
///
/// All helpers capture stderr so failures carry the tool's own message.
pub trait CommandRunExt {
    /// Append `extra` arguments, after any synthesized ones.
    fn extra_args(&mut self, extra: &[ExtraArg]) -> &mut Self;

    /// Log (in tracing debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Run the command, returning an error (with captured stderr) for a
    /// non-zero exit status.
    fn run(&mut self) -> Result<(), ExecError>;

    /// Run the command and return its exit status; a non-zero status is
    /// *not* an error. Callers apply their own exit-code policy and can use
    /// [`ExecError::Failed`] via [`status_to_error`] where the default
    /// policy applies.
    fn run_get_status(&mut self) -> Result<(ExitStatus, String), ExecError>;

    /// Run the command and capture stdout, erroring on non-zero exit.
    fn run_get_output(&mut self) -> Result<String, ExecError>;

    /// Run the command feeding `input` on stdin, erroring on non-zero exit.
    fn run_with_input(&mut self, input: &str) -> Result<(), ExecError>;

    /// Run the command streaming stdout lines through `filter`. The filter
    /// returns a completion percentage for lines it understands. The exit
    /// status is returned for the caller's exit-code policy.
    fn run_with_progress(
        &mut self,
        filter: &mut dyn FnMut(&str) -> Option<u8>,
    ) -> Result<(ExitStatus, String), ExecError>;
}

/// Turn a non-zero `status` into [`ExecError::Failed`] carrying `stderr`.
pub fn status_to_error(cmd: &str, status: ExitStatus, stderr: &str) -> ExecError {
    ExecError::Failed {
        cmd: cmd.to_string(),
        status,
        stderr: stderr.trim().to_string(),
    }
}

impl CommandRunExt for Command {
    fn extra_args(&mut self, extra: &[ExtraArg]) -> &mut Self {
        for arg in extra {
            arg.apply(self);
        }
        self
    }

    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", cmdline(self));
        self
    }

    fn run(&mut self) -> Result<(), ExecError> {
        let (status, stderr) = self.run_get_status()?;
        if status.success() {
            Ok(())
        } else {
            Err(status_to_error(&cmdline(self), status, &stderr))
        }
    }

    fn run_get_status(&mut self) -> Result<(ExitStatus, String), ExecError> {
        let cmd = cmdline(self);
        tracing::debug!("exec: {cmd}");
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok((output.status, stderr))
    }

    fn run_get_output(&mut self) -> Result<String, ExecError> {
        let cmd = cmdline(self);
        tracing::debug!("exec: {cmd}");
        let output = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(status_to_error(&cmd, output.status, &stderr));
        }
        String::from_utf8(output.stdout).map_err(|_| ExecError::NonUtf8 { cmd })
    }

    fn run_with_input(&mut self, input: &str) -> Result<(), ExecError> {
        let cmd = cmdline(self);
        tracing::debug!("exec (with input): {cmd}");
        let mut child = self
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;
        // The option is always populated with Stdio::piped above.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|e| ExecError::Spawn {
                    cmd: cmd.clone(),
                    source: e,
                })?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(status_to_error(&cmd, output.status, &stderr))
        }
    }

    fn run_with_progress(
        &mut self,
        filter: &mut dyn FnMut(&str) -> Option<u8>,
    ) -> Result<(ExitStatus, String), ExecError> {
        let cmd = cmdline(self);
        tracing::debug!("exec (with progress): {cmd}");
        let mut child = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;

        let progress_id = crate::report_started(&format!("Started '{cmd}'"));
        if let Some(stdout) = child.stdout.take() {
            let reader = std::io::BufReader::new(stdout);
            for line in std::io::BufRead::lines(reader) {
                let line = line.map_err(|e| ExecError::Spawn {
                    cmd: cmd.clone(),
                    source: e,
                })?;
                if let Some(pct) = filter(&line) {
                    crate::report_progress(progress_id, pct, None);
                }
            }
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr).map_err(|e| ExecError::Spawn {
                cmd: cmd.clone(),
                source: e,
            })?;
        }
        let status = child.wait().map_err(|e| ExecError::Spawn {
            cmd: cmd.clone(),
            source: e,
        })?;
        crate::report_finished(progress_id, if status.success() { "Completed" } else { "Failed" });
        Ok((status, stderr))
    }
}

/// Build a [`Command`] from a program, fixed arguments and extra arguments.
pub fn build_command(argv: &[&str], extra: &[ExtraArg]) -> Command {
    let mut cmd = Command::new(argv[0]);
    cmd.args(&argv[1..]);
    cmd.extra_args(extra);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_args_encoding() {
        let mut cmd = build_command(
            &["mke2fs", "-t", "ext4"],
            &[
                ExtraArg::new("-L", "mylabel"),
                ExtraArg::flag("-F"),
                ExtraArg::new("", "/dev/sda1"),
            ],
        );
        cmd.arg("trailing");
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["-t", "ext4", "-L", "mylabel", "-F", "/dev/sda1", "trailing"]
        );
    }

    #[test]
    fn test_run_true_false() {
        assert!(Command::new("true").run().is_ok());
        let err = Command::new("false").run().unwrap_err();
        assert!(matches!(err, ExecError::Failed { .. }));
    }

    #[test]
    fn test_run_get_output() -> anyhow::Result<()> {
        let out = Command::new("echo").arg("hello").run_get_output()?;
        assert_eq!(out.trim(), "hello");
        Ok(())
    }

    #[test]
    fn test_run_get_status_nonzero_is_ok() -> anyhow::Result<()> {
        let (status, _) = Command::new("false").run_get_status()?;
        assert_eq!(status.code(), Some(1));
        Ok(())
    }

    #[test]
    fn test_run_with_input() -> anyhow::Result<()> {
        Command::new("cat").run_with_input("y\n")?;
        Ok(())
    }

    #[test]
    fn test_run_with_progress() -> anyhow::Result<()> {
        let mut seen = Vec::new();
        let (status, _) = Command::new("printf")
            .arg("1 10 100 /dev/sda\nnoise\n")
            .run_with_progress(&mut |line| {
                seen.push(line.to_string());
                None
            })?;
        assert!(status.success());
        assert_eq!(seen.len(), 2);
        Ok(())
    }
}
