//! External process execution
//!
//! Every call out to git, docker or the proxy goes through [`CommandRunner`],
//! so the pipeline can be driven against a scripted runner in tests.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::errors::VoltexError;

/// Receives complete output lines as a process produces them
pub trait OutputSink: Send + Sync {
    fn stdout_line(&self, line: &str);
    fn stderr_line(&self, line: &str);
}

/// Discards all output
pub struct NullSink;

impl OutputSink for NullSink {
    fn stdout_line(&self, _line: &str) {}
    fn stderr_line(&self, _line: &str) {}
}

/// A process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// `program subcommand`, e.g. `docker build`, for messages
    pub fn short_name(&self) -> String {
        match self.args.first() {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a [`VoltexError::ProcessError`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self, VoltexError> {
        if self.success() {
            return Ok(self);
        }
        Err(VoltexError::ProcessError(format!(
            "{} exited with code {}",
            spec.short_name(),
            self.code.map_or_else(|| "none".to_string(), |c| c.to_string())
        )))
    }
}

/// Runs external processes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion, forwarding each output line to `sink`.
    ///
    /// A non-zero exit is not an error here; only failing to spawn or read
    /// the process is.
    async fn run(&self, spec: &CommandSpec, sink: &dyn OutputSink) -> Result<CommandOutput, VoltexError>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, sink: &dyn OutputSink) -> Result<CommandOutput, VoltexError> {
        debug!("Running: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoltexError::ProcessError(format!("Failed to run {}: {}", spec.short_name(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoltexError::Internal("stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VoltexError::Internal("stderr was not piped".to_string()))?;

        let (stdout, stderr) = tokio::try_join!(
            pump_lines(stdout, |line| sink.stdout_line(line)),
            pump_lines(stderr, |line| sink.stderr_line(line)),
        )?;

        let status = child.wait().await?;
        debug!("{} exited with {:?}", spec.short_name(), status.code());

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Forward every complete line of `reader` to `on_line`, returning the whole
/// text. A trailing partial line is flushed at EOF. Bytes that are not UTF-8
/// are replaced rather than failing the command.
async fn pump_lines<R, F>(reader: R, on_line: F) -> Result<String, VoltexError>
where
    R: AsyncRead + Unpin,
    F: Fn(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = String::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        on_line(line);
        collected.push_str(line);
        collected.push('\n');
    }
    Ok(collected)
}
