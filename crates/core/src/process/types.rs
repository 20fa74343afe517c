//! Types for the process module.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A fully described external program launch.
///
/// Built once with the builder methods and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ProcessInvocation {
    /// Creates an invocation with no arguments.
    pub fn new(
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single line of output, delivered while the process is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// How the process came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// The timeout elapsed and the process was terminated.
    TimedOut,
    /// Cancellation was requested and the process was terminated.
    Cancelled,
}

/// Outcome of a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Exit code, `None` when the process died from a signal.
    pub exit_code: Option<i32>,
    /// Retained tail of stdout.
    pub stdout: String,
    /// Retained tail of stderr.
    pub stderr: String,
    /// Whether older stdout was dropped to respect the output limit.
    pub stdout_truncated: bool,
    /// Whether older stderr was dropped to respect the output limit.
    pub stderr_truncated: bool,
    /// Wall-clock time from spawn to reap.
    pub duration: Duration,
    pub termination: Termination,
}

impl ProcessResult {
    /// Whether the process exited on its own with status 0.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }

    /// Whether the runner had to terminate the process.
    pub fn was_terminated(&self) -> bool {
        self.termination != Termination::Exited
    }

    /// Creates an exited result, mostly useful for fakes and tests.
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::ZERO,
            termination: Termination::Exited,
        }
    }
}

/// Line ring buffer that keeps at most `limit` bytes of the most recent output.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            truncated: false,
        }
    }

    /// Appends a line, evicting the oldest lines once over the limit.
    pub fn push(&mut self, line: &str) {
        let line = if line.len() > self.limit {
            self.truncated = true;
            tail_str(line, self.limit)
        } else {
            line
        };

        // +1 accounts for the newline joining lines in `contents`.
        self.bytes += line.len() + 1;
        self.lines.push_back(line.to_string());

        while self.bytes > self.limit + 1 {
            match self.lines.pop_front() {
                Some(evicted) => {
                    self.bytes -= evicted.len() + 1;
                    self.truncated = true;
                }
                None => break,
            }
        }
    }

    /// Retained output joined by newlines.
    pub fn contents(&self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Returns the last `max_bytes` bytes of `text`, cut on a char boundary.
pub fn tail_str(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
