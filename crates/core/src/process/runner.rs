//! Tokio-based process runner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::OutputLineCodec;
use super::config::ProcessConfig;
use super::error::ProcessError;
use super::traits::ProcessRunner;
use super::types::{
    OutputBuffer, OutputLine, OutputStream, ProcessInvocation, ProcessResult, Termination,
};

/// How long to wait for the output pumps after the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Process runner built on `tokio::process`.
///
/// Each child is placed in its own process group so termination reaches
/// helpers it spawned (yt-dlp launching ffmpeg for merges, for instance).
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    config: ProcessConfig,
}

impl TokioProcessRunner {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProcessConfig::default())
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.config.termination_grace_ms)
    }

    /// Terminates the child: graceful signal, grace period, then kill.
    async fn terminate(&self, child: &mut Child, program: &str) -> Option<ExitStatus> {
        send_graceful_signal(child);

        match timeout(self.grace_period(), child.wait()).await {
            Ok(Ok(status)) => {
                debug!(program, "Process exited after graceful termination");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(program, error = %e, "Failed waiting for terminated process");
                force_kill(child).await
            }
            Err(_) => {
                warn!(
                    program,
                    grace_ms = self.config.termination_grace_ms,
                    "Process ignored graceful termination, killing"
                );
                force_kill(child).await
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        invocation: &ProcessInvocation,
        lines: Option<mpsc::Sender<OutputLine>>,
        cancel: CancellationToken,
    ) -> Result<ProcessResult, ProcessError> {
        let program = invocation.program().to_path_buf();
        let program_name = program.display().to_string();
        let start = Instant::now();

        let mut command = Command::new(&program);
        command
            .args(invocation.arguments())
            .current_dir(invocation.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::launch(&program, e))?;
        let pid = child.id();

        debug!(
            program = %program_name,
            pid = ?pid,
            args = ?invocation.arguments(),
            "Spawned process"
        );

        let limit = self.config.output_limit_bytes;
        let stdout_buf = Arc::new(Mutex::new(OutputBuffer::new(limit)));
        let stderr_buf = Arc::new(Mutex::new(OutputBuffer::new(limit)));

        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_lines(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&stdout_buf),
                lines.clone(),
                limit,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_lines(
                stderr,
                OutputStream::Stderr,
                Arc::clone(&stderr_buf),
                lines,
                limit,
            )));
        }

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(invocation.timeout()) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let (termination, status) = match outcome {
            WaitOutcome::Exited(Ok(status)) => (Termination::Exited, Some(status)),
            WaitOutcome::Exited(Err(e)) => {
                let _ = self.terminate(&mut child, &program_name).await;
                abort_pumps(pumps);
                return Err(ProcessError::Io { program, source: e });
            }
            WaitOutcome::TimedOut => {
                warn!(
                    program = %program_name,
                    timeout_secs = invocation.timeout().as_secs(),
                    "Process timed out"
                );
                (
                    Termination::TimedOut,
                    self.terminate(&mut child, &program_name).await,
                )
            }
            WaitOutcome::Cancelled => {
                debug!(program = %program_name, "Cancellation requested, terminating process");
                (
                    Termination::Cancelled,
                    self.terminate(&mut child, &program_name).await,
                )
            }
        };

        // A grandchild that inherited our pipes keeps the pumps alive.
        let drained = drain_pumps(pumps).await;
        if !drained {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
        }

        let (stdout, stdout_truncated) = {
            let buf = stdout_buf.lock();
            (buf.contents(), buf.is_truncated())
        };
        let (stderr, stderr_truncated) = {
            let buf = stderr_buf.lock();
            (buf.contents(), buf.is_truncated())
        };

        let result = ProcessResult {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration: start.elapsed(),
            termination,
        };

        debug!(
            program = %program_name,
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            termination = ?termination,
            "Process finished"
        );

        match termination {
            Termination::Exited => Ok(result),
            Termination::TimedOut => Err(ProcessError::Timeout {
                program,
                timeout_secs: invocation.timeout().as_secs(),
                result: Box::new(result),
            }),
            Termination::Cancelled => Err(ProcessError::Cancelled {
                program,
                result: Box::new(result),
            }),
        }
    }
}

/// Reads a stream line by line into the buffer and the observer.
///
/// Lines longer than the retained output limit arrive in pieces.
async fn pump_lines<R>(
    reader: R,
    stream: OutputStream,
    buffer: Arc<Mutex<OutputBuffer>>,
    observer: Option<mpsc::Sender<OutputLine>>,
    max_line: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, OutputLineCodec::new(max_line));

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(text) => {
                buffer.lock().push(&text);
                if let Some(ref tx) = observer {
                    // A closed observer is fine, output is still retained.
                    let _ = tx.send(OutputLine { stream, text }).await;
                }
            }
            Err(e) => {
                debug!(?stream, error = %e, "Stopped reading process output");
                break;
            }
        }
    }
}

/// Waits for the pumps to hit EOF; returns false if they had to be aborted.
async fn drain_pumps(pumps: Vec<JoinHandle<()>>) -> bool {
    let aborts: Vec<_> = pumps.iter().map(|p| p.abort_handle()).collect();
    match timeout(OUTPUT_DRAIN_TIMEOUT, futures::future::join_all(pumps)).await {
        Ok(_) => true,
        Err(_) => {
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

fn abort_pumps(pumps: Vec<JoinHandle<()>>) {
    for pump in pumps {
        pump.abort();
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM to process group failed");
            }
        }
        None => debug!("Process already reaped, nothing to signal"),
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &mut Child) {
    // No graceful signal available; the grace period just lets it exit.
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, error = %e, "SIGKILL to process group failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

async fn force_kill(child: &mut Child) -> Option<ExitStatus> {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill process");
    }
    child.try_wait().ok().flatten()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str, timeout: Duration) -> ProcessInvocation {
        ProcessInvocation::new("/bin/sh", std::env::temp_dir(), timeout).args(["-c", script])
    }

    fn runner() -> TokioProcessRunner {
        TokioProcessRunner::new(ProcessConfig::default().with_grace_ms(500))
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let result = runner()
            .run(
                &sh("echo hello; echo oops >&2; exit 3", Duration::from_secs(5)),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.termination, Termination::Exited);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_streams_lines_before_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let result = runner()
            .run(
                &sh("printf 'one\\rtwo\\nthree\\n'", Duration::from_secs(5)),
                Some(tx),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success());
        let mut seen = Vec::new();
        while let Ok(line) = rx.try_recv() {
            seen.push(line.text);
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_carriage_return_progress_arrives_while_running() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let run = tokio::spawn(async move {
            runner()
                .run(
                    &sh("printf '10%%\\r20%%\\r'; sleep 30", Duration::from_secs(60)),
                    Some(tx),
                    run_cancel,
                )
                .await
        });

        let first = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("progress line should arrive before the process exits")
            .unwrap();
        assert_eq!(first.text, "10%");
        let second = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.text, "20%");

        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_output_without_newlines_is_bounded() {
        let (tx, mut rx) = mpsc::channel(1024);
        let runner = TokioProcessRunner::new(ProcessConfig::default().with_output_limit(64));
        let result = runner
            .run(
                &sh(
                    "i=0; while [ $i -lt 200 ]; do printf 'xxxxxxxxxx'; i=$((i+1)); done",
                    Duration::from_secs(5),
                ),
                Some(tx),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.stdout.len() <= 64);
        assert!(result.stdout_truncated);
        let mut pieces = 0;
        while let Ok(line) = rx.try_recv() {
            assert!(line.text.len() <= 64);
            pieces += 1;
        }
        assert!(pieces > 1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let invocation = ProcessInvocation::new(
            PathBuf::from("/definitely/not/a/binary"),
            std::env::temp_dir(),
            Duration::from_secs(1),
        );
        let err = runner()
            .run(&invocation, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let started = Instant::now();
        let err = runner()
            .run(
                &sh("echo started; sleep 30", Duration::from_millis(200)),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            ProcessError::Timeout { result, .. } => {
                assert_eq!(result.termination, Termination::TimedOut);
                assert_eq!(result.stdout, "started");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ignored_sigterm_is_force_killed() {
        let started = Instant::now();
        let err = runner()
            .run(
                &sh("trap '' TERM; sleep 30", Duration::from_millis(100)),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = runner()
            .run(&sh("sleep 30", Duration::from_secs(30)), None, cancel)
            .await
            .unwrap_err();

        match err {
            ProcessError::Cancelled { result, .. } => {
                assert_eq!(result.termination, Termination::Cancelled);
                assert!(result.was_terminated());
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_is_bounded() {
        let runner = TokioProcessRunner::new(ProcessConfig::default().with_output_limit(64));
        let result = runner
            .run(
                &sh(
                    "i=0; while [ $i -lt 100 ]; do echo line-$i; i=$((i+1)); done",
                    Duration::from_secs(5),
                ),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.stdout.len() <= 64);
        assert!(result.stdout_truncated);
        assert!(result.stdout.ends_with("line-99"));
    }
}
