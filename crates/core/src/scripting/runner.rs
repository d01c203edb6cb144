//! Streaming subprocess runner.
//!
//! Unlike a capture-everything executor, [`ProcessRunner::run`] forwards
//! each stdout/stderr line to the sink the moment it is decoded, so
//! observers see near-real-time progress. The end-of-stream marker is sent
//! on every exit path once the child is gone.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

use super::sink::LineSink;
use crate::types::JobId;

/// Longest line forwarded as a single message. Longer runs of output
/// without a newline are split into chunks of this size.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// `ETXTBSY`: the executable was written moments ago and a concurrent fork
/// elsewhere in the process still holds a writable descriptor to it.
const TEXT_FILE_BUSY: i32 = 26;

/// Spawn attempts made while the executable reports `ETXTBSY`.
const SPAWN_ATTEMPTS: u32 = 5;

/// Terminal status of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, or `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Number of output lines read from stdout and stderr together.
    pub lines: u64,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors supervising the child process. A non-zero exit is not an error
/// here; callers inspect [`RunOutcome::exit_code`].
#[derive(Debug)]
pub enum RunError {
    /// The process could not be started.
    Spawn(std::io::Error),
    /// Waiting for the process failed.
    Wait(std::io::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to start process: {err}"),
            Self::Wait(err) => write!(f, "failed to wait for process: {err}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) | Self::Wait(err) => Some(err),
        }
    }
}

/// Launches external commands and streams their output to a [`LineSink`].
#[derive(Clone)]
pub struct ProcessRunner {
    sink: Arc<dyn LineSink>,
}

impl ProcessRunner {
    pub fn new(sink: Arc<dyn LineSink>) -> Self {
        Self { sink }
    }

    /// Run `program args...` with `working_dir` as its current directory.
    ///
    /// Stdin is closed; stdout and stderr are drained concurrently, line by
    /// line. Returns once the process has exited and both pipes reached EOF.
    pub async fn run(
        &self,
        job_id: &JobId,
        working_dir: &Path,
        program: &Path,
        args: &[&str],
    ) -> Result<RunOutcome, RunError> {
        let result = self.run_inner(job_id, working_dir, program, args).await;
        self.sink.send_end(job_id);
        result
    }

    async fn run_inner(
        &self,
        job_id: &JobId,
        working_dir: &Path,
        program: &Path,
        args: &[&str],
    ) -> Result<RunOutcome, RunError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = spawn_retrying(&mut cmd).await.map_err(RunError::Spawn)?;
        tracing::info!(
            job_id = %job_id,
            program = %program.display(),
            pid = child.id(),
            "Conversion process started",
        );

        let stdout_task = tokio::spawn(pump_lines(
            child.stdout.take(),
            *job_id,
            "stdout",
            Arc::clone(&self.sink),
        ));
        let stderr_task = tokio::spawn(pump_lines(
            child.stderr.take(),
            *job_id,
            "stderr",
            Arc::clone(&self.sink),
        ));

        let status = child.wait().await.map_err(RunError::Wait)?;
        let lines = stdout_task.await.unwrap_or_default() + stderr_task.await.unwrap_or_default();

        let outcome = RunOutcome {
            exit_code: status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
            lines,
        };
        tracing::info!(
            job_id = %job_id,
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration_ms,
            lines = outcome.lines,
            "Conversion process exited",
        );
        Ok(outcome)
    }
}

async fn spawn_retrying(cmd: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => return other,
        }
    }
}

/// Forward every line of `handle` to `sink`, returning the number of lines.
async fn pump_lines<R: AsyncRead + Unpin>(
    handle: Option<R>,
    job_id: JobId,
    stream: &'static str,
    sink: Arc<dyn LineSink>,
) -> u64 {
    let Some(handle) = handle else {
        return 0;
    };
    let mut reader = BufReader::new(handle);
    let mut buf = Vec::new();
    // Start of a multi-byte character cut off by the line length cap.
    let mut carry = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        buf.append(&mut carry);
        let limit = MAX_LINE_BYTES - buf.len() as u64;
        match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) if buf.is_empty() => break,
            Ok(read) => {
                if read > 0 && !buf.ends_with(b"\n") {
                    carry = buf.split_off(complete_utf8_prefix(&buf));
                    if buf.is_empty() {
                        continue;
                    }
                }
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                tracing::debug!(job_id = %job_id, stream, "{line}");
                if let Err(e) = sink.send_line(&job_id, line) {
                    tracing::warn!(job_id = %job_id, error = %e, "Dropped output line");
                }
                count += 1;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, stream, error = %e, "Output stream read failed");
                break;
            }
        }
    }
    count
}

/// Length of the longest prefix of `bytes` that does not end partway
/// through a UTF-8 sequence.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
