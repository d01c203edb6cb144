//! Destination for streamed process output.

use crate::error::StreamTransportError;
use crate::types::JobId;

/// Receives output lines of a running job.
///
/// Implementations must never block the caller: the process runner invokes
/// these methods inline while draining the child's pipes.
pub trait LineSink: Send + Sync {
    /// Deliver one decoded output line (without its trailing newline).
    ///
    /// An error means the line was dropped; the runner logs it and keeps
    /// going.
    fn send_line(&self, job_id: &JobId, line: &str) -> Result<(), StreamTransportError>;

    /// Mark the end of the job's output stream.
    ///
    /// Must be idempotent: only the first call per job emits an end marker.
    fn send_end(&self, job_id: &JobId);
}
