//! Per-job log channels backed by `tokio::sync::broadcast`.
//!
//! [`LogBroadcaster`] is the live-tail hub for job output. It is designed
//! to be shared via `Arc<LogBroadcaster>` between the process runner (the
//! only publisher of a job's channel) and any number of stream handlers.
//!
//! Delivery is best effort. Lines published while nobody listens are lost,
//! late subscribers get no history, and a subscriber that falls more than
//! the channel capacity behind skips the oldest lines. Publishing never
//! blocks and never waits on subscribers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use doculab_core::error::StreamTransportError;
use doculab_core::scripting::sink::LineSink;
use doculab_core::types::JobId;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

/// Wire form of the end-of-stream marker.
pub const END_MARKER: &str = "__DONE__";

/// Prefix of every job channel name.
pub const CHANNEL_PREFIX: &str = "task:";

/// Default per-channel buffer capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Deterministic channel name for a job.
pub fn channel_name(job_id: &JobId) -> String {
    format!("{CHANNEL_PREFIX}{job_id}")
}

// ---------------------------------------------------------------------------
// LogEvent
// ---------------------------------------------------------------------------

/// One item on a job's log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A decoded output line without its trailing newline.
    Line(String),
    /// End of stream. Sent exactly once per channel.
    End,
}

enum Channel {
    Open {
        sender: broadcast::Sender<LogEvent>,
        last_activity: Instant,
    },
    Finished {
        at: Instant,
    },
}

// ---------------------------------------------------------------------------
// LogBroadcaster
// ---------------------------------------------------------------------------

/// Fan-out hub with one broadcast channel per job.
pub struct LogBroadcaster {
    channels: Mutex<HashMap<String, Channel>>,
    capacity: usize,
}

impl LogBroadcaster {
    /// Create a broadcaster whose per-job channels buffer `capacity` events.
    ///
    /// When a buffer is full the oldest events are overwritten and slow
    /// subscribers skip them.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish one line to the job's channel.
    ///
    /// Succeeds even with zero subscribers (the line is simply lost). Fails
    /// only if the channel has already been finished.
    pub fn publish(&self, job_id: &JobId, line: impl Into<String>) -> Result<(), StreamTransportError> {
        let name = channel_name(job_id);
        let mut channels = self.lock();
        let capacity = self.capacity;
        let channel = channels.entry(name.clone()).or_insert_with(|| open_channel(capacity));
        match channel {
            Channel::Open {
                sender,
                last_activity,
            } => {
                *last_activity = Instant::now();
                // A SendError only means there are no receivers right now.
                let _ = sender.send(LogEvent::Line(line.into()));
                Ok(())
            }
            Channel::Finished { .. } => Err(StreamTransportError::ChannelClosed(name)),
        }
    }

    /// Send the end marker and close the job's channel.
    ///
    /// Returns `false` if the channel was already finished; the marker is
    /// never sent twice.
    pub fn finish(&self, job_id: &JobId) -> bool {
        let name = channel_name(job_id);
        let mut channels = self.lock();
        let previous = channels.insert(name.clone(), Channel::Finished { at: Instant::now() });
        match previous {
            Some(Channel::Open { sender, .. }) => {
                let receivers = sender.send(LogEvent::End).unwrap_or(0);
                tracing::debug!(channel = %name, receivers, "Log channel finished");
                true
            }
            Some(finished @ Channel::Finished { .. }) => {
                channels.insert(name, finished);
                false
            }
            None => true,
        }
    }

    /// Attach a new live subscriber to the job's channel.
    ///
    /// The subscriber sees every event published from now on. Subscribing to
    /// an already finished channel yields a subscription that produces only
    /// the end marker.
    pub fn subscribe(&self, job_id: &JobId) -> LogSubscription {
        let mut channels = self.lock();
        let capacity = self.capacity;
        let channel = channels
            .entry(channel_name(job_id))
            .or_insert_with(|| open_channel(capacity));
        match channel {
            Channel::Open { sender, .. } => LogSubscription::live(*job_id, sender.subscribe()),
            Channel::Finished { .. } => LogSubscription::ended(*job_id),
        }
    }

    /// Whether the job's channel has been finished and not yet swept.
    pub fn is_finished(&self, job_id: &JobId) -> bool {
        matches!(
            self.lock().get(&channel_name(job_id)),
            Some(Channel::Finished { .. })
        )
    }

    /// Number of live subscribers on the job's channel.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        match self.lock().get(&channel_name(job_id)) {
            Some(Channel::Open { sender, .. }) => sender.receiver_count(),
            _ => 0,
        }
    }

    /// Number of tracked channels (open or finished).
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    /// Forget channels idle for longer than `max_idle`.
    ///
    /// Removes finished markers older than `max_idle` and open channels that
    /// have no subscribers and saw no traffic within `max_idle`. Returns the
    /// number of channels removed.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut channels = self.lock();
        let before = channels.len();
        channels.retain(|_, channel| match channel {
            Channel::Finished { at } => now.duration_since(*at) < max_idle,
            Channel::Open {
                sender,
                last_activity,
            } => sender.receiver_count() > 0 || now.duration_since(*last_activity) < max_idle,
        });
        before - channels.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LineSink for LogBroadcaster {
    fn send_line(&self, job_id: &JobId, line: &str) -> Result<(), StreamTransportError> {
        self.publish(job_id, line)
    }

    fn send_end(&self, job_id: &JobId) {
        self.finish(job_id);
    }
}

fn open_channel(capacity: usize) -> Channel {
    let (sender, _) = broadcast::channel(capacity);
    Channel::Open {
        sender,
        last_activity: Instant::now(),
    }
}

// ---------------------------------------------------------------------------
// LogSubscription
// ---------------------------------------------------------------------------

/// A single observer's pass over one job's log channel.
///
/// Yields lines in publish order, then exactly one [`LogEvent::End`], then
/// nothing. Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct LogSubscription {
    job_id: JobId,
    receiver: Option<broadcast::Receiver<LogEvent>>,
    end_sent: bool,
}

impl LogSubscription {
    fn live(job_id: JobId, receiver: broadcast::Receiver<LogEvent>) -> Self {
        Self {
            job_id,
            receiver: Some(receiver),
            end_sent: false,
        }
    }

    /// A subscription to a stream that has already ended.
    pub fn ended(job_id: JobId) -> Self {
        Self {
            job_id,
            receiver: None,
            end_sent: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the next event. Returns `None` once the end marker has been
    /// delivered.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        if self.end_sent {
            return None;
        }
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.recv().await {
                    Ok(LogEvent::Line(line)) => return Some(LogEvent::Line(line)),
                    Ok(LogEvent::End) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = %self.job_id, skipped, "Log subscriber lagged, lines dropped");
                    }
                }
            }
        }
        self.receiver = None;
        self.end_sent = true;
        Some(LogEvent::End)
    }

    /// Consume the subscription as a lazy stream ending after [`LogEvent::End`].
    pub fn into_stream(self) -> impl Stream<Item = LogEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
