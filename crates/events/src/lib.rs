//! Live job output fan-out.
//!
//! This crate provides the [`LogBroadcaster`], the publish/subscribe hub
//! that carries a running job's output lines to any number of observers:
//!
//! - [`LogBroadcaster`]: per-job channels backed by
//!   `tokio::sync::broadcast`, keyed by [`channel_name`].
//! - [`LogEvent`]: a line, or the end-of-stream marker.
//! - [`LogSubscription`]: one observer's single-pass view of a channel.

pub mod bus;

pub use bus::{channel_name, LogBroadcaster, LogEvent, LogSubscription, END_MARKER};
