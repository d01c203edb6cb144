//! External process execution with live output streaming.
//!
//! The conversion toolkit is an opaque process. [`runner::ProcessRunner`]
//! launches it, forwards every output line to a [`sink::LineSink`] as soon
//! as it is read, and reports the exit status. All subprocess management is
//! storage-free and lives in `core` for isolation and testability.

pub mod runner;
pub mod sink;
