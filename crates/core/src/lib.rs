//! Doculab domain core.
//!
//! Pure domain types and logic shared by every other crate: job identity
//! and lifecycle, the artifact naming contract, submission-key validation,
//! toolkit configuration rendering, and the streaming process runner.
//! Nothing in here touches shared storage.

pub mod artifacts;
pub mod error;
pub mod job;
pub mod scripting;
pub mod submission;
pub mod toolkit;
pub mod types;
