//! Submission keys: the logical identity of a unit of work.
//!
//! The key ends up both as a process argument and as part of artifact file
//! names, so it is validated once at the edge and carried as a newtype.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 200;

/// Prefix of the dedup lock entry for a key.
pub const LOCK_KEY_PREFIX: &str = "processing:";

/// A validated submission key (e.g. a spreadsheet name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubmissionKey(String);

impl SubmissionKey {
    /// Validate and wrap a raw key.
    ///
    /// Rules:
    /// - Must not be empty or exceed [`MAX_KEY_LEN`] bytes.
    /// - Must not start with `.`.
    /// - Must not contain path separators or control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CoreError::Validation(
                "Submission key must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "Submission key must not exceed {MAX_KEY_LEN} bytes"
            )));
        }
        if raw.starts_with('.') {
            return Err(CoreError::Validation(
                "Submission key must not start with '.'".to_string(),
            ));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| *c == '/' || *c == '\\' || c.is_control())
        {
            return Err(CoreError::Validation(format!(
                "Submission key contains forbidden character {c:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the dedup lock entry guarding this submission.
    pub fn lock_key(&self) -> String {
        format!("{LOCK_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubmissionKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubmissionKey> for String {
    fn from(key: SubmissionKey) -> Self {
        key.0
    }
}
