use doculab_core::error::CoreError;

/// Errors surfaced by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached. Callers decide whether to degrade.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// The write would violate a record invariant (duplicate insert or an
    /// illegal state transition).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::NotFound { entity: "Job", id },
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Unavailable(msg) => CoreError::Internal(format!("store unavailable: {msg}")),
        }
    }
}
