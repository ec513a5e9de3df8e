//! Pipeline error taxonomy.
//!
//! Failures the caller must distinguish are typed; everything internal keeps
//! `anyhow`. Storage failures carry their own kind enum so a caller can tell
//! a retryable duplicate-serial collision from a dead backend.

use thiserror::Error;

/// Errors surfaced by the detection pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Camera or stream source unavailable. Fatal to the worker; the caller
    /// decides whether to restart.
    #[error("camera source unavailable: {0}")]
    Acquisition(String),

    /// A classifier asset failed to load. Checked once at construction;
    /// the pipeline must not start without its models.
    #[error("classifier model unavailable: {0}")]
    ModelUnavailable(String),

    /// Malformed region reached the enhancer or classifier. Recovered
    /// locally by skipping the frame; callers never see it from
    /// `process_frame`.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the event store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Uniqueness-constraint violation on the serial column. Retryable:
    /// reallocate and append once more.
    #[error("duplicate serial: {0}")]
    DuplicateSerial(String),

    /// Backing store cannot be reached or opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted row no longer parses (label vocabulary drift, truncated
    /// timestamp). Read-side only.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage failure: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StorageError {
    /// True for failures worth one immediate retry with fresh inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::DuplicateSerial(_))
    }
}
