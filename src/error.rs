//! Error types for SharedChannels

use std::io;
use thiserror::Error;

/// Result type for SharedChannels operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur in SharedChannels operations
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An authority already holds a segment under this name
    #[error("Shared memory '{name}' already exists (pass force to reclaim it)")]
    AlreadyExists { name: String },

    /// Participant open without a running authority
    #[error("No authority running for '{name}'")]
    NoAuthority { name: String },

    /// Channel index outside the table
    #[error("Channel index {index} out of range: 0 <= index < {count}")]
    OutOfRange { index: usize, count: usize },

    /// The authority has torn the table down
    #[error("Authority is down, channel data is no longer maintained")]
    AuthorityDown,

    /// Handle used after its own close()
    #[error("Handle is already closed")]
    Detached,

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to unlink shared memory
    #[error("Failed to unlink shared memory '{name}': {source}")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Attached segment does not match the expected layout size
    #[error("Segment size mismatch: expected {expected} bytes, got {got} bytes")]
    SizeMismatch { expected: usize, got: usize },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Namespace contains characters shm_open cannot take
    #[error("Invalid namespace '{0}'")]
    InvalidName(String),

    /// Caller configuration error (clamp bounds, normalization, channel count)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
