//! Error types for shm_comm

use std::io;
use thiserror::Error;

/// Result type for shm_comm operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors that can occur in shm_comm operations
///
/// Data states (`NoData`, `OldData`, `NewData`) are not errors; they are
/// returned as [`crate::DataState`].
#[derive(Debug, Error)]
pub enum ShmError {
    /// Bad channel name, slot size or reader capacity
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected mapping, allocation or lock failure
    #[error("Fatal error during {op}: {source}")]
    Fatal {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A backing shared memory object does not exist
    #[error("Channel not found: '{name}'")]
    ChannelNotFound { name: String },

    /// Creation without `force` hit an existing shared memory object
    #[error("Channel already exists: '{name}'")]
    ChannelExists { name: String },

    /// Region size on the OS does not match the size the header declares
    #[error("Channel '{name}' is inconsistent: {region} region is {actual} bytes, expected {expected}")]
    ChannelInconsistent {
        name: String,
        region: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Lock or signal primitives could not be initialized
    #[error("Failed to initialize channel '{name}': {source}")]
    InitializationFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Regions were opened but no handle could be registered
    #[error("Failed to create handle for channel '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    /// Every reader identity of the channel is taken
    #[error("No reader slots available in channel '{name}' (max {max_readers})")]
    NoReaderSlots { name: String, max_readers: usize },

    /// `publish` was called without a slot acquired for writing
    #[error("No write slot acquired")]
    NoSlotAcquired,

    /// A timed wait reached its deadline without new data
    #[error("Channel access timeout")]
    Timeout,
}

impl ShmError {
    pub(crate) fn fatal(op: &'static str, source: impl Into<io::Error>) -> Self {
        ShmError::Fatal {
            op,
            source: source.into(),
        }
    }

    /// Shared state holds a value no correct participant could have stored.
    pub(crate) fn corrupted(op: &'static str, detail: String) -> Self {
        ShmError::Fatal {
            op,
            source: io::Error::new(io::ErrorKind::InvalidData, detail),
        }
    }

    /// Result code of this error in the C interface
    pub fn code(&self) -> i32 {
        use crate::bindings::*;
        match self {
            ShmError::InvalidArgument(_) | ShmError::NoSlotAcquired => SHM_INVAL,
            ShmError::Fatal { .. } => SHM_FATAL,
            ShmError::ChannelNotFound { .. } => SHM_NO_CHANNEL,
            ShmError::ChannelInconsistent { .. } => SHM_CHANNEL_INCONSISTENT,
            ShmError::InitializationFailed { .. } => SHM_ERR_INIT,
            ShmError::ChannelExists { .. }
            | ShmError::CreateFailed { .. }
            | ShmError::NoReaderSlots { .. } => SHM_ERR_CREATE,
            ShmError::Timeout => SHM_TIMEOUT,
        }
    }

    /// Whether a caller can reasonably react by recreating the channel.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShmError::ChannelNotFound { .. }
                | ShmError::ChannelInconsistent { .. }
                | ShmError::Timeout
                | ShmError::NoReaderSlots { .. }
        )
    }
}
