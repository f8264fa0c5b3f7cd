//! Error types for tomopar-core.

use thiserror::Error;

use crate::partition::ChunkDescriptor;

/// Result type for tomopar-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tomopar-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A shared segment could not be created.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// A shared segment could not be attached (stale handle or shape/type mismatch).
    #[error("attach error: {0}")]
    Attach(String),

    /// An operation parameter is not a plain value type or fails validation.
    #[error("unsupported parameter `{name}`: {reason}")]
    UnsupportedParameter { name: String, reason: String },

    /// No filter is registered under the requested function id.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The operation cannot be applied to the given inputs.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A transform raised while processing a chunk.
    #[error("chunk {chunk} failed at slice {slice}: {cause}")]
    ChunkFailure {
        chunk: ChunkDescriptor,
        slice: u64,
        cause: String,
    },

    /// Execution was stopped cooperatively through the cancel token.
    #[error("execution cancelled after {completed} of {total} slices")]
    Cancelled { completed: u64, total: u64 },

    /// A worker process exited or stopped responding mid-execution.
    #[error("worker process {pid} lost: {message}")]
    WorkerLost { pid: u32, message: String },

    /// IPC communication error with a worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid execution or arena configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// A short recovery hint for the user, if one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Allocation(_) => Some(
                "free space in the segment directory, reduce the volume, or point TOMOPAR_SHM_DIR elsewhere",
            ),
            Self::Attach(_) => Some("the shared segment was released or recreated; rerun the operation"),
            Self::UnsupportedParameter { .. } => {
                Some("parameters must be booleans, numbers, strings or short numeric tuples")
            }
            Self::UnknownOperation(_) => Some("run `tomopar filters` to list the available filters"),
            Self::WorkerLost { .. } | Self::Ipc(_) => {
                Some("set TOMOPAR_WORKER_PATH to a tomopar-worker binary built from the same version")
            }
            _ => None,
        }
    }

    /// Format the error together with its recovery hint.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_failure() {
        let cancelled = Error::Cancelled {
            completed: 3,
            total: 8,
        };
        assert!(cancelled.is_cancellation());

        let failed = Error::ChunkFailure {
            chunk: ChunkDescriptor::new(3, 6),
            slice: 5,
            cause: "boom".to_string(),
        };
        assert!(!failed.is_cancellation());
        assert_eq!(failed.to_string(), "chunk [3, 6) failed at slice 5: boom");
    }

    #[test]
    fn test_with_hint() {
        let err = Error::UnknownOperation("sharpen".to_string());
        let text = err.with_hint();
        assert!(text.starts_with("unknown operation: sharpen"));
        assert!(text.contains("tomopar filters"));

        let err = Error::Cancelled {
            completed: 0,
            total: 1,
        };
        assert_eq!(err.with_hint(), err.to_string());
    }
}
