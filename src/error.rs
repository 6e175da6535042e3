//! lockstep error types

use std::path::PathBuf;

/// lockstep result type
pub type Result<T> = std::result::Result<T, Error>;

/// lockstep errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or unsupported run configuration
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// Dataset or data loader error
    #[error("data error: {reason}")]
    DataError {
        /// Description of what went wrong
        reason: String,
    },

    /// Model construction or state installation error
    #[error("model error: {reason}")]
    ModelError {
        /// Description of what went wrong
        reason: String,
    },

    /// Training/optimizer error
    #[error("training error: {reason}")]
    TrainingError {
        /// Description of what went wrong
        reason: String,
    },

    /// Distributed communication error
    #[error("distributed error: {reason}")]
    DistributedError {
        /// Description of what went wrong
        reason: String,
    },

    /// Resume path does not point at a checkpoint file
    #[error("no checkpoint found at '{}'", path.display())]
    CheckpointNotFound {
        /// The missing path
        path: PathBuf,
    },

    /// Checkpoint serialization/deserialization error
    #[error("checkpoint error: {reason}")]
    CheckpointError {
        /// Description of what went wrong
        reason: String,
    },
}
