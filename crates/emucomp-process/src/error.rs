//! Error types for emucomp-process.

use thiserror::Error;

/// Result type alias for emucomp-process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while running a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be spawned
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The runner already owns a live process
    #[error("process already started: {0}")]
    AlreadyStarted(String),

    /// The runner has no process to operate on
    #[error("process not started: {0}")]
    NotStarted(String),

    /// Delivering a signal failed
    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// Wiring stdout into stdin failed
    #[error("pipe setup failed: {0}")]
    Pipe(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
