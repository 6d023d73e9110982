//! Error types for emucomp-core.

use thiserror::Error;

/// Result type alias for emucomp-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while managing components, connectors and networks.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from emucomp-process
    #[error("process error: {0}")]
    Process(#[from] emucomp_process::ProcessError),

    /// A required subprocess could not be started
    #[error("failed to start {0}")]
    Spawn(String),

    /// A stream connector already has an active link
    #[error("connector already connected: {0}")]
    AlreadyConnected(String),

    /// A switch already carries a connection to this endpoint
    #[error("endpoint already connected: {0}")]
    DuplicateEndpoint(String),

    /// Unknown component, network, connector or connection
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up
        kind: &'static str,
        /// The identifier that did not resolve
        id: String,
    },

    /// A component exists but lacks the requested capability
    #[error("component {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        /// Component ID
        id: String,
        /// Requested capability
        expected: String,
        /// What the component actually is
        actual: String,
    },

    /// Malformed request data
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current lifecycle state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// No free port left in the configured range
    #[error("no free port in range {0}")]
    PortsExhausted(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`CoreError`], used by transports to pick a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed entity does not exist.
    NotFound,
    /// The request itself is wrong.
    BadRequest,
    /// The request conflicts with current state.
    Conflict,
    /// Anything else.
    Internal,
}

impl CoreError {
    /// Shorthand for [`CoreError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument(_) | Self::TypeMismatch { .. } | Self::Json(_) => {
                ErrorKind::BadRequest
            }
            Self::AlreadyConnected(_)
            | Self::DuplicateEndpoint(_)
            | Self::InvalidState { .. }
            | Self::PortsExhausted(_) => ErrorKind::Conflict,
            Self::Process(_) | Self::Spawn(_) | Self::Config(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}
