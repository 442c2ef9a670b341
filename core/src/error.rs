use thiserror::Error;

/// A3S Pod error types
#[derive(Error, Debug)]
pub enum PodError {
    /// Caller contract violation: empty field, bad enum value, duplicate, out of range
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced pod, container, volume, disk or device does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lifecycle operation requested in an incompatible status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// CRI call rejected or failed in flight
    #[error("CRI {operation}: {}", .status.message())]
    Cri {
        operation: String,
        #[source]
        status: tonic::Status,
    },

    /// Could not establish a channel to the runtime endpoint
    #[error("Connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A composite operation stopped at `step`; earlier steps are left in place
    #[error("{step} failed: {source}")]
    PartialFailure {
        step: String,
        #[source]
        source: Box<PodError>,
    },

    /// Lower-layer error wrapped with the operation and target that hit it
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PodError>,
    },

    /// Host command (losetup, mount, binder helper) failed
    #[error("Command {program} failed: {message}")]
    Command { program: String, message: String },

    /// Upstream control-plane metadata update failed
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by callers to decide between "doesn't exist",
/// "caller bug" and "transient".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    Transport,
    PartialFailure,
    Internal,
}

impl PodError {
    /// Classify the root cause, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PodError::Validation(_) => ErrorKind::Validation,
            PodError::NotFound(_) => ErrorKind::NotFound,
            PodError::InvalidState(_) => ErrorKind::InvalidState,
            PodError::Cri { status, .. } => match status.code() {
                tonic::Code::NotFound => ErrorKind::NotFound,
                tonic::Code::InvalidArgument => ErrorKind::Validation,
                _ => ErrorKind::Transport,
            },
            PodError::Connect { .. } | PodError::Timeout(_) => ErrorKind::Transport,
            PodError::PartialFailure { .. } => ErrorKind::PartialFailure,
            PodError::Context { source, .. } => source.kind(),
            PodError::Command { .. }
            | PodError::ControlPlane(_)
            | PodError::Io(_)
            | PodError::Serialization(_)
            | PodError::Config(_)
            | PodError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Wrap a CRI status with the operation name and target id.
    pub fn cri(operation: impl Into<String>, status: tonic::Status) -> Self {
        PodError::Cri {
            operation: operation.into(),
            status,
        }
    }
}

impl From<serde_json::Error> for PodError {
    fn from(err: serde_json::Error) -> Self {
        PodError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PodError {
    fn from(err: serde_yaml::Error) -> Self {
        PodError::Serialization(err.to_string())
    }
}

/// Result type alias for A3S Pod operations
pub type Result<T> = std::result::Result<T, PodError>;

/// Attach operation context to an error as it crosses a component boundary.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PodError::Context {
            context: context.into(),
            source: Box::new(e),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| PodError::Context {
            context: f().into(),
            source: Box::new(e),
        })
    }
}
