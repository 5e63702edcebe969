//! Error types for CloudRAID
//!
//! Every failure inside a distribution or retrieval job is an [`Error`].
//! At the slot boundary errors are classified into a [`FailureKind`] and
//! converted into a job outcome, so nothing escapes a pool slot.

use hyper::StatusCode;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the CloudRAID core
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error on local staging storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A required configuration key is not set
    #[error("Missing configuration value: {0}")]
    MissingConfigValue(String),

    /// Configuration value present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file could not be parsed or written
    #[error("Settings file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    /// Operation attempted against a record in the wrong status
    #[error("File {path} has state {actual} but {expected} expected")]
    IllegalState {
        path: String,
        actual: String,
        expected: String,
    },

    /// No metadata record for the given file id
    #[error("File not found: {0}")]
    FileNotFound(u64),

    /// Metadata store failure
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// A storage connector reported failure
    #[error("Connector {connector} failed to {operation} {resource}")]
    BackendFailed {
        connector: usize,
        operation: String,
        resource: String,
    },

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Codec split/merge failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid stripe configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// Insufficient shards for reconstruction
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Shard manifest could not be decoded
    #[error("Corrupt shard manifest: {0}")]
    ManifestCorrupt(String),

    // =========================================================================
    // Pool / Intake Errors
    // =========================================================================
    /// No free slot and the pool is configured to fail fast
    #[error("No free core access slot (capacity {capacity})")]
    SlotUnavailable { capacity: usize },

    /// Non-blocking dequeue on an empty queue
    #[error("No element in file queue")]
    QueueEmpty,

    /// A job routed through the service did not succeed
    #[error("{operation} job failed ({kind}): {message}")]
    JobFailed {
        operation: String,
        kind: FailureKind,
        message: String,
    },

    /// Event serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an illegal-state error for a record.
    pub fn illegal_state(
        path: impl Into<String>,
        actual: impl std::fmt::Display,
        expected: impl std::fmt::Display,
    ) -> Self {
        Error::IllegalState {
            path: path.into(),
            actual: actual.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Create a backend failure for a connector call.
    pub fn backend(connector: usize, operation: &str, resource: impl Into<String>) -> Self {
        Error::BackendFailed {
            connector,
            operation: operation.to_string(),
            resource: resource.into(),
        }
    }

    /// Classify this error for the job boundary.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::MissingConfigValue(_) | Error::Config(_) | Error::Yaml(_) => {
                FailureKind::Configuration
            }
            Error::IllegalState { .. } => FailureKind::IllegalState,
            Error::FileNotFound(_) => FailureKind::NotFound,
            Error::DataAccess(_) => FailureKind::DataAccess,
            Error::BackendFailed { .. } => FailureKind::Backend,
            Error::Io(_) => FailureKind::Io,
            Error::Codec(_)
            | Error::InvalidEcConfig(_)
            | Error::InsufficientShards { .. }
            | Error::ManifestCorrupt(_) => FailureKind::Codec,
            Error::SlotUnavailable { .. } => FailureKind::Capacity,
            Error::JobFailed { kind, .. } => *kind,
            Error::QueueEmpty | Error::Json(_) | Error::Metrics(_) | Error::Internal(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Whether retrying the same job later could succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Backend | FailureKind::Io | FailureKind::Capacity
        )
    }
}

// =============================================================================
// Failure Classification
// =============================================================================

/// Coarse failure class reported at the job boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing or invalid settings
    Configuration,
    /// Record status did not match the operation's precondition
    IllegalState,
    /// Record does not exist
    NotFound,
    /// A connector call returned failure/absent
    Backend,
    /// Local disk failure
    Io,
    /// Metadata store failure
    DataAccess,
    /// Split/merge failure
    Codec,
    /// Pool exhausted
    Capacity,
    /// Anything else
    Internal,
}

impl FailureKind {
    /// HTTP status a front end should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FailureKind::IllegalState => StatusCode::CONFLICT,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::Capacity => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::IllegalState => "illegal_state",
            FailureKind::NotFound => "not_found",
            FailureKind::Backend => "backend",
            FailureKind::Io => "io",
            FailureKind::DataAccess => "data_access",
            FailureKind::Codec => "codec",
            FailureKind::Capacity => "capacity",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}
