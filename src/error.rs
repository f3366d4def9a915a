use thiserror::Error;

/// Main error type for the learner
#[derive(Error, Debug)]
pub enum LearnerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config dump error: {0}")]
    ConfigDump(#[from] toml::ser::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Replay service returned {status} for {operation}")]
    ReplayStatus {
        operation: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("{operation} gave up after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Data errors
    #[error("Length mismatch in {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    // Collaborator faults
    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Environment error: {0}")]
    Environment(String),

    // Lifecycle errors
    #[error("Unit exited: {unit}")]
    UnitExited { unit: &'static str },

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for LearnerError
pub type Result<T> = std::result::Result<T, LearnerError>;
