use thiserror::Error;

/// `EINVAL` as reported by the process exit status.
pub const EXIT_INVALID: i32 = 22;

#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Exists(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Partial success: {rejected} data points rejected: {message}")]
    PartialSuccess { rejected: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("GRPC transport error: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for kestrel operations
pub type Result<T> = std::result::Result<T, KestrelError>;

impl KestrelError {
    /// Creates a new invalid-argument error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a new duplicate-insertion error
    pub fn exists<S: Into<String>>(msg: S) -> Self {
        Self::Exists(msg.into())
    }

    /// Creates a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if a later attempt of the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::GrpcTransport(_) | Self::Io(_) => true,
            Self::PartialSuccess { .. } => true,
            Self::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Invalid(_) | Self::Config(_) => "invalid",
            Self::NotFound(_) => "not_found",
            Self::Exists(_) => "exists",
            Self::OutOfMemory(_) => "resource",
            Self::Transport(_) | Self::Grpc(_) | Self::GrpcTransport(_) => "transport",
            Self::PartialSuccess { .. } => "partial_success",
            Self::Internal(_) | Self::Join(_) => "internal",
            Self::Io(_) | Self::Parquet(_) => "io",
        }
    }

    /// Process exit status for a failed start-up
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Invalid(_) | Self::Config(_) => EXIT_INVALID,
            _ => 1,
        }
    }
}

impl From<std::collections::TryReserveError> for KestrelError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KestrelError::invalid("label name \"1abc\"");
        assert_eq!(err.to_string(), "Invalid argument: label name \"1abc\"");
        assert_eq!(err.category(), "invalid");
        assert_eq!(err.exit_code(), EXIT_INVALID);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(KestrelError::transport("connection refused").is_recoverable());
        assert!(!KestrelError::invalid("bad level").is_recoverable());
        assert!(KestrelError::Grpc(tonic::Status::unavailable("down")).is_recoverable());
        assert!(!KestrelError::Grpc(tonic::Status::invalid_argument("nope")).is_recoverable());
    }

    #[test]
    fn test_partial_success_message() {
        let err = KestrelError::PartialSuccess {
            rejected: 3,
            message: "out of order".to_string(),
        };
        assert_eq!(err.to_string(), "Partial success: 3 data points rejected: out of order");
        assert_eq!(err.exit_code(), 1);
    }
}
