//! Error types for volsched

use thiserror::Error;

use crate::model::VolumeId;

/// Main error type for volsched
#[derive(Error, Debug)]
pub enum VolschedError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request never produced a usable response (connect, timeout, HTTP status)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The cluster API answered with an error object
    #[error("Remote API error {code} ({name}): {message}")]
    Remote {
        code: i64,
        name: String,
        message: String,
    },

    /// The response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// No node could be determined for a volume
    #[error("Could not determine node for volume {0}")]
    Unresolved(VolumeId),

    /// A backup job could not be started
    #[error("Failed to start backup for volume {volume_id}: {reason}")]
    JobStart { volume_id: VolumeId, reason: String },

    /// The run was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VolschedError {
    /// Whether this error came from a remote call that may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VolschedError::Transport(_) | VolschedError::Remote { .. } | VolschedError::Decode(_)
        )
    }
}

/// Result type for volsched operations
pub type VolschedResult<T> = Result<T, VolschedError>;

impl From<serde_json::Error> for VolschedError {
    fn from(err: serde_json::Error) -> Self {
        VolschedError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VolschedError {
    fn from(err: toml::de::Error) -> Self {
        VolschedError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VolschedError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");

        let err = VolschedError::Remote {
            code: 500,
            name: "xUnknown".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Remote API error 500 (xUnknown): boom");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VolschedError = io_err.into();
        assert!(matches!(err, VolschedError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(VolschedError::Transport("reset".into()).is_transient());
        assert!(VolschedError::Decode("eof".into()).is_transient());
        assert!(!VolschedError::Unresolved(7).is_transient());
        assert!(!VolschedError::Cancelled.is_transient());
    }
}
