// Error types for the relay core

use thiserror::Error;

/// Errors surfaced by the relay's fallible operations.
///
/// Alert delivery and observer delivery never produce these: they report a
/// [`crate::notify::DispatchOutcome`] or are dropped silently.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to spawn supervised process: {0}")]
    Spawn(String),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RelayError::Spawn("claude: not found".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to spawn supervised process: claude: not found"
        );

        let err = RelayError::Config("port must be non-zero".to_string());
        assert!(err.to_string().contains("port must be non-zero"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: RelayError = io.into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
