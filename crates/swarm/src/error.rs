//! Error types for the load generation engine.

use thiserror::Error;

/// Result type alias using SwarmError.
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Primary error type for engine operations.
///
/// A request that reaches the target and comes back with a bad status is not
/// an error here: it is recorded as a failure in the stats.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task '{name}' failed: {message}")]
    Task { name: String, message: String },
}

impl SwarmError {
    /// Shorthand for configuration errors.
    pub fn config(message: impl Into<String>) -> Self {
        SwarmError::InvalidConfig(message.into())
    }

    /// Shorthand for task errors.
    pub fn task(name: impl Into<String>, message: impl Into<String>) -> Self {
        SwarmError::Task {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwarmError::config("users must be > 0");
        assert_eq!(err.to_string(), "Invalid configuration: users must be > 0");

        let err = SwarmError::task("browse_books", "boom");
        assert_eq!(err.to_string(), "Task 'browse_books' failed: boom");
    }
}
