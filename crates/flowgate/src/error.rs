//! Error types for the flow-control sink

use thiserror::Error;

/// Result alias used throughout the crate
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors produced by the flow-control sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Configuration rejected at construction time
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// The downstream sink failed to persist a forwarded chunk
    #[error("Downstream sink error: {message}")]
    Downstream {
        /// Description of the downstream failure
        message: String,
    },

    /// Write attempted after the sink was closed or aborted
    #[error("Sink is closed")]
    Closed,

    /// The sink was aborted and the request was cancelled
    #[error("Sink aborted: {reason}")]
    Aborted {
        /// Reason supplied to `abort`
        reason: String,
    },
}

impl FlowError {
    /// Create a configuration error
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create a downstream failure error
    pub fn downstream(message: impl Into<String>) -> Self {
        Self::Downstream {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::downstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowError::invalid_configuration("window must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: window must be positive"
        );

        let err = FlowError::aborted("shutdown");
        assert_eq!(err.to_string(), "Sink aborted: shutdown");
    }

    #[test]
    fn test_io_error_maps_to_downstream() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: FlowError = io.into();
        assert!(matches!(err, FlowError::Downstream { .. }));
    }
}
