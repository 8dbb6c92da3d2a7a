use thiserror::Error;

/// Failure talking to the laser gate or the motion endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("{operation} failed: {reason}")]
    Failure { operation: String, reason: String },

    #[error("gateway not connected")]
    NotConnected,
}

impl GatewayError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        GatewayError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn failure(operation: impl Into<String>, reason: impl ToString) -> Self {
        GatewayError::Failure {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}
