use thiserror::Error;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway returned HTTP {status}: {message}")]
    GatewayStatus { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Action not allowed: {0}")]
    NotAllowed(String),

    #[error("Live stream error: {0}")]
    Stream(String),

    #[error("View torn down before the {0} completed")]
    Detached(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ConsoleError {
    /// Errors raised by a client-side guard before any network call.
    pub fn is_rejected_locally(&self) -> bool {
        matches!(self, ConsoleError::Validation(_) | ConsoleError::NotAllowed(_))
    }

    /// The action reached the gateway but its view was gone by the time it
    /// answered, so nothing was applied.
    pub fn is_detached(&self) -> bool {
        matches!(self, ConsoleError::Detached(_))
    }

    /// Operator-facing text for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            ConsoleError::GatewayStatus { message, .. } if !message.is_empty() => message.clone(),
            ConsoleError::Gateway(message)
            | ConsoleError::Validation(message)
            | ConsoleError::NotAllowed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = ConsoleError::GatewayStatus {
            status: 422,
            message: "Segment is empty".into(),
        };
        assert_eq!(err.user_message(), "Segment is empty");

        let err = ConsoleError::GatewayStatus {
            status: 502,
            message: String::new(),
        };
        assert_eq!(err.user_message(), "Gateway returned HTTP 502: ");
    }

    #[test]
    fn test_local_rejections() {
        assert!(ConsoleError::NotAllowed("scheduled".into()).is_rejected_locally());
        assert!(!ConsoleError::Gateway("timeout".into()).is_rejected_locally());
        assert!(!ConsoleError::Detached("delete".into()).is_rejected_locally());
        assert!(ConsoleError::Detached("delete".into()).is_detached());
    }
}
