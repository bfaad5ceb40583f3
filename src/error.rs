use thiserror::Error;

/// The only failure text a client sees when the cause is internal.
pub const PLATFORM_FAILURE: &str = "RAPP Platform Failure";

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Pre-flight input failed a validity or security gate. The broker never started.
    #[error("{0}")]
    Rejected(String),

    /// The backend explicitly reported failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The connection carrying the call was unavailable or dropped.
    #[error("backend connection failure: {0}")]
    Connection(String),

    /// No backend response arrived within `retries` timeout windows.
    #[error("no backend response after {retries} x {timeout_ms} ms")]
    TimeoutExhausted { retries: u32, timeout_ms: u64 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no free request identifier after {0} attempts")]
    IdentifiersExhausted(usize),
}

impl BrokerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Text placed in the response `error` field. Diagnostic detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Rejected(message) | Self::Backend(message) => message.clone(),
            Self::Connection(_)
            | Self::TimeoutExhausted { .. }
            | Self::Io { .. }
            | Self::IdentifiersExhausted(_) => PLATFORM_FAILURE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_failures_hide_their_cause_from_clients() {
        let error = BrokerError::io(
            "failed to stage upload",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error.client_message(), PLATFORM_FAILURE);
        assert!(error.to_string().contains("denied"));

        let error = BrokerError::TimeoutExhausted {
            retries: 3,
            timeout_ms: 100,
        };
        assert_eq!(error.client_message(), PLATFORM_FAILURE);

        let error = BrokerError::Connection("rosbridge connection closed".into());
        assert_eq!(error.client_message(), PLATFORM_FAILURE);
        assert!(error.to_string().contains("rosbridge connection closed"));
    }

    #[test]
    fn backend_and_rejection_messages_reach_the_client() {
        assert_eq!(
            BrokerError::Backend("no such user".into()).client_message(),
            "no such user"
        );
        assert_eq!(
            BrokerError::Rejected("invalid file_uri".into()).client_message(),
            "invalid file_uri"
        );
    }
}
