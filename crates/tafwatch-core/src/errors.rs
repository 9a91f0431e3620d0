use std::time::Duration;

/// Typed error hierarchy for snapshot fetches against the upstream server.
/// Classifies failures as retryable (transport may try again) or final.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FetchError {
    // Final
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("undecodable response: {0}")]
    Decode(String),

    // Retryable
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError { .. } | Self::Network(_) | Self::Timeout(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Decode(_) => "decode",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a non-success HTTP status code.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => Self::NotFound(body),
            408 | 429 | 500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Failure to turn one inbound push-stream message into a [`crate::events::ReplicaEvent`].
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("message has no string EventType field")]
    MissingEventType,
    #[error("malformed {event_type} event: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("malformed full TMI identifier {raw:?}: field {missing} missing")]
    Malformed { raw: String, missing: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FetchError::ServerError { status: 503, body: "busy".into() }.is_retryable());
        assert!(FetchError::Network("connection reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn final_classification() {
        assert!(!FetchError::NotFound("/tmis/x".into()).is_retryable());
        assert!(!FetchError::InvalidRequest("bad".into()).is_retryable());
        assert!(!FetchError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(FetchError::from_status(404, "gone".into()), FetchError::NotFound(_)));
        assert!(FetchError::from_status(429, "slow down".into()).is_retryable());
        assert!(FetchError::from_status(502, "bad gateway".into()).is_retryable());
        assert!(!FetchError::from_status(400, "bad request".into()).is_retryable());
        assert!(!FetchError::from_status(403, "forbidden".into()).is_retryable());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(FetchError::Network("x".into()).error_kind(), "network_error");
        assert_eq!(
            FetchError::ServerError { status: 500, body: String::new() }.error_kind(),
            "server_error"
        );
    }

    #[test]
    fn id_error_display_names_field() {
        let err = IdError::Malformed { raw: "//a".into(), missing: 3 };
        assert!(err.to_string().contains("field 3"));
    }
}
