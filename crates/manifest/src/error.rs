//! API error types.

/// Errors produced by the hub API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed (401): check your token")]
    Authentication,

    #[error("forbidden (403): you may need to accept the repository's terms on the hub website")]
    Forbidden,

    #[error("not found (404): check the repository name and branch")]
    NotFound,

    #[error("unexpected status code {status} from {url}")]
    Status { status: u16, url: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no redirect location found for large object: {0}")]
    MissingRedirect(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("invalid auth token")]
    InvalidToken,
}

impl ApiError {
    /// Errors that will not go away by asking again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ApiError::Authentication
                | ApiError::Forbidden
                | ApiError::NotFound
                | ApiError::InvalidToken
        )
    }

    /// Network-level failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_request(),
            ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_family_is_fatal() {
        assert!(ApiError::Authentication.is_fatal());
        assert!(ApiError::Forbidden.is_fatal());
        assert!(ApiError::NotFound.is_fatal());
        assert!(!ApiError::Authentication.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = ApiError::Status {
            status: 503,
            url: "http://hub/x".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_fatal());

        let err = ApiError::Status {
            status: 400,
            url: "http://hub/x".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(ApiError::Timeout("http://hub/x".into()).is_transient());
    }

    #[test]
    fn forbidden_message_mentions_terms() {
        assert!(ApiError::Forbidden.to_string().contains("terms"));
    }
}
