use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::AuthenticationError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not logged in: {0}")]
    Auth(#[from] AuthenticationError),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Repository returned status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("No response body from {0}")]
    EmptyBody(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cookie {0:?} cannot be sent as a header")]
    InvalidCookie(String),

    #[error("Failed to read archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RepositoryError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        RepositoryError::Status {
            status,
            body: Self::truncate_body(body),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RepositoryError::Status { status, .. } => Some(*status),
            RepositoryError::NetworkError(e) => e.status(),
            _ => None,
        }
    }

    /// Whether a second attempt could succeed. Login failures and local
    /// problems would only fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RepositoryError::Auth(_)
                | RepositoryError::InvalidCookie(_)
                | RepositoryError::Archive { .. }
        )
    }
}
