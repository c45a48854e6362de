use reqwest::StatusCode;
use thiserror::Error;

/// An error surfaced to callers of [`ApiClient`][crate::ApiClient]
///
/// Callers should check [`is_cancelled()`][Self::is_cancelled()] before
/// showing anything to the user: a cancelled request was abandoned on
/// purpose and is not a failure.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller cancelled the request before it completed
    #[error("request was cancelled")]
    Cancelled,
    /// The server answered with a non-success status
    #[error("request failed with status {status}: {message}")]
    Status {
        /// The HTTP status returned
        status: StatusCode,
        /// The server's error message, or the status reason if it gave none
        message: String,
    },
    /// The server answered successfully but reported a business failure
    #[error("{message}")]
    Business {
        /// The message carried in the response payload
        message: String,
        /// The error code carried in the response payload, if any
        code: Option<String>,
    },
    /// The request could not be sent or no response was received
    #[error("error sending request")]
    Transport(#[from] reqwest_middleware::Error),
    /// The response body could not be read
    #[error("error reading response body")]
    Body(#[source] reqwest::Error),
    /// The response payload did not have the expected shape
    #[error("error decoding response payload")]
    Decode(#[source] serde_json::Error),
    /// The request parameters or body could not be serialized
    #[error("error serializing request")]
    Serialize(#[source] serde_json::Error),
    /// Query parameters must serialize to a map of names to values
    #[error("query parameters must serialize to a map")]
    InvalidParams,
    /// The request URL could not be built
    #[error("invalid request url")]
    Url(#[from] url::ParseError),
    /// The underlying HTTP client could not be constructed
    #[error("error building http client")]
    Build(#[source] reqwest::Error),
}

impl ApiError {
    /// Whether the request was cancelled by the caller rather than failing
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The HTTP status of a failed response, if the failure came from one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(reqwest_middleware::Error::Reqwest(error)) => error.status(),
            _ => None,
        }
    }

    /// Whether the server rejected the request's credentials
    ///
    /// This is the signal to send the user back to sign in; the client
    /// itself never does so.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
