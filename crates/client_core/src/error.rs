use reqwest::StatusCode;
use shared::error::ApiErrorBody;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of a single call against the application API or the object store.
///
/// Stores only ever read [`ClientError::message_or`]; the variants exist for
/// logging and for callers that want the status code.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request rejected with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: u16,
        message: Option<String>,
    },
    #[error("server error {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Server {
        status: u16,
        message: Option<String>,
    },
    #[error("invalid response payload: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn from_status(status: StatusCode, message: Option<String>) -> Self {
        if status.is_server_error() {
            Self::Server {
                status: status.as_u16(),
                message,
            }
        } else {
            Self::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// Builds the error for a non-success response from its raw body.
    pub fn from_response_body(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<ApiErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message_text());
        Self::from_status(status, message)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            Self::Rejected { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Decode(_) | Self::InvalidUrl(_) => None,
        }
    }

    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } | Self::Server { message, .. } => message.as_deref(),
            Self::Transport(_) | Self::Decode(_) | Self::InvalidUrl(_) => None,
        }
    }

    /// Human-readable text for UI state: the server's message, else `fallback`.
    pub fn message_or(&self, fallback: &str) -> String {
        self.server_message()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }
}
