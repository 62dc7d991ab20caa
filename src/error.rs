//! Error types for the relay and the stream consumer.

use serde_json::json;
use thiserror::Error;

/// Everything that can go wrong between accepting a relay request and
/// finishing its event stream.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad or missing request fields. User-correctable.
    #[error("{0}")]
    Validation(String),

    /// Upstream credentials or endpoint are not configured.
    #[error("{0}")]
    Configuration(String),

    /// The upstream endpoint could not be reached at all.
    #[error("upstream unreachable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream answered with a non-2xx status.
    #[error("upstream rejected request: {status} {status_text}")]
    UpstreamRejected {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The request body could not be decoded.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A read failed after the stream had started.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// HTTP status used when the error is reported before streaming begins.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::Configuration(_) => 500,
            RelayError::UpstreamUnavailable(_) => 502,
            RelayError::UpstreamRejected { status, .. } => *status,
            RelayError::MalformedRequest(_) => 500,
            RelayError::Transport(_) | RelayError::Io(_) => 500,
        }
    }

    /// The `{ "error": ... }` body sent to the client. Upstream bodies and
    /// configuration details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Validation(msg) | RelayError::Configuration(msg) => msg.clone(),
            RelayError::UpstreamUnavailable(_) => "Upstream API unreachable".to_string(),
            RelayError::UpstreamRejected { status_text, .. } => {
                format!("Upstream API error: {}", status_text)
            }
            RelayError::MalformedRequest(_) | RelayError::Transport(_) | RelayError::Io(_) => {
                "Failed to process request".to_string()
            }
        }
    }

    pub fn to_json_body(&self) -> String {
        json!({ "error": self.client_message() }).to_string()
    }
}

/// A `data: ` payload that does not have the expected shape. Never fatal:
/// the offending line is dropped and the stream continues.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failure observed by the client side of a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("relay responded {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("stream interrupted: {0}")]
    Interrupted(String),
}
