use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Classified cause of a failed network call.
///
/// Dispatch and reconciliation only ever distinguish these three; the raw
/// message is kept alongside for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCause {
    SocketReset,
    Timeout,
    Unknown,
}

const SOCKET_RESET_MARKERS: [&str; 5] = [
    "socket hang up",
    "connection reset",
    "econnreset",
    "connection closed before message completed",
    "broken pipe",
];

const TIMEOUT_MARKERS: [&str; 3] = ["timeout", "timed out", "deadline has elapsed"];

impl ErrorCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCause::SocketReset => "socket-reset",
            ErrorCause::Timeout => "timeout",
            ErrorCause::Unknown => "unknown",
        }
    }

    /// Classify from error text (transport message or response body)
    pub fn classify(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if SOCKET_RESET_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorCause::SocketReset
        } else if TIMEOUT_MARKERS.iter().any(|m| lower.contains(m)) {
            ErrorCause::Timeout
        } else {
            ErrorCause::Unknown
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone)]
pub enum RpcError {
    #[error("transport failure ({cause}): {message}")]
    Transport { cause: ErrorCause, message: String },

    #[error("GraphQL error: {0}")]
    Graphql(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        RpcError::Transport {
            cause: ErrorCause::classify(&message),
            message,
        }
    }

    pub fn cause(&self) -> ErrorCause {
        match self {
            RpcError::Transport { cause, .. } => *cause,
            RpcError::Graphql(message) => ErrorCause::classify(message),
            RpcError::Decode(_) => ErrorCause::Unknown,
        }
    }

    /// Underlying message without the classification prefix
    pub fn message(&self) -> &str {
        match self {
            RpcError::Transport { message, .. } => message,
            RpcError::Graphql(message) | RpcError::Decode(message) => message,
        }
    }
}

/// Flatten an error and its sources into one line
fn error_chain(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        let message = error_chain(&e);
        let cause = if e.is_timeout() {
            ErrorCause::Timeout
        } else {
            ErrorCause::classify(&message)
        };
        RpcError::Transport { cause, message }
    }
}
