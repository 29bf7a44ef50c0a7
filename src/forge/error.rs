//! Forge Error Types

use crate::chain::{ErrorCause, RpcError};
use std::fmt;
use thiserror::Error;

/// External call of the submission pipeline that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStep {
    BuildUnsigned,
    AttachSignature,
    Stage,
}

impl SubmitStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitStep::BuildUnsigned => "build",
            SubmitStep::AttachSignature => "attach",
            SubmitStep::Stage => "stage",
        }
    }
}

impl fmt::Display for SubmitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForgeError {
    #[error("nonce fetch failed ({cause}): {message}")]
    NonceFetchFailed { cause: ErrorCause, message: String },

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("{step} failed ({cause}): {message}")]
    SubmissionFailed {
        cause: ErrorCause,
        step: SubmitStep,
        message: String,
    },
}

impl ForgeError {
    pub fn nonce(e: RpcError) -> Self {
        ForgeError::NonceFetchFailed {
            cause: e.cause(),
            message: e.message().to_string(),
        }
    }

    pub fn submission(step: SubmitStep, e: RpcError) -> Self {
        ForgeError::SubmissionFailed {
            cause: e.cause(),
            step,
            message: e.message().to_string(),
        }
    }

    pub fn cause(&self) -> ErrorCause {
        match self {
            ForgeError::NonceFetchFailed { cause, .. } | ForgeError::SubmissionFailed { cause, .. } => {
                *cause
            }
            ForgeError::SigningFailed(_) => ErrorCause::Unknown,
        }
    }

    /// Signing failures are deterministic; a second attempt fails the same way
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ForgeError::SigningFailed(_))
    }

    /// Failures tied to the sending account rather than the node it talked to
    pub fn is_account_fault(&self) -> bool {
        matches!(self, ForgeError::SigningFailed(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::NonceFetchFailed { .. } => "NONCE_FETCH_FAILED",
            ForgeError::SigningFailed(_) => "SIGNING_FAILED",
            ForgeError::SubmissionFailed { .. } => "SUBMISSION_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ForgeError::SigningFailed("x".into()).code(), "SIGNING_FAILED");
        assert_eq!(
            ForgeError::nonce(RpcError::transport("timed out")).code(),
            "NONCE_FETCH_FAILED"
        );
    }

    #[test]
    fn test_cause_carried_from_rpc_error() {
        let e = ForgeError::submission(SubmitStep::Stage, RpcError::transport("socket hang up"));
        assert_eq!(e.cause(), ErrorCause::SocketReset);
        assert_eq!(e.to_string(), "stage failed (socket-reset): socket hang up");
        assert!(e.is_retryable());
        assert!(!ForgeError::SigningFailed("bad key".into()).is_retryable());
    }
}
