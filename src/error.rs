//! Engine-level errors and the probe failure taxonomy.
//!
//! Network failures never escape the dispatcher or the reconciler as
//! errors; they become a record state plus the [`ProbeFailure`] text stored
//! as the record's diagnostic. Only store and pool failures abort an
//! invocation, via [`EngineError`].

use crate::account::PoolError;
use crate::chain::ErrorCause;
use crate::forge::ForgeError;
use crate::probe::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Store(e) => e.code(),
            EngineError::Pool(_) => "POOL_CLOSED",
        }
    }
}

/// Why a probe did not complete on time. `Display` is the stored diagnostic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("no available accounts")]
    CapacityExhausted,

    #[error("failed send request ({cause}) after {attempts} attempt(s): {last}", cause = .last.cause())]
    SendExhausted { attempts: u32, last: ForgeError },

    #[error("failed state check request ({cause}): {message}")]
    QueryFailed { cause: ErrorCause, message: String },

    #[error("chain rejected transaction ({status}): {}", describe_exceptions(.exceptions))]
    ChainRejected {
        status: String,
        exceptions: Vec<String>,
    },

    #[error("staging timeout: still {status} after {elapsed_secs}s")]
    StagingTimeout { status: String, elapsed_secs: i64 },

    #[error("unexpected status {0}")]
    UnexpectedStatus(String),

    #[error("pending record has no transaction hash")]
    MissingTxHash,

    /// Dispatch stopped before the record left TEMP
    #[error("dispatch interrupted: no outcome recorded after {age_secs}s")]
    Interrupted { age_secs: i64 },
}

fn describe_exceptions(exceptions: &[String]) -> String {
    if exceptions.is_empty() {
        "no exception reported".to_string()
    } else {
        exceptions.join(", ")
    }
}

impl ProbeFailure {
    pub fn code(&self) -> &'static str {
        match self {
            ProbeFailure::CapacityExhausted => "CAPACITY_EXHAUSTED",
            ProbeFailure::SendExhausted { last, .. } => last.code(),
            ProbeFailure::QueryFailed { .. } => "QUERY_FAILED",
            ProbeFailure::ChainRejected { .. } => "CHAIN_REJECTED",
            ProbeFailure::StagingTimeout { .. } => "STAGING_TIMEOUT",
            ProbeFailure::UnexpectedStatus(_) => "UNEXPECTED_STATUS",
            ProbeFailure::MissingTxHash => "MISSING_TX_HASH",
            ProbeFailure::Interrupted { .. } => "DISPATCH_INTERRUPTED",
        }
    }

    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}
