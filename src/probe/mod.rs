//! Probe Module
//!
//! Lifecycle of probe transactions: records, persistence, dispatch and
//! reconciliation.
//!
//! ## Components
//! - `state`: [`ProbeState`] FSM
//! - `record`: [`ProbeRecord`] and CAS updates
//! - `store` / `db`: [`ProbeStore`] with memory and PostgreSQL backends
//! - `retry`: [`RetryPolicy`] combinator
//! - `dispatcher`: one endpoint, one cycle: TEMP -> PENDING | SEND_FAILED
//! - `reconciler`: PENDING -> COMPLETED | DELAYED | FAILED

pub mod db;
pub mod dispatcher;
pub mod reconciler;
pub mod record;
pub mod retry;
pub mod state;
pub mod store;

pub use db::PgProbeStore;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use reconciler::{ReconcileReport, ReconcileSettings, ReconciliationEngine, Verdict, judge};
pub use record::{NewProbe, ProbeRecord, ProbeUpdate, cycle_minute};
pub use retry::{Exhausted, RetryPolicy, Retryable};
pub use state::ProbeState;
pub use store::{MemoryProbeStore, ProbeStore, StoreError};
