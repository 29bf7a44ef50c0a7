//! node_pulse - Blockchain Node Health Probe
//!
//! Sends a tiny token transfer through every public RPC endpoint of two
//! networks once a minute, then polls an independent checking node until
//! each transfer is judged on time, delayed or failed.
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers and the 20-byte [`Address`]
//! - [`money`] - Fixed 2-decimal token amounts
//! - [`network`] - Network groups and their per-network profile
//! - [`chain`] - Chain RPC and endpoint directory seams with their adapters
//! - [`forge`] - Transfer encoding, signing and submission
//! - [`account`] - Account pool actor and balance refresher
//! - [`probe`] - Probe records, store, dispatcher and reconciler
//! - [`sweep`] - One dispatch cycle over every endpoint
//! - [`scheduler`] - Interval loops and the single-shot run
//! - [`app`] - Wiring from configuration
//! - [`config`] / [`logging`] - YAML configuration and tracing setup

// Core types - must be first!
pub mod core_types;

pub mod money;
pub mod network;

pub mod account;
pub mod chain;
pub mod error;
pub mod forge;
pub mod probe;
pub mod sweep;

pub mod app;
pub mod config;
pub mod logging;
pub mod scheduler;

#[cfg(test)]
mod test_support;

// Convenient re-exports at crate root
pub use app::{Adapters, AppError, ProbeApp, Schedule};
pub use config::AppConfig;
pub use core_types::{AccountId, Address, CycleNum, ProbeId};
pub use error::{EngineError, ProbeFailure};
pub use money::Money;
pub use network::{NetworkGroup, NetworkProfile, Networks};
pub use probe::{ProbeRecord, ProbeState};
pub use sweep::{SweepContext, SweepReport, Sweeper};
