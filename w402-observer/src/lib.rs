//! Continuous observation of x402 pay-per-call endpoints.
//!
//! Wires the discovery, payment and transport crates into an
//! [`ObservationScheduler`] that re-tests every registered endpoint,
//! records one [`w402::observation::ObservationRun`] per endpoint per run
//! and backfills newly discovered agents.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`context`] - Collaborators shared by every run
//! - [`custody`] - Remote key custody client
//! - [`quota`] - Per-caller sliding-window quota
//! - [`report`] - Run and backfill reports
//! - [`retry`] - Retry policy for unpaid probes
//! - [`scheduler`] - The observation scheduler
//! - [`shutdown`] - Signal handling for the daemon loop
//! - [`store`] - In-memory and file-backed persistence

pub mod config;
pub mod context;
pub mod custody;
pub mod quota;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use context::ObserverContext;
pub use scheduler::{ObservationScheduler, SchedulerError};
