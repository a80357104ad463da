#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana payment construction for the w402 observer.
//!
//! Turns a [`w402::PaymentRequirement`] into a signed `X-PAYMENT` payload:
//! an SPL `TransferChecked` with a fixed compute budget, signed through a
//! [`KeyCustody`] backend and optionally left open for a fee payer.
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod constructor;
pub mod custody;
pub mod error;
pub mod ledger;
pub mod transaction;

pub use constructor::{ComputeBudget, ConstructedPayment, PaymentConstructor, SigningMode};
pub use custody::{CustodyError, KeyCustody, LocalCustody};
pub use error::PaymentBuildError;
pub use ledger::{Ledger, LedgerError, Mint, RpcLedger, SignatureStatus, StaticLedger};
pub use transaction::PaymentTransaction;
