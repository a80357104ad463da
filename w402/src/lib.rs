#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for observing x402 pay-per-call endpoints.
//!
//! This crate holds the chain- and transport-agnostic half of the observer:
//! wire types for the 402 handshake, offer selection, discovery document
//! validation, the agent/endpoint registry and the observation log.
//!
//! # Modules
//!
//! - [`discovery`] - Discovery documents and price normalization
//! - [`encoding`] - Base64 and JSON header helpers
//! - [`error`] - Failure taxonomy and error classes
//! - [`networks`] - Network identifiers and selection precedence
//! - [`observation`] - Endpoint state machine and run history
//! - [`proto`] - Wire format types
//! - [`registry`] - Agents, endpoints and their persistence trait
//! - [`requirement`] - Payment requirement selection from 402 bodies
//! - [`timestamp`] - Unix timestamps
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod discovery;
pub mod encoding;
pub mod error;
pub mod networks;
pub mod observation;
pub mod proto;
pub mod registry;
pub mod requirement;
pub mod timestamp;

pub use error::{ErrorClass, ObserveError};
pub use requirement::{PaymentRequirement, RequirementParser};
