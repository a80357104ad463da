//! HTTP transport for discovering, probing and paying x402 endpoints.
//!
//! # Modules
//!
//! - [`constants`] - Header names and default timeouts
//! - [`discovery`] - Well-known path discovery client
//! - [`error`] - Transport and header codec errors
//! - [`headers`] - `X-PAYMENT` / `X-PAYMENT-RESPONSE` encoding
//! - [`probe`] - Unpaid requests
//! - [`request`] - Replayable request descriptors
//! - [`submitter`] - Paid requests and settlement decoding

pub mod constants;
pub mod discovery;
pub mod error;
pub mod headers;
pub mod probe;
pub mod request;
pub mod submitter;

pub use discovery::EndpointDiscoverer;
pub use error::{DiscoveryError, HttpError, SubmitError, TransportError};
pub use probe::{ProbeResponse, Prober};
pub use request::RequestDescriptor;
pub use submitter::{PaidResponse, PaymentSubmitter, Settlement, UnconfirmedReason};
