//! Payment construction errors.

use solana_pubkey::Pubkey;
use w402::ObserveError;

use crate::custody::CustodyError;
use crate::ledger::LedgerError;

/// Reasons a payment transaction could not be built.
#[derive(Debug, thiserror::Error)]
pub enum PaymentBuildError {
    /// A requirement field is not a valid base58 public key.
    #[error("invalid {field} address: {value}")]
    InvalidAddress {
        /// Requirement field name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
    /// The paying agent holds less than the required amount.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Required amount in smallest units.
        required: u64,
        /// Available balance in smallest units.
        available: u64,
    },
    /// A ledger lookup failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The custody backend failed to sign.
    #[error(transparent)]
    Custody(#[from] CustodyError),
    /// The transfer instruction could not be built.
    #[error("failed to build instruction: {0}")]
    Instruction(String),
    /// The message could not be compiled.
    #[error("failed to compile message: {0}")]
    Compile(String),
    /// The custodied key is not among the transaction's required signers.
    #[error("{0} is not a required signer")]
    SignerNotRequired(Pubkey),
    /// The transaction could not be (de)serialized.
    #[error("transaction encoding error: {0}")]
    Encoding(String),
}

impl From<PaymentBuildError> for ObserveError {
    fn from(err: PaymentBuildError) -> Self {
        match err {
            PaymentBuildError::InsufficientFunds {
                required,
                available,
            } => Self::InsufficientFunds {
                required,
                available,
            },
            other => Self::ConstructionError(other.to_string()),
        }
    }
}
