//! Key custody: the only component that ever touches the paying key.

use async_trait::async_trait;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;

/// Error returned by a custody backend.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// The backend refused or failed to sign.
    #[error("custody refused to sign: {0}")]
    Refused(String),
    /// The backend could not be reached or answered garbage.
    #[error("custody transport error: {0}")]
    Transport(String),
}

/// A holder of the paying agent's key that can sign arbitrary bytes.
#[async_trait]
pub trait KeyCustody: Send + Sync {
    /// Public key of the custodied signing key.
    fn pubkey(&self) -> Pubkey;

    /// Signs `message` with the custodied key.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CustodyError>;
}

/// Custody backed by an in-process [`Signer`], such as a `Keypair`.
pub struct LocalCustody<S> {
    signer: S,
}

impl<S> std::fmt::Debug for LocalCustody<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCustody").finish_non_exhaustive()
    }
}

impl<S> LocalCustody<S> {
    /// Wraps a signer.
    pub const fn new(signer: S) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl<S: Signer + Send + Sync> KeyCustody for LocalCustody<S> {
    fn pubkey(&self) -> Pubkey {
        self.signer.pubkey()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CustodyError> {
        self.signer
            .try_sign_message(message)
            .map_err(|e| CustodyError::Refused(e.to_string()))
    }
}
