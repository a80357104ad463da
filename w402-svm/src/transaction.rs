//! Versioned transaction wrapper used for payment payloads.

use solana_message::v0::Message as MessageV0;
use solana_message::{Hash, VersionedMessage};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use w402::encoding::{from_base64, to_base64};

use crate::custody::KeyCustody;
use crate::error::PaymentBuildError;

/// A v0 transaction with one signature slot per required signer.
#[derive(Debug, Clone)]
pub struct PaymentTransaction {
    inner: VersionedTransaction,
}

impl PaymentTransaction {
    /// Compiles `instructions` into an unsigned transaction paid by `fee_payer`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentBuildError::Compile`] if the message cannot be compiled.
    pub fn compile(
        fee_payer: &Pubkey,
        instructions: &[Instruction],
        recent_blockhash: Hash,
    ) -> Result<Self, PaymentBuildError> {
        let message = MessageV0::try_compile(fee_payer, instructions, &[], recent_blockhash)
            .map_err(|e| PaymentBuildError::Compile(e.to_string()))?;
        let num_required = message.header.num_required_signatures as usize;
        Ok(Self {
            inner: VersionedTransaction {
                signatures: vec![Signature::default(); num_required],
                message: VersionedMessage::V0(message),
            },
        })
    }

    /// Returns the inner transaction.
    #[must_use]
    pub const fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    /// The account in signature slot 0, which pays the network fee.
    #[must_use]
    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.inner.message.static_account_keys().first()
    }

    /// Accounts whose signatures the transaction requires, in slot order.
    #[must_use]
    pub fn required_signers(&self) -> &[Pubkey] {
        let keys = self.inner.message.static_account_keys();
        let num_required = self.inner.message.header().num_required_signatures as usize;
        &keys[..num_required.min(keys.len())]
    }

    /// Signature currently held in `signer`'s slot.
    #[must_use]
    pub fn signature_of(&self, signer: &Pubkey) -> Option<&Signature> {
        let pos = self.required_signers().iter().position(|k| k == signer)?;
        self.inner.signatures.get(pos)
    }

    /// Checks if every required signature slot is filled.
    #[must_use]
    pub fn is_fully_signed(&self) -> bool {
        let num_required = self.inner.message.header().num_required_signatures as usize;
        self.inner.signatures.len() >= num_required
            && self
                .inner
                .signatures
                .iter()
                .all(|signature| *signature != Signature::default())
    }

    /// Fills the custodied key's signature slot, leaving the others untouched.
    ///
    /// # Errors
    ///
    /// Fails if the custody refuses or its key is not a required signer.
    pub async fn sign_with<C: KeyCustody + ?Sized>(
        mut self,
        custody: &C,
    ) -> Result<Self, PaymentBuildError> {
        let signer = custody.pubkey();
        let pos = self
            .required_signers()
            .iter()
            .position(|k| *k == signer)
            .ok_or(PaymentBuildError::SignerNotRequired(signer))?;
        let message = self.inner.message.serialize();
        let signature = custody.sign_message(&message).await?;
        let num_required = self.inner.message.header().num_required_signatures as usize;
        if self.inner.signatures.len() < num_required {
            self.inner.signatures.resize(num_required, Signature::default());
        }
        self.inner.signatures[pos] = signature;
        Ok(self)
    }

    /// Encodes the transaction as base64 bincode.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentBuildError::Encoding`] if serialization fails.
    pub fn as_base64(&self) -> Result<String, PaymentBuildError> {
        let bytes =
            bincode::serialize(&self.inner).map_err(|e| PaymentBuildError::Encoding(e.to_string()))?;
        Ok(to_base64(bytes))
    }

    /// Decodes a base64 bincode transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentBuildError::Encoding`] on malformed input.
    pub fn from_base64(encoded: &str) -> Result<Self, PaymentBuildError> {
        let bytes = from_base64(encoded).map_err(|e| PaymentBuildError::Encoding(e.to_string()))?;
        let inner: VersionedTransaction =
            bincode::deserialize(&bytes).map_err(|e| PaymentBuildError::Encoding(e.to_string()))?;
        Ok(Self { inner })
    }
}
