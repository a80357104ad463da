//! Read-only ledger access: mint metadata, balances, blockhashes and
//! signature confirmation.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_message::Hash;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use spl_token::solana_program::program_pack::Pack;
use spl_token_2022::extension::StateWithExtensions;
use std::collections::HashMap;

/// Associated Token Account program public key.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Errors from a ledger backend.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The RPC call failed.
    #[error("ledger rpc error: {0}")]
    Rpc(String),
    /// The account exists but is not what was expected.
    #[error("unexpected account {account}: {reason}")]
    UnexpectedAccount {
        /// Offending account.
        account: Pubkey,
        /// What was wrong with it.
        reason: String,
    },
    /// The backend does not provide this lookup.
    #[error("ledger lookup not supported: {0}")]
    Unsupported(&'static str),
}

/// Token mint metadata needed to build a checked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mint {
    /// Number of decimal places.
    pub decimals: u8,
    /// Owning token program (SPL Token or Token-2022).
    pub token_program: Pubkey,
}

impl Mint {
    /// Returns `true` if the mint is owned by Token-2022.
    #[must_use]
    pub fn is_token_2022(&self) -> bool {
        self.token_program == spl_token_2022::id()
    }
}

/// Confirmation state of a transaction signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not yet seen at the requested commitment.
    Pending,
    /// Landed successfully.
    Confirmed,
    /// Landed with an error.
    Failed(String),
}

/// Returns the associated token account of `owner` for `mint`.
#[must_use]
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    );
    ata
}

/// Read-only view of the chain.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetches mint metadata.
    async fn mint(&self, mint: &Pubkey) -> Result<Mint, LedgerError>;

    /// Token balance of `owner`'s associated account, in smallest units.
    ///
    /// A missing token account has balance zero.
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey)
    -> Result<u64, LedgerError>;

    /// Latest blockhash for transaction construction.
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Confirmation state of `signature`.
    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus, LedgerError>;

    /// Returns `true` once `signature` has landed successfully.
    async fn signature_confirmed(&self, signature: &Signature) -> Result<bool, LedgerError> {
        Ok(self.signature_status(signature).await? == SignatureStatus::Confirmed)
    }
}

/// [`Ledger`] over a Solana JSON-RPC node.
pub struct RpcLedger {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("url", &self.client.url())
            .field("commitment", &self.commitment)
            .finish()
    }
}

impl RpcLedger {
    /// Connects to `rpc_url` using `confirmed` commitment.
    #[must_use]
    pub fn new(rpc_url: String) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            commitment,
        }
    }
}

fn rpc_err(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Rpc(e.to_string())
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn mint(&self, mint: &Pubkey) -> Result<Mint, LedgerError> {
        let account = self.client.get_account(mint).await.map_err(rpc_err)?;
        let unexpected = |reason: String| LedgerError::UnexpectedAccount {
            account: *mint,
            reason,
        };
        if account.owner == spl_token::id() {
            let state = spl_token::state::Mint::unpack(&account.data)
                .map_err(|e| unexpected(e.to_string()))?;
            Ok(Mint {
                decimals: state.decimals,
                token_program: spl_token::id(),
            })
        } else if account.owner == spl_token_2022::id() {
            let state = StateWithExtensions::<spl_token_2022::state::Mint>::unpack(&account.data)
                .map_err(|e| unexpected(e.to_string()))?;
            Ok(Mint {
                decimals: state.base.decimals,
                token_program: spl_token_2022::id(),
            })
        } else {
            Err(unexpected(format!("owned by unknown program {}", account.owner)))
        }
    }

    async fn token_balance(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<u64, LedgerError> {
        let ata = associated_token_address(owner, mint, token_program);
        let Some(account) = self
            .client
            .get_account_with_commitment(&ata, self.commitment)
            .await
            .map_err(rpc_err)?
            .value
        else {
            return Ok(0);
        };
        let unexpected = |reason: String| LedgerError::UnexpectedAccount {
            account: ata,
            reason,
        };
        if account.owner == spl_token_2022::id() {
            StateWithExtensions::<spl_token_2022::state::Account>::unpack(&account.data)
                .map(|state| state.base.amount)
                .map_err(|e| unexpected(e.to_string()))
        } else {
            spl_token::state::Account::unpack(&account.data)
                .map(|state| state.amount)
                .map_err(|e| unexpected(e.to_string()))
        }
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.client.get_latest_blockhash().await.map_err(rpc_err)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus, LedgerError> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(rpc_err)?;
        Ok(match status {
            None => SignatureStatus::Pending,
            Some(Ok(())) => SignatureStatus::Confirmed,
            Some(Err(e)) => SignatureStatus::Failed(e.to_string()),
        })
    }
}

/// A ledger answering from fixed tables, for dry runs without an RPC node.
///
/// Unknown mints are errors, unknown balances are [`LedgerError::Unsupported`]
/// (so the balance pre-check is skipped), and every signature is reported
/// with the configured status.
#[derive(Debug, Clone)]
pub struct StaticLedger {
    mints: HashMap<Pubkey, Mint>,
    balances: HashMap<Pubkey, u64>,
    blockhash: Hash,
    signature_status: SignatureStatus,
}

impl Default for StaticLedger {
    fn default() -> Self {
        Self {
            mints: HashMap::new(),
            balances: HashMap::new(),
            blockhash: Hash::new_from_array([7; 32]),
            signature_status: SignatureStatus::Confirmed,
        }
    }
}

impl StaticLedger {
    /// Creates an empty static ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mint.
    #[must_use]
    pub fn with_mint(mut self, address: Pubkey, mint: Mint) -> Self {
        self.mints.insert(address, mint);
        self
    }

    /// Sets `owner`'s balance for every mint.
    #[must_use]
    pub fn with_balance(mut self, owner: Pubkey, amount: u64) -> Self {
        self.balances.insert(owner, amount);
        self
    }

    /// Sets the status reported for every signature.
    #[must_use]
    pub fn with_signature_status(mut self, status: SignatureStatus) -> Self {
        self.signature_status = status;
        self
    }
}

#[async_trait]
impl Ledger for StaticLedger {
    async fn mint(&self, mint: &Pubkey) -> Result<Mint, LedgerError> {
        self.mints
            .get(mint)
            .copied()
            .ok_or_else(|| LedgerError::UnexpectedAccount {
                account: *mint,
                reason: "mint not found".to_owned(),
            })
    }

    async fn token_balance(
        &self,
        owner: &Pubkey,
        _mint: &Pubkey,
        _token_program: &Pubkey,
    ) -> Result<u64, LedgerError> {
        self.balances
            .get(owner)
            .copied()
            .ok_or(LedgerError::Unsupported("balance not recorded"))
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Ok(self.blockhash)
    }

    async fn signature_status(&self, _signature: &Signature) -> Result<SignatureStatus, LedgerError> {
        Ok(self.signature_status.clone())
    }
}
