//! Builds and signs the exact-scheme SPL transfer for a payment requirement.

use serde::{Deserialize, Serialize};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use w402::PaymentRequirement;
use w402::proto::PaymentPayload;

#[cfg(feature = "telemetry")]
use tracing::{instrument, warn};

use crate::custody::KeyCustody;
use crate::error::PaymentBuildError;
use crate::ledger::{Ledger, Mint, associated_token_address};
use crate::transaction::PaymentTransaction;

/// Fixed compute budget attached to every payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeBudget {
    /// Compute unit limit.
    pub unit_limit: u32,
    /// Compute unit price in micro-lamports.
    pub unit_price_micro_lamports: u64,
}

impl Default for ComputeBudget {
    fn default() -> Self {
        Self {
            unit_limit: 20_000,
            unit_price_micro_lamports: 1,
        }
    }
}

/// Who still has to sign after the paying agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    /// Slot 0 is reserved for this fee payer, who co-signs on settlement.
    Partial {
        /// The third-party fee payer.
        fee_payer: Pubkey,
    },
    /// The paying agent signed every required slot.
    Full,
}

/// A signed payment ready to be attached to a request.
#[derive(Debug, Clone)]
pub struct ConstructedPayment {
    /// The `X-PAYMENT` payload.
    pub payload: PaymentPayload,
    /// The underlying transaction.
    pub transaction: PaymentTransaction,
    /// Signing mode that was applied.
    pub signing: SigningMode,
}

/// Produces signed payment payloads from payment requirements.
///
/// One constructor is bound to one custodied key.
#[derive(Clone)]
pub struct PaymentConstructor {
    custody: Arc<dyn KeyCustody>,
    ledger: Arc<dyn Ledger>,
    budget: ComputeBudget,
}

impl std::fmt::Debug for PaymentConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConstructor")
            .field("payer", &self.custody.pubkey())
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Pubkey, PaymentBuildError> {
    Pubkey::from_str(value).map_err(|_| PaymentBuildError::InvalidAddress {
        field,
        value: value.to_owned(),
    })
}

impl PaymentConstructor {
    /// Creates a constructor.
    #[must_use]
    pub fn new(custody: Arc<dyn KeyCustody>, ledger: Arc<dyn Ledger>, budget: ComputeBudget) -> Self {
        Self {
            custody,
            ledger,
            budget,
        }
    }

    /// Public key of the paying agent.
    #[must_use]
    pub fn payer(&self) -> Pubkey {
        self.custody.pubkey()
    }

    /// The ledger this constructor reads from.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Builds and signs a transfer satisfying `requirement`.
    ///
    /// The transaction carries a compute unit limit, a compute unit price and
    /// one `TransferChecked` from the payer's associated token account to the
    /// payee's. When the requirement names a fee payer other than the paying
    /// agent, that account occupies signature slot 0 and its signature is left
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentBuildError::InsufficientFunds`] when the ledger reports
    /// a balance below the required amount, and other variants for malformed
    /// requirements, ledger failures and custody failures. If the balance
    /// cannot be read the check is skipped.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "w402.payment.construct", skip_all, err, fields(
            network = %requirement.network,
            amount = requirement.max_amount_required,
        ))
    )]
    pub async fn construct(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<ConstructedPayment, PaymentBuildError> {
        let asset = parse_address("asset", &requirement.asset)?;
        let pay_to = parse_address("payTo", &requirement.pay_to)?;
        let fee_payer = requirement
            .fee_payer
            .as_deref()
            .map(|value| parse_address("feePayer", value))
            .transpose()?;
        let payer = self.custody.pubkey();
        let amount = requirement.max_amount_required;

        let mint = self.ledger.mint(&asset).await?;
        match self
            .ledger
            .token_balance(&payer, &asset, &mint.token_program)
            .await
        {
            Ok(available) if available < amount => {
                return Err(PaymentBuildError::InsufficientFunds {
                    required: amount,
                    available,
                });
            }
            Ok(_) => {}
            Err(_e) => {
                #[cfg(feature = "telemetry")]
                warn!(error = %_e, "balance unavailable, skipping pre-check");
            }
        }

        let source = associated_token_address(&payer, &asset, &mint.token_program);
        let destination = associated_token_address(&pay_to, &asset, &mint.token_program);
        let transfer = transfer_checked(&mint, &source, &asset, &destination, &payer, amount)?;
        let instructions = [
            ComputeBudgetInstruction::set_compute_unit_limit(self.budget.unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.budget.unit_price_micro_lamports),
            transfer,
        ];

        let signing = match fee_payer {
            Some(fee_payer) if fee_payer != payer => SigningMode::Partial { fee_payer },
            _ => SigningMode::Full,
        };
        let slot_zero = match signing {
            SigningMode::Partial { fee_payer } => fee_payer,
            SigningMode::Full => payer,
        };

        let recent_blockhash = self.ledger.latest_blockhash().await?;
        let transaction = PaymentTransaction::compile(&slot_zero, &instructions, recent_blockhash)?
            .sign_with(self.custody.as_ref())
            .await?;
        let payload = PaymentPayload::exact(requirement.network.clone(), transaction.as_base64()?);

        Ok(ConstructedPayment {
            payload,
            transaction,
            signing,
        })
    }
}

fn transfer_checked(
    mint: &Mint,
    source: &Pubkey,
    asset: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
) -> Result<solana_transaction::Instruction, PaymentBuildError> {
    let instruction = if mint.is_token_2022() {
        spl_token_2022::instruction::transfer_checked(
            &mint.token_program,
            source,
            asset,
            destination,
            authority,
            &[],
            amount,
            mint.decimals,
        )
    } else {
        spl_token::instruction::transfer_checked(
            &mint.token_program,
            source,
            asset,
            destination,
            authority,
            &[],
            amount,
            mint.decimals,
        )
    };
    instruction.map_err(|e| PaymentBuildError::Instruction(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::LocalCustody;
    use crate::ledger::StaticLedger;
    use solana_keypair::Keypair;
    use solana_signature::Signature;
    use solana_signer::Signer;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const PAY_TO: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const FEE_PAYER: &str = "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4";

    fn requirement(amount: u64, fee_payer: Option<&str>) -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".to_owned(),
            network: "solana".to_owned(),
            asset: USDC.to_owned(),
            pay_to: PAY_TO.to_owned(),
            max_amount_required: amount,
            fee_payer: fee_payer.map(str::to_owned),
        }
    }

    fn constructor(keypair: Keypair, ledger: StaticLedger) -> PaymentConstructor {
        PaymentConstructor::new(
            Arc::new(LocalCustody::new(keypair)),
            Arc::new(ledger),
            ComputeBudget::default(),
        )
    }

    fn ledger_with_usdc() -> StaticLedger {
        StaticLedger::new().with_mint(
            Pubkey::from_str(USDC).unwrap(),
            Mint {
                decimals: 6,
                token_program: spl_token::id(),
            },
        )
    }

    #[tokio::test]
    async fn test_fee_payer_occupies_slot_zero_unsigned() {
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let built = constructor(keypair, ledger_with_usdc().with_balance(payer, 50_000))
            .construct(&requirement(10_000, Some(FEE_PAYER)))
            .await
            .unwrap();

        let fee_payer = Pubkey::from_str(FEE_PAYER).unwrap();
        let tx = &built.transaction;
        assert_eq!(built.signing, SigningMode::Partial { fee_payer });
        assert_eq!(tx.required_signers(), &[fee_payer, payer]);
        assert_eq!(tx.fee_payer(), Some(&fee_payer));
        assert_eq!(tx.signature_of(&fee_payer), Some(&Signature::default()));
        assert_ne!(tx.signature_of(&payer), Some(&Signature::default()));
        assert!(!tx.is_fully_signed());
        assert_eq!(tx.inner().message.instructions().len(), 3);
    }

    #[tokio::test]
    async fn test_without_fee_payer_agent_signs_fully() {
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let built = constructor(keypair, ledger_with_usdc())
            .construct(&requirement(10_000, None))
            .await
            .unwrap();

        assert_eq!(built.signing, SigningMode::Full);
        assert_eq!(built.transaction.fee_payer(), Some(&payer));
        assert!(built.transaction.is_fully_signed());
    }

    #[tokio::test]
    async fn test_payload_round_trips_through_base64() {
        let built = constructor(Keypair::new(), ledger_with_usdc())
            .construct(&requirement(1, Some(FEE_PAYER)))
            .await
            .unwrap();

        assert_eq!(built.payload.network, "solana");
        assert_eq!(built.payload.scheme, "exact");
        let decoded = PaymentTransaction::from_base64(&built.payload.payload.transaction).unwrap();
        assert_eq!(decoded.inner().signatures, built.transaction.inner().signatures);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_rejected_before_signing() {
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let err = constructor(keypair, ledger_with_usdc().with_balance(payer, 9_999))
            .construct(&requirement(10_000, None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentBuildError::InsufficientFunds {
                required: 10_000,
                available: 9_999
            }
        ));
        assert_eq!(
            w402::ObserveError::from(err).class(),
            w402::ErrorClass::InsufficientFunds
        );
    }

    #[tokio::test]
    async fn test_malformed_pay_to_is_a_construction_error() {
        let mut req = requirement(1, None);
        req.pay_to = "not-a-key".to_owned();
        let err = constructor(Keypair::new(), ledger_with_usdc())
            .construct(&req)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentBuildError::InvalidAddress { field: "payTo", .. }));
        assert_eq!(
            w402::ObserveError::from(err).class(),
            w402::ErrorClass::ConstructionError
        );
    }

    #[tokio::test]
    async fn test_unknown_mint_fails() {
        let err = constructor(Keypair::new(), StaticLedger::new())
            .construct(&requirement(1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentBuildError::Ledger(_)));
    }
}
