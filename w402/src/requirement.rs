//! Selection of a single payment requirement from a 402 response body.

use serde::{Deserialize, Serialize};

use crate::error::ObserveError;
use crate::networks::{NetworkPreference, NetworkTier};
use crate::proto::{EXACT_SCHEME, PaymentRequired, PaymentRequirementOffer};

/// The normalized terms of one payment, extracted from a 402 response.
///
/// Lives only for the duration of one paid request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme; always [`EXACT_SCHEME`].
    pub scheme: String,
    /// Network identifier exactly as the server spelled it.
    pub network: String,
    /// Token mint address.
    pub asset: String,
    /// Payee address.
    pub pay_to: String,
    /// Amount in the asset's smallest unit.
    pub max_amount_required: u64,
    /// Third party covering network fees, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<String>,
}

impl From<&PaymentRequirementOffer> for PaymentRequirement {
    fn from(offer: &PaymentRequirementOffer) -> Self {
        Self {
            scheme: offer.scheme.clone(),
            network: offer.network.clone(),
            asset: offer.asset.clone(),
            pay_to: offer.pay_to.clone(),
            max_amount_required: offer.max_amount_required,
            fee_payer: offer.fee_payer().map(str::to_owned),
        }
    }
}

/// Parses 402 bodies and selects the offer to pay.
#[derive(Debug, Clone, Default)]
pub struct RequirementParser {
    preference: NetworkPreference,
}

impl RequirementParser {
    /// Creates a parser with the given network precedence.
    #[must_use]
    pub const fn new(preference: NetworkPreference) -> Self {
        Self { preference }
    }

    /// Returns the network precedence used for selection.
    #[must_use]
    pub const fn preference(&self) -> &NetworkPreference {
        &self.preference
    }

    /// Parses a raw 402 response body and selects one requirement.
    ///
    /// # Errors
    ///
    /// Returns [`ObserveError::NoCompatibleOffer`] if the body is not JSON, or
    /// if no offer qualifies.
    pub fn parse(&self, body: &[u8]) -> Result<PaymentRequirement, ObserveError> {
        let required: PaymentRequired = serde_json::from_slice(body)
            .map_err(|e| ObserveError::NoCompatibleOffer(format!("malformed 402 body: {e}")))?;
        self.select(&required)
    }

    /// Selects one requirement from a parsed 402 body.
    ///
    /// Precedence: production network, then test network, then the first
    /// offer whose network carries the expected prefix. Only `exact` offers
    /// are considered.
    ///
    /// # Errors
    ///
    /// Returns [`ObserveError::NoCompatibleOffer`] if no offer qualifies.
    pub fn select(&self, required: &PaymentRequired) -> Result<PaymentRequirement, ObserveError> {
        if required.accepts.is_empty() {
            return Err(ObserveError::NoCompatibleOffer(
                "402 body lists no offers".to_owned(),
            ));
        }
        let tiered: Vec<(NetworkTier, &PaymentRequirementOffer)> = required
            .accepts
            .iter()
            .filter(|offer| offer.scheme.eq_ignore_ascii_case(EXACT_SCHEME))
            .filter_map(|offer| Some((self.preference.tier(&offer.network)?, offer)))
            .collect();

        [NetworkTier::Production, NetworkTier::Test, NetworkTier::Prefix]
            .into_iter()
            .find_map(|wanted| {
                tiered
                    .iter()
                    .find(|(tier, _)| *tier == wanted)
                    .map(|(_, offer)| PaymentRequirement::from(*offer))
            })
            .map(|mut requirement| {
                requirement.scheme = EXACT_SCHEME.to_owned();
                requirement
            })
            .ok_or_else(|| {
                let networks: Vec<&str> = required
                    .accepts
                    .iter()
                    .map(|o| o.network.as_str())
                    .collect();
                ObserveError::NoCompatibleOffer(format!(
                    "no exact offer on an accepted network (offered: {})",
                    networks.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offer(network: &str, amount: &str) -> serde_json::Value {
        json!({
            "scheme": "exact",
            "network": network,
            "asset": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "payTo": "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM",
            "maxAmountRequired": amount,
        })
    }

    fn parse(body: serde_json::Value) -> Result<PaymentRequirement, ObserveError> {
        RequirementParser::default().parse(&serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_production_preferred_over_test() {
        let body = json!({ "accepts": [offer("solana-devnet", "1"), offer("solana", "2")] });
        let requirement = parse(body).unwrap();
        assert_eq!(requirement.network, "solana");
        assert_eq!(requirement.max_amount_required, 2);
    }

    #[test]
    fn test_test_network_preferred_over_prefix() {
        let body = json!({ "accepts": [offer("solana-localnet", "1"), offer("solana-devnet", "2")] });
        assert_eq!(parse(body).unwrap().network, "solana-devnet");
    }

    #[test]
    fn test_prefix_fallback() {
        let body = json!({ "accepts": [offer("base", "1"), offer("solana-localnet", "3")] });
        assert_eq!(parse(body).unwrap().network, "solana-localnet");
    }

    #[test]
    fn test_empty_accepts_is_no_compatible_offer() {
        let err = parse(json!({ "accepts": [] })).unwrap_err();
        assert!(matches!(err, ObserveError::NoCompatibleOffer(_)));
    }

    #[test]
    fn test_foreign_networks_only_is_no_compatible_offer() {
        let err = parse(json!({ "accepts": [offer("base", "1")] })).unwrap_err();
        assert!(matches!(err, ObserveError::NoCompatibleOffer(_)));
    }

    #[test]
    fn test_non_exact_scheme_is_skipped() {
        let mut upto = offer("solana", "5");
        upto["scheme"] = json!("upto");
        let body = json!({ "accepts": [upto, offer("solana-devnet", "7")] });
        assert_eq!(parse(body).unwrap().max_amount_required, 7);
    }

    #[test]
    fn test_fee_payer_extracted() {
        let mut o = offer("solana", "10000");
        o["extra"] = json!({ "feePayer": "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4" });
        let requirement = parse(json!({ "accepts": [o] })).unwrap();
        assert_eq!(
            requirement.fee_payer.as_deref(),
            Some("2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4")
        );
    }

    #[test]
    fn test_non_json_body() {
        let err = RequirementParser::default().parse(b"<html>").unwrap_err();
        assert!(matches!(err, ObserveError::NoCompatibleOffer(_)));
    }
}
