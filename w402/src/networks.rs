//! Network identifiers and offer selection preferences.
//!
//! Servers identify networks either by a V1 name (`"solana"`,
//! `"solana-devnet"`) or by a CAIP-2 chain id
//! (`"solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"`). A [`NetworkPreference`]
//! groups both spellings into production and test tiers.

use serde::{Deserialize, Serialize};

/// Solana mainnet genesis-hash reference.
pub const SOLANA_MAINNET_REFERENCE: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";

/// Solana devnet genesis-hash reference.
pub const SOLANA_DEVNET_REFERENCE: &str = "EtWTRABZaYq6iMfeYKouRu166VU2xqa1";

/// Which tier of network an offer was selected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTier {
    /// A production network.
    Production,
    /// A test network.
    Test,
    /// Any other network sharing the expected prefix.
    Prefix,
}

/// Network precedence used when picking one offer out of a 402 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPreference {
    /// Identifiers treated as production networks.
    #[serde(default = "default_production")]
    pub production: Vec<String>,
    /// Identifiers treated as test networks.
    #[serde(default = "default_test")]
    pub test: Vec<String>,
    /// Prefix accepted as a last resort.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_production() -> Vec<String> {
    vec![
        "solana".to_owned(),
        "solana-mainnet".to_owned(),
        format!("solana:{SOLANA_MAINNET_REFERENCE}"),
    ]
}

fn default_test() -> Vec<String> {
    vec![
        "solana-devnet".to_owned(),
        format!("solana:{SOLANA_DEVNET_REFERENCE}"),
    ]
}

fn default_prefix() -> String {
    "solana".to_owned()
}

impl Default for NetworkPreference {
    fn default() -> Self {
        Self {
            production: default_production(),
            test: default_test(),
            prefix: default_prefix(),
        }
    }
}

impl NetworkPreference {
    /// Classifies a network identifier, or returns `None` if it is not acceptable.
    #[must_use]
    pub fn tier(&self, network: &str) -> Option<NetworkTier> {
        let network = network.trim();
        if self.production.iter().any(|n| n.eq_ignore_ascii_case(network)) {
            Some(NetworkTier::Production)
        } else if self.test.iter().any(|n| n.eq_ignore_ascii_case(network)) {
            Some(NetworkTier::Test)
        } else if network.starts_with(&self.prefix) {
            Some(NetworkTier::Prefix)
        } else {
            None
        }
    }
}
