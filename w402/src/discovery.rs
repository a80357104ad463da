//! Discovery document model and price normalization.
//!
//! Hosts publish their callable endpoints in heterogeneous JSON shapes. This
//! module validates those shapes into [`DiscoveredEndpoint`] values; fetching
//! the documents is the job of the HTTP layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{VecSkipError, serde_as};
use std::str::FromStr;
use url::Url;

/// Well-known discovery paths, in priority order, relative to a service base URL.
///
/// 1. metadata manifest at the root,
/// 2. reserved discovery path,
/// 3. conventional API listing.
pub const DISCOVERY_PATHS: [&str; 3] = ["x402.json", ".well-known/x402", "api/endpoints"];

/// Highest accepted price in quote-currency units.
pub const MAX_PRICE: Decimal = Decimal::ONE_HUNDRED;

/// An agent to discover: its address and the service it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryTarget {
    /// Agent (payee) address.
    pub agent_address: String,
    /// Service base URL.
    pub base_url: Url,
}

impl DiscoveryTarget {
    /// Returns the candidate discovery URLs in priority order.
    #[must_use]
    pub fn candidate_urls(&self) -> Vec<Url> {
        let base = directory_url(&self.base_url);
        DISCOVERY_PATHS
            .iter()
            .filter_map(|path| base.join(path).ok())
            .collect()
    }
}

/// Returns `url` with a trailing slash so relative joins stay below it.
#[must_use]
pub fn directory_url(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// A price as found in a discovery document: JSON number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    /// A JSON number.
    Number(serde_json::Number),
    /// A string, possibly holding a smallest-unit integer.
    Text(String),
}

impl PriceValue {
    /// Parses the raw value without any unit conversion.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        let text = match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().trim_start_matches('$').to_owned(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

/// How raw discovery prices map to quote-currency units.
///
/// The default heuristic reads any value above `threshold` as smallest units,
/// so a decimal price above the threshold is misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PriceNormalization {
    /// Values above `threshold` are smallest units with `decimals` places.
    Heuristic {
        /// Largest value still read as a decimal price.
        threshold: u64,
        /// Decimal places of the quote asset.
        decimals: u32,
    },
    /// Every value is already a decimal price.
    Decimal,
    /// Every value is in smallest units with `decimals` places.
    SmallestUnit {
        /// Decimal places of the quote asset.
        decimals: u32,
    },
}

impl Default for PriceNormalization {
    fn default() -> Self {
        Self::Heuristic {
            threshold: 1000,
            decimals: 6,
        }
    }
}

impl PriceNormalization {
    /// Converts a raw price into quote-currency units.
    #[must_use]
    pub fn normalize(&self, raw: Decimal) -> Option<Decimal> {
        match *self {
            Self::Heuristic {
                threshold,
                decimals,
            } => {
                if raw > Decimal::from(threshold) {
                    shift(raw, decimals)
                } else {
                    Some(raw)
                }
            }
            Self::Decimal => Some(raw),
            Self::SmallestUnit { decimals } => shift(raw, decimals),
        }
    }
}

fn shift(raw: Decimal, decimals: u32) -> Option<Decimal> {
    if decimals > Decimal::MAX_SCALE {
        return None;
    }
    raw.checked_mul(Decimal::new(1, decimals))
        .map(|d| d.normalize())
}

/// A discovery document: `{ "endpoints": [...] }`.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Listed endpoints; entries that are not objects are skipped.
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    pub endpoints: Vec<DiscoveryEntry>,
}

/// One raw entry of a discovery document, with every alias the wild uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    /// Endpoint URL, absolute or relative to the service.
    #[serde(default)]
    pub url: Option<String>,
    /// Alias of `url`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP method.
    #[serde(default)]
    pub method: Option<String>,
    /// Price.
    #[serde(default)]
    pub price: Option<PriceValue>,
    /// Alias of `price`.
    #[serde(default)]
    pub price_usdc: Option<PriceValue>,
    /// Alias of `price`.
    #[serde(default)]
    pub amount: Option<PriceValue>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Fallback for `description`.
    #[serde(default)]
    pub name: Option<String>,
    /// Category label.
    #[serde(default)]
    pub category: Option<String>,
    /// Fallback for `category`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A validated, priced endpoint found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEndpoint {
    /// Absolute endpoint URL.
    pub url: Url,
    /// Uppercased HTTP method.
    pub method: String,
    /// Price in quote-currency units, within `[0, 100]`.
    pub price: Decimal,
    /// Human-readable description.
    pub description: Option<String>,
    /// Category label.
    pub category: Option<String>,
}

/// Why a discovery entry was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryRejection {
    /// Neither `url` nor `endpoint` was usable.
    #[error("entry has no usable url")]
    MissingUrl,
    /// No price field was present or parseable.
    #[error("entry has no parseable price")]
    MissingPrice,
    /// The normalized price fell outside `[0, 100]`.
    #[error("price {0} outside [0, 100]")]
    PriceOutOfRange(Decimal),
}

impl DiscoveryEntry {
    /// Validates this entry against the service base URL.
    ///
    /// # Errors
    ///
    /// Returns the [`EntryRejection`] explaining why the entry is unusable.
    pub fn validate(
        &self,
        base_url: &Url,
        policy: &PriceNormalization,
    ) -> Result<DiscoveredEndpoint, EntryRejection> {
        let raw_url = self
            .url
            .as_deref()
            .or(self.endpoint.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(EntryRejection::MissingUrl)?;
        let url = Url::parse(raw_url)
            .or_else(|_| directory_url(base_url).join(raw_url.trim_start_matches('/')))
            .map_err(|_| EntryRejection::MissingUrl)?;

        let raw_price = [&self.price, &self.price_usdc, &self.amount]
            .into_iter()
            .flatten()
            .find_map(PriceValue::to_decimal)
            .ok_or(EntryRejection::MissingPrice)?;
        let price = policy
            .normalize(raw_price)
            .ok_or(EntryRejection::MissingPrice)?;
        if price < Decimal::ZERO || price > MAX_PRICE {
            return Err(EntryRejection::PriceOutOfRange(price));
        }

        let method = self
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();

        Ok(DiscoveredEndpoint {
            url,
            method,
            price,
            description: non_empty(self.description.as_ref().or(self.name.as_ref())),
            category: non_empty(self.category.as_ref().or(self.kind.as_ref())),
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

impl DiscoveryResponse {
    /// Validates every entry, keeping only usable endpoints.
    #[must_use]
    pub fn endpoints(&self, base_url: &Url, policy: &PriceNormalization) -> Vec<DiscoveredEndpoint> {
        self.endpoints
            .iter()
            .filter_map(|entry| match entry.validate(base_url, policy) {
                Ok(endpoint) => Some(endpoint),
                Err(_reason) => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(reason = %_reason, ?entry, "Dropping discovery entry");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn base() -> Url {
        "https://agent.example/service".parse().unwrap()
    }

    fn endpoints(doc: serde_json::Value) -> Vec<DiscoveredEndpoint> {
        let response: DiscoveryResponse = serde_json::from_value(doc).unwrap();
        response.endpoints(&base(), &PriceNormalization::default())
    }

    #[test]
    fn test_candidate_urls_in_priority_order() {
        let target = DiscoveryTarget {
            agent_address: "agent".into(),
            base_url: base(),
        };
        let urls: Vec<String> = target
            .candidate_urls()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://agent.example/service/x402.json",
                "https://agent.example/service/.well-known/x402",
                "https://agent.example/service/api/endpoints",
            ]
        );
    }

    #[test]
    fn test_price_normalization() {
        let found = endpoints(json!({ "endpoints": [
            { "url": "/a", "price": 0.01 },
            { "url": "/b", "priceUsdc": "10000" },
            { "url": "/c", "amount": "1000" },
            { "url": "/d", "price": "$2.5" },
        ]}));
        // "1000" is not above the threshold, so it stays 1000 and is dropped.
        let prices: Vec<Decimal> = found.iter().map(|e| e.price).collect();
        assert_eq!(prices, vec![d("0.01"), d("0.01"), d("2.5")]);
    }

    #[test]
    fn test_out_of_range_prices_dropped() {
        let found = endpoints(json!({ "endpoints": [
            { "url": "/ok", "price": 100 },
            { "url": "/free", "price": 0 },
            { "url": "/negative", "price": -1 },
            { "url": "/huge", "price": "500000000" },
            { "url": "/mid", "price": 150 },
        ]}));
        let paths: Vec<&str> = found.iter().map(|e| e.url.path()).collect();
        assert_eq!(paths, vec!["/service/ok", "/service/free"]);
    }

    #[test]
    fn test_aliases_and_defaults() {
        let found = endpoints(json!({ "endpoints": [
            {
                "endpoint": "https://other.example/run",
                "method": "post",
                "amount": 1,
                "name": "Runner",
                "type": "compute"
            },
            { "price": 1 },
            { "url": "/no-price" },
            "not an object",
        ]}));
        assert_eq!(found.len(), 1);
        let e = &found[0];
        assert_eq!(e.url.as_str(), "https://other.example/run");
        assert_eq!(e.method, "POST");
        assert_eq!(e.description.as_deref(), Some("Runner"));
        assert_eq!(e.category.as_deref(), Some("compute"));
    }

    #[test]
    fn test_decimal_policy_keeps_large_values() {
        let entry = DiscoveryEntry {
            url: Some("/x".into()),
            price: Some(PriceValue::Text("5000".into())),
            ..DiscoveryEntry::default()
        };
        let err = entry.validate(&base(), &PriceNormalization::Decimal).unwrap_err();
        assert_eq!(err, EntryRejection::PriceOutOfRange(d("5000")));
    }
}
