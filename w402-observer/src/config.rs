//! Observer configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! [observer]
//! interval_secs = 900
//! inter_probe_delay_ms = 2000
//!
//! [quota]
//! max_requests = 10
//! window_secs = 3600
//! allow_list = ["$ADMIN_WALLET"]
//!
//! [solana]
//! rpc_url = "https://api.mainnet-beta.solana.com"
//!
//! [solana.custody]
//! kind = "local"
//! secret_key = "${PAYER_SECRET_KEY}"
//!
//! [[agents]]
//! address = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"
//! base_url = "https://agent.example"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `w402.toml`)
//! - Secrets referenced by `$VAR` in the config file

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use w402::discovery::PriceNormalization;
use w402::networks::NetworkPreference;
use w402_svm::ComputeBudget;

use crate::retry::RetryPolicy;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "w402.toml";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value parsed but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level observer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Scheduling and timeouts.
    pub observer: ObserverSettings,
    /// Caller quota.
    pub quota: QuotaConfig,
    /// Retry policy for unpaid probes.
    pub retry: RetryPolicy,
    /// Accepted payment networks.
    pub networks: NetworkPreference,
    /// Discovery price normalization.
    pub pricing: PriceNormalization,
    /// Solana access and key custody.
    pub solana: SolanaConfig,
    /// Persistence.
    pub store: StoreConfig,
    /// Agents seeded into the registry at startup.
    pub agents: Vec<AgentSeed>,
}

/// Scheduling and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSettings {
    /// Seconds between scheduled runs.
    pub interval_secs: u64,
    /// Timeout of each unpaid probe and paid request, in seconds.
    pub probe_timeout_secs: u64,
    /// Timeout of each discovery candidate, in seconds.
    pub discovery_timeout_secs: u64,
    /// Delay between consecutive endpoints, in milliseconds.
    pub inter_probe_delay_ms: u64,
    /// Upper bound on on-chain settlement confirmation, in seconds.
    pub settlement_timeout_secs: u64,
    /// Whether to confirm settlement transactions on-chain.
    pub verify_settlement: bool,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            probe_timeout_secs: 30,
            discovery_timeout_secs: 5,
            inter_probe_delay_ms: 2000,
            settlement_timeout_secs: 30,
            verify_settlement: false,
        }
    }
}

impl ObserverSettings {
    /// Time between scheduled runs.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Per-candidate discovery timeout.
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Delay between consecutive endpoints.
    #[must_use]
    pub const fn inter_probe_delay(&self) -> Duration {
        Duration::from_millis(self.inter_probe_delay_ms)
    }

    /// Settlement confirmation bound.
    #[must_use]
    pub const fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }
}

/// Caller quota settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests allowed per window.
    pub max_requests: usize,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Caller identities exempt from the quota.
    pub allow_list: Vec<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 3600,
            allow_list: Vec::new(),
        }
    }
}

/// Solana settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// Compute budget attached to payment transactions.
    pub compute_budget: ComputeBudget,
    /// Where the paying key lives. Without it, 402 endpoints fail construction.
    pub custody: Option<CustodyConfig>,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_owned(),
            compute_budget: ComputeBudget::default(),
            custody: None,
        }
    }
}

/// Key custody backend.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustodyConfig {
    /// An in-process keypair: base58 secret key or a JSON byte array.
    Local {
        /// The secret key material.
        secret_key: String,
    },
    /// A remote custody service exposing `POST /sign`.
    Remote {
        /// Service base URL.
        url: Url,
        /// Base58 public key of the custodied key.
        pubkey: String,
        /// Optional bearer token.
        #[serde(default)]
        token: Option<String>,
    },
}

impl std::fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { .. } => f.debug_struct("Local").finish_non_exhaustive(),
            Self::Remote { url, pubkey, token } => f
                .debug_struct("Remote")
                .field("url", url)
                .field("pubkey", pubkey)
                .field("has_token", &token.is_some())
                .finish(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file store. In-memory only when unset.
    pub data_dir: Option<PathBuf>,
}

/// An agent known up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSeed {
    /// Agent address.
    pub address: String,
    /// Service base URL.
    pub base_url: Url,
    /// Chain or environment tag.
    #[serde(default)]
    pub environment: Option<String>,
}

impl ObserverConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `w402.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(Path::new(&path))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };
        Self::parse(&content)
    }

    /// Parses configuration TOML after environment variable expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed TOML or unusable values.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quota.max_requests == 0 {
            return Err(ConfigError::Invalid("quota.max_requests must be positive".to_owned()));
        }
        if self.quota.window_secs == 0 {
            return Err(ConfigError::Invalid("quota.window_secs must be positive".to_owned()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be positive".to_owned()));
        }
        Ok(())
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match lookup(&name).filter(|_| !name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "KEY" => Some("secret".to_owned()),
            "HOST" => Some("agent.example".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_expands_both_forms_and_keeps_unknown() {
        assert_eq!(expand_with("a=$KEY", lookup), "a=secret");
        assert_eq!(expand_with("https://${HOST}/x", lookup), "https://agent.example/x");
        assert_eq!(expand_with("$MISSING and ${MISSING}", lookup), "$MISSING and ${MISSING}");
        assert_eq!(expand_with("cost: $ 5", lookup), "cost: $ 5");
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config = ObserverConfig::parse("").unwrap();
        assert_eq!(config.observer, ObserverSettings::default());
        assert_eq!(config.quota.max_requests, 10);
        assert_eq!(config.quota.window_secs, 3600);
        assert_eq!(config.observer.inter_probe_delay(), Duration::from_secs(2));
        assert_eq!(config.pricing, PriceNormalization::default());
        assert!(config.solana.custody.is_none());
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_parses_full_document() {
        let config = ObserverConfig::parse(
            r#"
            [observer]
            interval_secs = 60
            verify_settlement = true

            [quota]
            max_requests = 3
            allow_list = ["admin-wallet", "10.0.0.1"]

            [retry]
            max_attempts = 4
            base_delay_ms = 100
            strategy = "exponential"

            [pricing]
            policy = "smallest_unit"
            decimals = 6

            [solana.compute_budget]
            unit_limit = 40000

            [solana.custody]
            kind = "remote"
            url = "https://custody.example"
            pubkey = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"

            [store]
            data_dir = "/var/lib/w402"

            [[agents]]
            address = "agent-1"
            base_url = "https://agent.example/api"
            "#,
        )
        .unwrap();

        assert_eq!(config.observer.interval(), Duration::from_secs(60));
        assert!(config.observer.verify_settlement);
        assert_eq!(config.quota.allow_list.len(), 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.pricing, PriceNormalization::SmallestUnit { decimals: 6 });
        assert_eq!(config.solana.compute_budget.unit_limit, 40_000);
        assert_eq!(config.solana.compute_budget.unit_price_micro_lamports, 1);
        assert!(matches!(config.solana.custody, Some(CustodyConfig::Remote { token: None, .. })));
        assert_eq!(config.store.data_dir, Some(PathBuf::from("/var/lib/w402")));
        assert_eq!(config.agents[0].base_url.as_str(), "https://agent.example/api");
    }

    #[test]
    fn test_rejects_zero_quota() {
        let err = ObserverConfig::parse("[quota]\nmax_requests = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
