//! Collaborators shared by every observation run.

use reqwest::Client;
use std::sync::Arc;
use w402::RequirementParser;
use w402::discovery::PriceNormalization;
use w402::observation::ObservationLog;
use w402::registry::{EndpointRegistry, RegistryError};
use w402_http::{EndpointDiscoverer, PaymentSubmitter, Prober};
use w402_svm::{Ledger, PaymentConstructor, RpcLedger};

use crate::config::{ConfigError, ObserverConfig, ObserverSettings};
use crate::custody;
use crate::quota::QuotaLimiter;
use crate::retry::RetryPolicy;
use crate::store::Store;

/// Errors assembling an [`ObserverContext`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The store could not be opened.
    #[error(transparent)]
    Store(#[from] RegistryError),
}

/// Everything a run needs, built once at startup.
pub struct ObserverContext {
    /// Agents and endpoints.
    pub registry: Arc<dyn EndpointRegistry>,
    /// Observation history.
    pub log: Arc<dyn ObservationLog>,
    /// Discovery client.
    pub discoverer: EndpointDiscoverer,
    /// Unpaid request client.
    pub prober: Prober,
    /// Paid request client.
    pub submitter: PaymentSubmitter,
    /// Offer selection.
    pub parser: RequirementParser,
    /// Payment construction; `None` when no key custody is configured.
    pub constructor: Option<PaymentConstructor>,
    /// Caller quota.
    pub quota: QuotaLimiter,
    /// Probe retry policy.
    pub retry: RetryPolicy,
    /// Delays and timeouts.
    pub settings: ObserverSettings,
}

impl std::fmt::Debug for ObserverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverContext")
            .field("constructor", &self.constructor)
            .field("quota", &self.quota)
            .field("retry", &self.retry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ObserverContext {
    /// Creates a context over `store` with default clients and settings and
    /// no payment capability.
    #[must_use]
    pub fn new(store: Store) -> Self {
        let client = Client::new();
        let settings = ObserverSettings::default();
        Self {
            registry: store.registry,
            log: store.log,
            discoverer: EndpointDiscoverer::new(client.clone())
                .with_timeout(settings.discovery_timeout()),
            prober: Prober::new(client.clone()).with_timeout(settings.probe_timeout()),
            submitter: PaymentSubmitter::new(client).with_timeout(settings.probe_timeout()),
            parser: RequirementParser::default(),
            constructor: None,
            quota: QuotaLimiter::default(),
            retry: RetryPolicy::default(),
            settings,
        }
    }

    /// Builds the full context from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if custody cannot be built or the store
    /// cannot be opened.
    pub async fn from_config(config: &ObserverConfig) -> Result<Self, ContextError> {
        let client = Client::new();
        let store = Store::open(&config.store).await?;
        let constructor = match &config.solana.custody {
            Some(custody_config) => {
                let custody = custody::from_config(&client, custody_config)?;
                let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(config.solana.rpc_url.clone()));
                tracing::info!(payer = %custody.pubkey(), rpc = %config.solana.rpc_url, "Payment enabled");
                Some(PaymentConstructor::new(custody, ledger, config.solana.compute_budget))
            }
            None => {
                tracing::warn!("No key custody configured, paid endpoints will fail construction");
                None
            }
        };

        Ok(Self::new(store)
            .with_constructor(constructor)
            .with_price_policy(config.pricing)
            .with_parser(RequirementParser::new(config.networks.clone()))
            .with_quota(QuotaLimiter::from_config(&config.quota))
            .with_retry(config.retry)
            .with_settings(config.observer.clone()))
    }

    /// Sets the payment constructor.
    #[must_use]
    pub fn with_constructor(mut self, constructor: Option<PaymentConstructor>) -> Self {
        self.constructor = constructor;
        self
    }

    /// Sets the discovery price policy.
    #[must_use]
    pub fn with_price_policy(mut self, policy: PriceNormalization) -> Self {
        self.discoverer = self.discoverer.with_policy(policy);
        self
    }

    /// Sets the offer parser.
    #[must_use]
    pub fn with_parser(mut self, parser: RequirementParser) -> Self {
        self.parser = parser;
        self
    }

    /// Sets the caller quota.
    #[must_use]
    pub fn with_quota(mut self, quota: QuotaLimiter) -> Self {
        self.quota = quota;
        self
    }

    /// Sets the probe retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets delays and timeouts, propagating timeouts to the HTTP clients.
    #[must_use]
    pub fn with_settings(mut self, settings: ObserverSettings) -> Self {
        self.discoverer = self.discoverer.with_timeout(settings.discovery_timeout());
        self.prober = self.prober.with_timeout(settings.probe_timeout());
        self.submitter = self.submitter.with_timeout(settings.probe_timeout());
        self.settings = settings;
        self
    }
}
