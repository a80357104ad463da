//! The observation scheduler.
//!
//! A run walks every registered endpoint in order: an unpaid probe, then for
//! 402 answers the parse → construct → submit pipeline, then exactly one
//! [`ObservationRun`] appended to the log. Only one run (scheduled,
//! on-demand or backfill) holds the run cursor at a time.

use futures_util::stream::{self, Stream};
use solana_signature::Signature;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use w402::discovery::DiscoveryTarget;
use w402::error::{ErrorClass, ObserveError};
use w402::observation::{EndpointState, ObservationRun};
use w402::registry::{
    DiscoveredAgent, DiscoveryMetadata, EndpointKey, ImportSummary, ObservedEndpoint,
    Registration, RegistryError, summarize,
};
use w402::timestamp::UnixTimestamp;
use w402_http::{RequestDescriptor, Settlement, SubmitError, TransportError, UnconfirmedReason};
use w402_svm::{Ledger, SignatureStatus};

use crate::config::AgentSeed;
use crate::context::ObserverContext;
use crate::quota::{CallerIdentity, QuotaExceeded};
use crate::report::{BackfillItem, BackfillSummary, RunReport};

const SETTLEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Caller-facing rejections.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Another run holds the cursor.
    #[error("an observation run is already in progress")]
    RunInProgress,
    /// The caller used up their quota.
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    /// The registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Latest state per endpoint, guarded by the single-run lock.
#[derive(Debug, Default)]
pub struct RunCursor {
    states: HashMap<EndpointKey, EndpointState>,
    last_run: Option<UnixTimestamp>,
}

impl RunCursor {
    /// Current state of `key`; endpoints never probed are `Untested`.
    #[must_use]
    pub fn state(&self, key: &EndpointKey) -> EndpointState {
        self.states.get(key).copied().unwrap_or(EndpointState::Untested)
    }

    /// When the last run finished.
    #[must_use]
    pub const fn last_run(&self) -> Option<UnixTimestamp> {
        self.last_run
    }

    fn transition(&mut self, key: &EndpointKey, to: EndpointState) {
        let from = self.state(key);
        if from.can_transition(to) {
            self.states.insert(key.clone(), to);
        } else {
            warn!(endpoint = %key, %from, %to, "Ignoring invalid state transition");
        }
    }
}

/// Drives observation runs over a shared [`ObserverContext`].
#[derive(Debug, Clone)]
pub struct ObservationScheduler {
    ctx: Arc<ObserverContext>,
    cursor: Arc<Mutex<RunCursor>>,
}

impl ObservationScheduler {
    /// Creates a scheduler with an empty cursor.
    #[must_use]
    pub fn new(ctx: ObserverContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            cursor: Arc::new(Mutex::new(RunCursor::default())),
        }
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &ObserverContext {
        &self.ctx
    }

    /// Snapshot of the latest state per endpoint. Waits for an active run.
    pub async fn endpoint_states(&self) -> HashMap<EndpointKey, EndpointState> {
        self.cursor.lock().await.states.clone()
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<RunCursor>, SchedulerError> {
        Arc::clone(&self.cursor)
            .try_lock_owned()
            .map_err(|_| SchedulerError::RunInProgress)
    }

    /// Runs once over every registered endpoint.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RunInProgress`] if another run is active, or
    /// [`SchedulerError::Registry`] if endpoints cannot be listed.
    pub async fn run_once(&self) -> Result<RunReport, SchedulerError> {
        self.run_scoped(None).await
    }

    /// Runs once over the endpoints of one agent, or all when `None`,
    /// without charging any caller's quota.
    ///
    /// # Errors
    ///
    /// As [`Self::run_once`].
    pub async fn run_scoped(&self, agent_address: Option<&str>) -> Result<RunReport, SchedulerError> {
        let cursor = self.acquire()?;
        self.run_locked(cursor, agent_address).await
    }

    /// Runs on behalf of `caller`, optionally restricted to one agent.
    ///
    /// # Errors
    ///
    /// As [`Self::run_once`], plus [`SchedulerError::QuotaExceeded`].
    pub async fn request_observation(
        &self,
        caller: &CallerIdentity,
        agent_address: Option<&str>,
    ) -> Result<RunReport, SchedulerError> {
        let cursor = self.acquire()?;
        self.ctx.quota.check(caller)?;
        self.run_locked(cursor, agent_address).await
    }

    #[instrument(name = "w402.run", skip_all, fields(agent = agent_address))]
    async fn run_locked(
        &self,
        mut cursor: OwnedMutexGuard<RunCursor>,
        agent_address: Option<&str>,
    ) -> Result<RunReport, SchedulerError> {
        let endpoints = self.ctx.registry.list_endpoints(agent_address).await?;
        info!(endpoints = endpoints.len(), "Observation run started");

        let mut report = RunReport::started(UnixTimestamp::now());
        for (index, endpoint) in endpoints.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.ctx.settings.inter_probe_delay()).await;
            }
            let run = observe_endpoint(&self.ctx, &mut cursor, endpoint).await;
            report.record(&run);
        }

        report.finished_at = UnixTimestamp::now();
        cursor.last_run = Some(report.finished_at);
        info!(
            probed = report.probed,
            paid = report.paid,
            free = report.free,
            failed = report.failed,
            elapsed_secs = report.finished_at.since(report.started_at).as_secs(),
            "Observation run finished"
        );
        Ok(report)
    }

    /// Discovers and probes newly imported endpoints of every agent with a
    /// base URL, yielding one item per processed endpoint.
    ///
    /// The returned stream holds the run cursor until it is dropped or
    /// exhausted.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RunInProgress`], [`SchedulerError::QuotaExceeded`],
    /// or [`SchedulerError::Registry`] if agents cannot be listed.
    pub async fn backfill(
        &self,
        caller: &CallerIdentity,
    ) -> Result<impl Stream<Item = BackfillItem> + Send + 'static, SchedulerError> {
        let cursor = self.acquire()?;
        self.ctx.quota.check(caller)?;
        let targets: VecDeque<_> = self
            .ctx
            .registry
            .list_agents()
            .await?
            .iter()
            .filter_map(DiscoveredAgent::target)
            .collect();
        info!(agents = targets.len(), %caller, "Backfill started");

        let state = Backfill {
            ctx: Arc::clone(&self.ctx),
            cursor,
            targets,
            pending: VecDeque::new(),
            probed_any: false,
        };
        Ok(stream::unfold(state, Backfill::next))
    }

    /// Records a sighting of `target` and imports its endpoints without
    /// probing them.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Registry`] on storage failure.
    pub async fn discover_agent(
        &self,
        target: &DiscoveryTarget,
        source: &str,
        environment: Option<String>,
    ) -> Result<ImportSummary, SchedulerError> {
        let agent = DiscoveredAgent::new(
            target.agent_address.clone(),
            DiscoveryMetadata {
                source: source.to_owned(),
                first_seen: UnixTimestamp::now(),
                environment,
                base_url: Some(target.base_url.clone()),
            },
        );
        if self.ctx.registry.upsert_agent(agent).await? {
            info!(agent = %target.agent_address, "New agent");
        }
        let outcomes = discover_and_register(&self.ctx, target).await?;
        let outcomes: Vec<_> = outcomes.into_iter().map(|(_, registration)| registration).collect();
        Ok(summarize(&outcomes))
    }

    /// Imports configured seed agents.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Registry`] on storage failure.
    pub async fn seed(&self, seeds: &[AgentSeed]) -> Result<ImportSummary, SchedulerError> {
        let mut total = ImportSummary::default();
        for seed in seeds {
            let target = DiscoveryTarget {
                agent_address: seed.address.clone(),
                base_url: seed.base_url.clone(),
            };
            let summary = self
                .discover_agent(&target, "config", seed.environment.clone())
                .await?;
            total.imported += summary.imported;
            total.skipped += summary.skipped;
        }
        Ok(total)
    }

    /// Runs every configured interval until `token` is cancelled.
    ///
    /// Cancellation is observed between runs; an active run completes.
    pub async fn run_until_cancelled(&self, token: CancellationToken) {
        let interval = self.ctx.settings.interval();
        while !token.is_cancelled() {
            match self.run_once().await {
                Ok(report) => debug!(succeeded = report.succeeded(), "Scheduled run complete"),
                Err(e) => warn!(error = %e, "Scheduled run skipped"),
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        info!("Observation loop stopped");
    }
}

/// Folds a backfill stream into its summary.
pub async fn summarize_backfill(items: impl Stream<Item = BackfillItem>) -> BackfillSummary {
    use futures_util::StreamExt;

    items
        .fold(BackfillSummary::default(), |mut summary, item| async move {
            summary.record(&item);
            summary
        })
        .await
}

struct Backfill {
    ctx: Arc<ObserverContext>,
    cursor: OwnedMutexGuard<RunCursor>,
    targets: VecDeque<DiscoveryTarget>,
    pending: VecDeque<(ObservedEndpoint, Registration)>,
    probed_any: bool,
}

impl Backfill {
    async fn next(mut self) -> Option<(BackfillItem, Self)> {
        loop {
            if let Some((endpoint, registration)) = self.pending.pop_front() {
                let run = if registration == Registration::Imported {
                    if self.probed_any {
                        tokio::time::sleep(self.ctx.settings.inter_probe_delay()).await;
                    }
                    self.probed_any = true;
                    Some(observe_endpoint(&self.ctx, &mut self.cursor, &endpoint).await)
                } else {
                    None
                };
                let item = BackfillItem {
                    agent_address: endpoint.agent_address.clone(),
                    endpoint: endpoint.key(),
                    registration,
                    run,
                };
                return Some((item, self));
            }

            let target = self.targets.pop_front()?;
            match discover_and_register(&self.ctx, &target).await {
                Ok(outcomes) => self.pending = outcomes.into(),
                Err(e) => warn!(agent = %target.agent_address, error = %e, "Backfill registration failed"),
            }
        }
    }
}

async fn discover_and_register(
    ctx: &ObserverContext,
    target: &DiscoveryTarget,
) -> Result<Vec<(ObservedEndpoint, Registration)>, RegistryError> {
    let now = UnixTimestamp::now();
    let endpoints: Vec<_> = ctx
        .discoverer
        .discover(target)
        .await
        .into_iter()
        .map(|endpoint| ObservedEndpoint::from_discovered(target, endpoint, now))
        .collect();
    let outcomes = ctx.registry.register_endpoints(endpoints.clone()).await?;
    Ok(endpoints.into_iter().zip(outcomes).collect())
}

/// What one endpoint attempt produced, before timing and keying.
struct Attempt {
    outcome: EndpointState,
    http_status: Option<u16>,
    error_class: Option<ErrorClass>,
    settlement_tx: Option<String>,
    detail: Option<String>,
}

impl Attempt {
    const fn free(status: u16) -> Self {
        Self {
            outcome: EndpointState::Free,
            http_status: Some(status),
            error_class: None,
            settlement_tx: None,
            detail: None,
        }
    }

    fn failed(class: ErrorClass, http_status: Option<u16>, detail: String) -> Self {
        Self {
            outcome: EndpointState::Failed,
            http_status,
            error_class: Some(class),
            settlement_tx: None,
            detail: Some(detail),
        }
    }

    /// Records `e` on a paid attempt; anything but a warning fails it.
    fn note(&mut self, e: &ObserveError) {
        if !e.is_warning() {
            self.outcome = EndpointState::Failed;
        }
        self.error_class = Some(e.class());
        self.detail = Some(e.to_string());
    }
}

#[derive(Debug, thiserror::Error)]
enum PaymentError {
    #[error(transparent)]
    Observe(#[from] ObserveError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl PaymentError {
    const fn class(&self) -> ErrorClass {
        match self {
            Self::Observe(e) => e.class(),
            Self::Submit(e) => e.class(),
        }
    }

    const fn http_status(&self) -> Option<u16> {
        match self {
            Self::Submit(SubmitError::Rejected { status, .. }) => Some(*status),
            Self::Submit(SubmitError::SettlementFailed { .. }) => Some(200),
            Self::Submit(SubmitError::Transport(_)) => None,
            Self::Submit(SubmitError::Header(_)) | Self::Observe(_) => Some(402),
        }
    }
}

/// Probes one endpoint, pays if asked, and appends exactly one run.
async fn observe_endpoint(
    ctx: &ObserverContext,
    cursor: &mut RunCursor,
    endpoint: &ObservedEndpoint,
) -> ObservationRun {
    let key = endpoint.key();
    cursor.transition(&key, EndpointState::Probing);

    let observed_at = UnixTimestamp::now();
    let started = Instant::now();
    let request = RequestDescriptor::for_endpoint(&endpoint.method, endpoint.endpoint.clone());
    let attempt = attempt(ctx, &request).await;

    let run = ObservationRun {
        endpoint: key,
        observed_at,
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        http_status: attempt.http_status,
        outcome: attempt.outcome,
        error_class: attempt.error_class,
        settlement_tx: attempt.settlement_tx,
        detail: attempt.detail,
    };
    cursor.transition(&run.endpoint, run.outcome);

    match run.error_class {
        None => info!(endpoint = %run.endpoint, outcome = %run.outcome, latency_ms = run.latency_ms, "Endpoint observed"),
        Some(class) => warn!(
            endpoint = %run.endpoint,
            outcome = %run.outcome,
            %class,
            detail = run.detail.as_deref().unwrap_or_default(),
            "Endpoint observed"
        ),
    }
    if let Err(e) = ctx.log.append(run.clone()).await {
        warn!(endpoint = %run.endpoint, error = %e, "Failed to record observation");
    }
    run
}

async fn attempt(ctx: &ObserverContext, request: &RequestDescriptor) -> Attempt {
    let prober = &ctx.prober;
    let probe = ctx
        .retry
        .retry(move || prober.probe(request), |_: &TransportError| true)
        .await;
    let response = match probe {
        Ok(response) => response,
        Err(e) => return Attempt::failed(e.class(), None, e.to_string()),
    };

    let status = response.status.as_u16();
    if response.status.is_success() {
        return Attempt::free(status);
    }
    if !response.is_payment_required() {
        return Attempt::failed(ErrorClass::HttpStatus, Some(status), format!("unexpected status {status}"));
    }

    match pay(ctx, request, &response.body).await {
        Ok(paid) => paid,
        Err(e) => Attempt::failed(e.class(), e.http_status(), e.to_string()),
    }
}

async fn pay(ctx: &ObserverContext, request: &RequestDescriptor, body: &[u8]) -> Result<Attempt, PaymentError> {
    let requirement = ctx.parser.parse(body)?;
    let constructor = ctx
        .constructor
        .as_ref()
        .ok_or_else(|| ObserveError::ConstructionError("no key custody configured".to_owned()))?;
    let payment = constructor
        .construct(&requirement)
        .await
        .map_err(ObserveError::from)?;
    let paid = ctx.submitter.submit(request, &payment.payload).await?;

    let mut attempt = Attempt {
        outcome: EndpointState::Paid,
        http_status: Some(200),
        error_class: None,
        settlement_tx: paid.settlement.transaction().map(str::to_owned),
        detail: None,
    };
    let unconfirmed = match &paid.settlement {
        Settlement::Unconfirmed(UnconfirmedReason::MissingHeader) => {
            Some(ObserveError::SettlementUnconfirmed("no settlement header".to_owned()))
        }
        Settlement::Unconfirmed(UnconfirmedReason::Undecodable(reason)) => Some(
            ObserveError::SettlementUnconfirmed(format!("undecodable settlement header: {reason}")),
        ),
        Settlement::Confirmed(result) if ctx.settings.verify_settlement => {
            let timeout = ctx.settings.settlement_timeout();
            match confirm_on_chain(constructor.ledger().as_ref(), &result.transaction, timeout).await {
                OnChain::Confirmed => None,
                OnChain::TimedOut => Some(ObserveError::SettlementUnconfirmed(format!(
                    "transaction not confirmed within {}s",
                    timeout.as_secs()
                ))),
                OnChain::Failed(reason) => Some(ObserveError::PaymentRejected {
                    status: 200,
                    body: format!("settlement transaction failed: {reason}"),
                }),
            }
        }
        Settlement::Confirmed(_) => None,
    };
    if let Some(e) = unconfirmed {
        attempt.note(&e);
    }
    Ok(attempt)
}

/// Ledger verdict on a settlement signature.
#[derive(Debug, PartialEq, Eq)]
enum OnChain {
    Confirmed,
    TimedOut,
    Failed(String),
}

async fn confirm_on_chain(ledger: &dyn Ledger, transaction: &str, timeout: Duration) -> OnChain {
    let Ok(signature) = Signature::from_str(transaction) else {
        debug!(transaction, "Settlement transaction is not a signature");
        return OnChain::TimedOut;
    };
    let poll = async {
        loop {
            match ledger.signature_status(&signature).await {
                Ok(SignatureStatus::Confirmed) => return OnChain::Confirmed,
                Ok(SignatureStatus::Failed(reason)) => {
                    debug!(%signature, %reason, "Settlement transaction failed");
                    return OnChain::Failed(reason);
                }
                Ok(SignatureStatus::Pending) => {}
                Err(e) => debug!(%signature, error = %e, "Signature status lookup failed"),
            }
            tokio::time::sleep(SETTLEMENT_POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.unwrap_or(OnChain::TimedOut)
}
