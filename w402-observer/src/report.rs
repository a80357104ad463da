//! Run and backfill reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use w402::ErrorClass;
use w402::observation::{EndpointState, ObservationRun};
use w402::registry::{EndpointKey, Registration};
use w402::timestamp::UnixTimestamp;

/// Outcome counts of one observation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// When the run started.
    pub started_at: UnixTimestamp,
    /// When the run finished.
    pub finished_at: UnixTimestamp,
    /// Endpoints probed.
    pub probed: usize,
    /// Endpoints that required and accepted payment.
    pub paid: usize,
    /// Endpoints that answered without payment.
    pub free: usize,
    /// Endpoints that failed.
    pub failed: usize,
    /// Successful runs recorded with a warning class.
    pub warnings: usize,
    /// Failure and warning counts by class.
    pub reasons: BTreeMap<ErrorClass, usize>,
}

impl RunReport {
    /// Starts an empty report.
    #[must_use]
    pub fn started(at: UnixTimestamp) -> Self {
        Self {
            started_at: at,
            finished_at: at,
            probed: 0,
            paid: 0,
            free: 0,
            failed: 0,
            warnings: 0,
            reasons: BTreeMap::new(),
        }
    }

    /// Counts one recorded run.
    pub fn record(&mut self, run: &ObservationRun) {
        self.probed += 1;
        match run.outcome {
            EndpointState::Paid => self.paid += 1,
            EndpointState::Free => self.free += 1,
            _ => self.failed += 1,
        }
        if let Some(class) = run.error_class {
            if run.is_success() {
                self.warnings += 1;
            }
            *self.reasons.entry(class).or_default() += 1;
        }
    }

    /// Number of endpoints that did not fail.
    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.paid + self.free
    }
}

/// One processed endpoint in a backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillItem {
    /// The agent being backfilled.
    pub agent_address: String,
    /// The endpoint.
    pub endpoint: EndpointKey,
    /// Whether it was new to the registry.
    pub registration: Registration,
    /// The probe run, for newly imported endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<ObservationRun>,
}

/// Totals folded from a backfill stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    /// Agents with at least one processed endpoint.
    pub agents: usize,
    /// Newly registered endpoints.
    pub imported: usize,
    /// Endpoints already in the registry.
    pub skipped: usize,
    /// Probes that succeeded.
    pub succeeded: usize,
    /// Probes that failed.
    pub failed: usize,
    /// Failure and warning counts by class.
    pub reasons: BTreeMap<ErrorClass, usize>,
    #[serde(skip)]
    last_agent: Option<String>,
}

impl BackfillSummary {
    /// Folds one item into the totals.
    pub fn record(&mut self, item: &BackfillItem) {
        if self.last_agent.as_deref() != Some(item.agent_address.as_str()) {
            self.agents += 1;
            self.last_agent = Some(item.agent_address.clone());
        }
        match item.registration {
            Registration::Imported => self.imported += 1,
            Registration::Skipped => self.skipped += 1,
        }
        if let Some(run) = &item.run {
            if run.is_success() {
                self.succeeded += 1;
            } else {
                self.failed += 1;
            }
            if let Some(class) = run.error_class {
                *self.reasons.entry(class).or_default() += 1;
            }
        }
    }
}
