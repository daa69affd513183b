//! Operation-level result assembly.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::dispatch::DispatchEntry;
use crate::endpoint::Endpoint;
use crate::failure::ErrorKind;
use crate::normalize::NormalizedResult;
use crate::operation::Operation;
use crate::reconcile::{OutcomeClass, ResourceRecord, reconcile};

/// Everything known about one endpoint's part in an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointOutcome {
    /// Endpoint as resolved from the caller's identifiers.
    pub slot: Endpoint,
    /// Endpoint actually called, when any.
    pub called: Option<Endpoint>,
    /// Whether the call went to an alternate URL.
    pub redirected: bool,
    /// Normalised reply.
    pub result: NormalizedResult,
    /// Outcome class after resource reconciliation.
    pub class: OutcomeClass,
    /// Requested resources absent from the reply.
    pub missing: Vec<String>,
    /// Resources that reported an error.
    pub failed: BTreeMap<String, String>,
    /// Resource records found in the reply.
    pub records: Vec<ResourceRecord>,
    /// Warnings raised for this endpoint.
    pub warnings: Vec<String>,
}

impl EndpointOutcome {
    /// Version the endpoint was called at.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.called.as_ref().and_then(Endpoint::negotiated_version)
    }

    /// Structured classification of whatever kept this endpoint from a
    /// clean success.
    ///
    /// Call failures take precedence; a partial success is classified by its
    /// resources, with failed resources outranking missing ones.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if let Some(kind) = self.result.error_kind() {
            return Some(kind);
        }
        match self.class {
            OutcomeClass::PartialSuccess if !self.failed.is_empty() => Some(ErrorKind::ResourceFailed),
            OutcomeClass::PartialSuccess => Some(ErrorKind::ResourceMissing),
            OutcomeClass::Success | OutcomeClass::Failure => None,
        }
    }

    fn status_line(&self) -> String {
        let mut line = format!("{}: ", self.slot);
        match self.class {
            OutcomeClass::Success => line.push_str("succeeded"),
            OutcomeClass::PartialSuccess => line.push_str("partially succeeded"),
            OutcomeClass::Failure => line.push_str(
                self.result
                    .error_detail()
                    .as_deref()
                    .unwrap_or("failed: empty result"),
            ),
        }
        if let Some(version) = self.version().filter(|_| self.class != OutcomeClass::Failure) {
            let _ = write!(line, " at AM API version {version}");
        }
        if self.redirected {
            if let Some(called) = &self.called {
                let _ = write!(line, " via {}", called.url());
            }
        }
        if !self.missing.is_empty() {
            let _ = write!(line, "; missing {}", self.missing.join(", "));
        }
        if !self.failed.is_empty() {
            let failed = self
                .failed
                .iter()
                .map(|(urn, error)| format!("{urn} ({error})"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(line, "; failed {failed}");
        }
        line
    }
}

/// Result of one logical operation across every endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Operation that was issued.
    pub operation: Operation,
    /// Version the invocation asked for after fleet reconciliation.
    pub api_version: u32,
    /// Fleet reconciliation message, when there was one.
    pub fleet_message: Option<String>,
    /// Per-endpoint outcomes keyed by the slot URL.
    pub per_endpoint: BTreeMap<String, EndpointOutcome>,
    /// Requested resources missing at any endpoint, in first-seen order.
    pub missing_resources: Vec<String>,
    /// Resources that reported an error at any endpoint.
    pub failed_resources: BTreeMap<String, String>,
    /// Endpoints classed as full successes.
    pub success_count: usize,
    /// Endpoints classed as partial successes.
    pub partial_count: usize,
    /// Endpoints in the invocation.
    pub total_endpoints: usize,
    order: Vec<String>,
}

impl OperationOutcome {
    /// Normalised result for the slot with `url`.
    #[must_use]
    pub fn result(&self, url: &str) -> Option<&NormalizedResult> {
        self.per_endpoint.get(url).map(|outcome| &outcome.result)
    }

    /// Endpoint outcomes in the order the caller supplied them.
    pub fn results_in_order(&self) -> impl Iterator<Item = &EndpointOutcome> {
        self.order.iter().filter_map(|url| self.per_endpoint.get(url))
    }

    /// Whether every endpoint fully succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.success_count == self.total_endpoints
    }

    /// Operator-facing summary, one line per endpoint in caller order.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.total_endpoints + 2);
        if let Some(message) = &self.fleet_message {
            lines.push(message.clone());
        }
        lines.extend(self.results_in_order().map(EndpointOutcome::status_line));
        lines.push(format!(
            "Succeeded at {} of {} aggregates.",
            self.success_count, self.total_endpoints
        ));
        lines.join("\n")
    }
}

/// Builds an [`OperationOutcome`] from normalised per-endpoint results.
#[derive(Debug)]
pub struct ResultAggregator {
    operation: Operation,
    api_version: u32,
    requested: Vec<String>,
    fleet_message: Option<String>,
    outcomes: Vec<EndpointOutcome>,
}

impl ResultAggregator {
    /// Starts an aggregation; `requested` lists the sliver URNs asked about.
    #[must_use]
    pub fn new(operation: Operation, api_version: u32, requested: &[String]) -> Self {
        Self {
            operation,
            api_version,
            requested: if operation.reports_resources() {
                requested.to_vec()
            } else {
                Vec::new()
            },
            fleet_message: None,
            outcomes: Vec::new(),
        }
    }

    /// Attaches the fleet reconciliation message.
    #[must_use]
    pub fn with_fleet_message(mut self, message: Option<String>) -> Self {
        self.fleet_message = message;
        self
    }

    /// Records one endpoint; call in caller order.
    pub fn push(&mut self, entry: DispatchEntry, result: NormalizedResult) {
        let reconciliation = reconcile(result.value.as_ref(), &self.requested);
        let class = if result.is_success() {
            reconciliation.class
        } else {
            OutcomeClass::Failure
        };
        self.outcomes.push(EndpointOutcome {
            slot: entry.slot,
            called: entry.called,
            redirected: entry.redirected,
            result,
            class,
            missing: reconciliation.missing,
            failed: reconciliation.failed,
            records: reconciliation.records,
            warnings: entry.warnings,
        });
    }

    /// Finishes the aggregation.
    #[must_use]
    pub fn finish(self) -> OperationOutcome {
        let mut outcome = OperationOutcome {
            operation: self.operation,
            api_version: self.api_version,
            fleet_message: self.fleet_message,
            per_endpoint: BTreeMap::new(),
            missing_resources: Vec::new(),
            failed_resources: BTreeMap::new(),
            success_count: 0,
            partial_count: 0,
            total_endpoints: self.outcomes.len(),
            order: Vec::with_capacity(self.outcomes.len()),
        };
        for endpoint in self.outcomes {
            match endpoint.class {
                OutcomeClass::Success => outcome.success_count += 1,
                OutcomeClass::PartialSuccess => outcome.partial_count += 1,
                OutcomeClass::Failure => {}
            }
            for urn in &endpoint.missing {
                if !outcome.missing_resources.contains(urn) {
                    outcome.missing_resources.push(urn.clone());
                }
            }
            outcome.failed_resources.extend(
                endpoint
                    .failed
                    .iter()
                    .map(|(urn, error)| (urn.clone(), error.clone())),
            );
            let url = endpoint.slot.url().to_owned();
            outcome.order.push(url.clone());
            outcome.per_endpoint.insert(url, endpoint);
        }
        outcome
    }
}
