//! Fan-out of one operation across resolved endpoints.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::errors::OrchestrationError;
use crate::failure::{CallFailure, SkipReason, TransportFailure};
use crate::negotiate::{Negotiated, Negotiator, Resolution};
use crate::operation::PreparedCall;
use crate::pool::run_bounded;
use crate::transport::{AbortSignal, CallContext, Transport};

const DISPATCH_TARGET: &str = "omnicall::dispatch";

/// What happened when an endpoint was visited, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// The endpoint was not called.
    Skipped(SkipReason),
    /// The transport returned a reply.
    Replied(Value),
    /// The transport failed.
    Failed(TransportFailure),
    /// The operation was answered from the capability probe.
    Probed {
        /// Capability map.
        capabilities: Value,
        /// Whether it came from the version cache.
        from_cache: bool,
    },
}

/// Outcome for one caller-supplied endpoint slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEntry {
    /// Endpoint as resolved from the caller's identifiers.
    pub slot: Endpoint,
    /// Endpoint actually used, when negotiation chose one.
    pub called: Option<Endpoint>,
    /// Whether negotiation redirected to an alternate URL.
    pub redirected: bool,
    /// Raw outcome.
    pub outcome: RawOutcome,
    /// Warnings raised while negotiating and planning.
    pub warnings: Vec<String>,
}

impl DispatchEntry {
    fn skipped(slot: &Endpoint, reason: SkipReason) -> Self {
        Self {
            slot: slot.clone(),
            called: None,
            redirected: false,
            outcome: RawOutcome::Skipped(reason),
            warnings: Vec::new(),
        }
    }

    /// Version the endpoint was called at.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.called.as_ref().and_then(Endpoint::negotiated_version)
    }
}

/// How one negotiated endpoint should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedCall {
    /// Issue this call.
    Invoke {
        /// Method and arguments.
        call: PreparedCall,
        /// Warnings raised while shaping the call.
        warnings: Vec<String>,
    },
    /// Do not call the endpoint.
    Unavailable(SkipReason),
}

/// Shapes the call for each negotiated endpoint.
pub trait CallPlanner: Sync {
    /// Plans the call for one endpoint; errors abort the invocation.
    fn plan(&self, negotiated: &Negotiated) -> Result<PlannedCall, OrchestrationError>;

    /// Whether every endpoint is answered from its capability probe, without
    /// negotiating a version or issuing a call.
    fn answers_from_probe(&self) -> bool {
        false
    }
}

/// Visits endpoints, negotiating and calling each one at most once.
pub struct Dispatcher<'a> {
    negotiator: &'a Negotiator<'a>,
    transport: &'a dyn Transport,
    call_timeout: Duration,
    worker_limit: usize,
    abort: &'a AbortSignal,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        negotiator: &'a Negotiator<'a>,
        transport: &'a dyn Transport,
        call_timeout: Duration,
        worker_limit: usize,
        abort: &'a AbortSignal,
    ) -> Self {
        Self {
            negotiator,
            transport,
            call_timeout,
            worker_limit,
            abort,
        }
    }

    /// Negotiates and calls every endpoint, returning entries in input order.
    ///
    /// A skip or transport failure is fatal when `endpoints` has exactly one
    /// member; otherwise it is recorded and the fan-out continues. Calls are
    /// never retried.
    pub fn execute(
        &self,
        endpoints: &[Endpoint],
        desired: u32,
        planner: &dyn CallPlanner,
    ) -> Result<Vec<DispatchEntry>, OrchestrationError> {
        let results = run_bounded(endpoints, self.worker_limit, |slot| {
            self.visit(slot, desired, planner)
        });
        let entries = results.into_iter().collect::<Result<Vec<_>, _>>()?;

        if let [only] = entries.as_slice() {
            let label = only.slot.to_string();
            match &only.outcome {
                RawOutcome::Skipped(SkipReason::Aborted) => return Err(OrchestrationError::Aborted),
                RawOutcome::Skipped(reason) => {
                    return Err(OrchestrationError::EndpointSkipped {
                        endpoint: label,
                        reason: reason.clone(),
                    });
                }
                RawOutcome::Failed(failure) => {
                    return Err(OrchestrationError::EndpointFailed {
                        endpoint: label,
                        failure: CallFailure::Transport(failure.clone()),
                    });
                }
                RawOutcome::Replied(_) | RawOutcome::Probed { .. } => {}
            }
        }
        Ok(entries)
    }

    fn visit(
        &self,
        slot: &Endpoint,
        desired: u32,
        planner: &dyn CallPlanner,
    ) -> Result<DispatchEntry, OrchestrationError> {
        if self.abort.is_aborted() {
            return Ok(DispatchEntry::skipped(slot, SkipReason::Aborted));
        }
        if planner.answers_from_probe() {
            return Ok(self.report_capabilities(slot));
        }
        let (negotiated, redirected) = match self.negotiator.resolve(slot, desired) {
            Resolution::Use(negotiated) => (negotiated, false),
            Resolution::Redirect(negotiated) => (negotiated, true),
            Resolution::Skip(reason) => return Ok(DispatchEntry::skipped(slot, reason)),
        };

        let mut warnings = negotiated.warnings.clone();
        let outcome = match planner.plan(&negotiated)? {
            PlannedCall::Unavailable(reason) => RawOutcome::Skipped(reason),
            PlannedCall::Invoke {
                call,
                warnings: planning,
            } => {
                warnings.extend(planning);
                self.invoke(&negotiated.endpoint, &call)
            }
        };
        Ok(DispatchEntry {
            slot: slot.clone(),
            called: Some(negotiated.endpoint),
            redirected,
            outcome,
            warnings,
        })
    }

    fn report_capabilities(&self, slot: &Endpoint) -> DispatchEntry {
        self.negotiator.probe(slot).map_or_else(
            |error| DispatchEntry::skipped(slot, error.skip_reason()),
            |probed| DispatchEntry {
                slot: slot.clone(),
                called: Some(slot.at_version(probed.snapshot.primary_version)),
                redirected: false,
                outcome: RawOutcome::Probed {
                    capabilities: probed.capabilities,
                    from_cache: probed.from_cache,
                },
                warnings: Vec::new(),
            },
        )
    }

    fn invoke(&self, endpoint: &Endpoint, call: &PreparedCall) -> RawOutcome {
        if self.abort.is_aborted() {
            return RawOutcome::Skipped(SkipReason::Aborted);
        }
        let context = CallContext {
            timeout: self.call_timeout,
            abort: self.abort,
        };
        debug!(
            target: DISPATCH_TARGET,
            endpoint = %endpoint,
            method = call.method,
            version = ?endpoint.negotiated_version(),
            "calling aggregate"
        );
        self.transport
            .invoke(endpoint, call.method, &call.args, &context)
            .map_or_else(
                |error| {
                    let failure =
                        TransportFailure::classify(endpoint, error.message(), self.call_timeout);
                    info!(
                        target: DISPATCH_TARGET,
                        endpoint = %endpoint,
                        method = call.method,
                        failure = %failure,
                        "call failed"
                    );
                    RawOutcome::Failed(failure)
                },
                RawOutcome::Replied,
            )
    }
}
