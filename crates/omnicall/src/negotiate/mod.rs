//! Protocol version negotiation.
//!
//! [`Negotiator::resolve`] decides, per endpoint, whether to call it as-is,
//! at an alternate URL serving the desired version, or not at all.
//! [`Negotiator::reconcile_fleet`] runs first for many-endpoint read-only
//! invocations and may change the version the whole invocation asks for.
//! Probe results are memoised for the lifetime of a negotiator so each
//! endpoint is introspected at most once per invocation.

mod fleet;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use omnicall_config::canonical_url;
use tracing::{debug, info, warn};

pub use fleet::{EndpointVersions, Tally, Vote, VoteRule, vote};

use crate::endpoint::Endpoint;
use crate::errors::OrchestrationError;
use crate::failure::SkipReason;
use crate::pool::run_bounded;
use crate::probe::{CapabilityProber, ProbeError, ProbedCapabilities};
use crate::transport::AbortSignal;

const NEGOTIATE_TARGET: &str = "omnicall::negotiate";

/// How strictly version mismatches are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationMode {
    /// Skip endpoints that cannot serve the desired version.
    #[default]
    Strict,
    /// Warn and call anyway.
    Relaxed,
}

impl NegotiationMode {
    /// Mode implied by the developer-mode setting.
    #[must_use]
    pub const fn from_developer_mode(developer_mode: bool) -> Self {
        if developer_mode {
            Self::Relaxed
        } else {
            Self::Strict
        }
    }
}

/// Endpoint chosen by negotiation, with what is known about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// Endpoint to call, with its negotiated version set.
    pub endpoint: Endpoint,
    /// Capabilities of the endpoint actually called, when probed.
    pub capabilities: Option<ProbedCapabilities>,
    /// Operator-facing warnings raised while negotiating.
    pub warnings: Vec<String>,
}

impl Negotiated {
    /// Version the call will be made at.
    #[must_use]
    pub const fn version(&self) -> Option<u32> {
        self.endpoint.negotiated_version()
    }
}

/// Per-endpoint negotiation decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Call the endpoint at its own URL.
    Use(Negotiated),
    /// Call an alternate URL for the same aggregate.
    Redirect(Negotiated),
    /// Do not call the endpoint.
    Skip(SkipReason),
}

/// Outcome of the fleet-wide vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetDecision {
    /// Version the caller asked for.
    pub requested: u32,
    /// Version the invocation will ask for.
    pub version: u32,
    /// Rule that settled the vote.
    pub rule: VoteRule,
    /// Whether an explicitly requested version was overridden.
    pub warning: bool,
    /// Operator-facing explanation, when there is something to say.
    pub message: Option<String>,
    /// Endpoints dropped from the vote, with the probe failure.
    pub unreachable: Vec<(String, String)>,
}

impl FleetDecision {
    /// Whether the invocation will ask for a different version.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.version != self.requested
    }
}

/// Per-invocation negotiator with a probe memo.
pub struct Negotiator<'a> {
    prober: CapabilityProber<'a>,
    mode: NegotiationMode,
    force_refresh: bool,
    abort: &'a AbortSignal,
    memo: Mutex<HashMap<String, Result<ProbedCapabilities, ProbeError>>>,
}

impl<'a> Negotiator<'a> {
    /// Creates a negotiator for one invocation.
    #[must_use]
    pub fn new(
        prober: CapabilityProber<'a>,
        mode: NegotiationMode,
        force_refresh: bool,
        abort: &'a AbortSignal,
    ) -> Self {
        Self {
            prober,
            mode,
            force_refresh,
            abort,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Negotiation mode in force.
    #[must_use]
    pub const fn mode(&self) -> NegotiationMode {
        self.mode
    }

    /// Probes `endpoint`, reusing any result already obtained this invocation.
    pub fn probe(&self, endpoint: &Endpoint) -> Result<ProbedCapabilities, ProbeError> {
        if let Some(known) = self.lock_memo().get(endpoint.url()) {
            return known.clone();
        }
        let result = self.prober.probe(endpoint, self.force_refresh, self.abort);
        if !matches!(result, Err(ProbeError::Aborted)) {
            self.lock_memo()
                .insert(endpoint.url().to_owned(), result.clone());
        }
        result
    }

    /// Decides how to call `endpoint` so that it speaks `desired`.
    #[must_use]
    pub fn resolve(&self, endpoint: &Endpoint, desired: u32) -> Resolution {
        let resolution = self.resolve_hop(endpoint, desired, true);
        match &resolution {
            Resolution::Use(negotiated) => debug!(
                target: NEGOTIATE_TARGET,
                endpoint = %endpoint,
                version = ?negotiated.version(),
                "using endpoint"
            ),
            Resolution::Redirect(negotiated) => info!(
                target: NEGOTIATE_TARGET,
                endpoint = %endpoint,
                redirect = negotiated.endpoint.url(),
                version = desired,
                "redirecting to alternate URL"
            ),
            Resolution::Skip(reason) => info!(
                target: NEGOTIATE_TARGET,
                endpoint = %endpoint,
                %reason,
                "skipping endpoint"
            ),
        }
        resolution
    }

    fn resolve_hop(&self, endpoint: &Endpoint, desired: u32, may_redirect: bool) -> Resolution {
        let probed = match self.probe(endpoint) {
            Ok(probed) => probed,
            Err(ProbeError::Aborted) => return Resolution::Skip(SkipReason::Aborted),
            Err(error) => {
                return match self.mode {
                    NegotiationMode::Strict => Resolution::Skip(error.skip_reason()),
                    NegotiationMode::Relaxed => {
                        let warning = format!(
                            "could not determine the AM API version of {endpoint} ({error}); \
                             calling it at version {desired} anyway"
                        );
                        warn!(target: NEGOTIATE_TARGET, endpoint = %endpoint, %error, "using unprobed endpoint");
                        Resolution::Use(Negotiated {
                            endpoint: endpoint.at_version(desired),
                            capabilities: None,
                            warnings: vec![warning],
                        })
                    }
                };
            }
        };

        let snapshot = &probed.snapshot;
        if snapshot.primary_version == desired {
            return Resolution::Use(Negotiated {
                endpoint: endpoint.at_version(desired),
                capabilities: Some(probed),
                warnings: Vec::new(),
            });
        }

        if let Some(advertised) = snapshot.url_for(desired) {
            match canonical_url(advertised) {
                Ok(url) if url == endpoint.url() => {
                    return Resolution::Use(Negotiated {
                        endpoint: endpoint.at_version(desired),
                        capabilities: Some(probed),
                        warnings: Vec::new(),
                    });
                }
                Ok(url) if may_redirect => {
                    if let Some(redirect) = self.follow(endpoint, url, desired) {
                        return redirect;
                    }
                }
                Ok(_) => {}
                Err(reason) => debug!(
                    target: NEGOTIATE_TARGET,
                    endpoint = %endpoint,
                    advertised,
                    reason,
                    "ignoring unusable alternate URL"
                ),
            }
        }

        match self.mode {
            NegotiationMode::Strict => Resolution::Skip(SkipReason::VersionMismatch {
                desired,
                supported: snapshot.supported_versions().into_iter().collect(),
            }),
            NegotiationMode::Relaxed => {
                let primary = snapshot.primary_version;
                let warning = format!(
                    "{endpoint} does not speak AM API version {desired}; \
                     calling it at version {primary} instead"
                );
                warn!(
                    target: NEGOTIATE_TARGET,
                    endpoint = %endpoint,
                    desired,
                    primary,
                    "accepting version mismatch"
                );
                Resolution::Use(Negotiated {
                    endpoint: endpoint.at_version(primary),
                    capabilities: Some(probed),
                    warnings: vec![warning],
                })
            }
        }
    }

    /// Probes the advertised alternate and accepts it only when its own
    /// primary version is `desired`.
    fn follow(&self, endpoint: &Endpoint, url: String, desired: u32) -> Option<Resolution> {
        let candidate = endpoint.redirected(url, desired);
        match self.resolve_hop(&candidate, desired, false) {
            Resolution::Use(negotiated)
                if negotiated
                    .capabilities
                    .as_ref()
                    .is_some_and(|probed| probed.snapshot.primary_version == desired) =>
            {
                Some(Resolution::Redirect(negotiated))
            }
            Resolution::Skip(SkipReason::Aborted) => Some(Resolution::Skip(SkipReason::Aborted)),
            _ => {
                debug!(
                    target: NEGOTIATE_TARGET,
                    endpoint = %endpoint,
                    candidate = candidate.url(),
                    "alternate URL does not serve the desired version"
                );
                None
            }
        }
    }

    /// Runs the fleet vote across `endpoints`.
    ///
    /// Endpoints whose probe fails are dropped from the vote. When every
    /// probe fails the invocation is aborted.
    pub fn reconcile_fleet(
        &self,
        endpoints: &[Endpoint],
        desired: u32,
        explicit: bool,
        worker_limit: usize,
    ) -> Result<FleetDecision, OrchestrationError> {
        let probes = run_bounded(endpoints, worker_limit, |endpoint| self.probe(endpoint));

        let mut surviving = Vec::new();
        let mut unreachable = Vec::new();
        for (endpoint, probe) in endpoints.iter().zip(probes) {
            match probe {
                Ok(probed) => surviving.push(EndpointVersions::new(
                    probed.snapshot.primary_version,
                    probed.snapshot.other_versions.keys().copied(),
                )),
                Err(ProbeError::Aborted) => return Err(OrchestrationError::Aborted),
                Err(error) => unreachable.push((endpoint.to_string(), error.to_string())),
            }
        }
        if surviving.is_empty() {
            return Err(OrchestrationError::NoReachableEndpoints {
                failures: unreachable
                    .into_iter()
                    .map(|(endpoint, error)| format!("{endpoint}: {error}"))
                    .collect(),
            });
        }

        let outcome = vote(&surviving, desired);
        let tally = Tally::new(&surviving);
        let decision = self.decide(desired, explicit, outcome, &tally, unreachable);
        if decision.changed() {
            warn!(
                target: NEGOTIATE_TARGET,
                requested = desired,
                adopted = decision.version,
                "changing requested AM API version"
            );
        } else {
            debug!(
                target: NEGOTIATE_TARGET,
                version = desired,
                rule = ?decision.rule,
                "keeping requested AM API version"
            );
        }
        Ok(decision)
    }

    fn decide(
        &self,
        desired: u32,
        explicit: bool,
        outcome: Vote,
        tally: &Tally,
        unreachable: Vec<(String, String)>,
    ) -> FleetDecision {
        let total = tally.total();
        let proposed = outcome.version;
        let mut decision = FleetDecision {
            requested: desired,
            version: desired,
            rule: outcome.rule,
            warning: false,
            message: None,
            unreachable,
        };

        if proposed == desired {
            if matches!(
                outcome.rule,
                VoteRule::DesiredMajority | VoteRule::DesiredStillSupported
            ) {
                decision.message = Some(format!(
                    "Keeping AM API version {desired}: spoken by {} of {total} reachable aggregates.",
                    tally.anywhere(desired)
                ));
            }
            return decision;
        }

        if self.mode == NegotiationMode::Relaxed {
            decision.message = Some(format!(
                "Developer mode: keeping AM API version {desired} although version {proposed} \
                 is spoken by {} of {total} reachable aggregates ({} speak {desired}).",
                tally.anywhere(proposed),
                tally.anywhere(desired)
            ));
            return decision;
        }

        let summary = format!(
            "Switching from AM API version {desired} to {proposed}: {} of {total} reachable \
             aggregates run {proposed} natively and {} support it; {} support {desired}.",
            tally.live(proposed),
            tally.anywhere(proposed),
            tally.anywhere(desired)
        );
        decision.version = proposed;
        decision.warning = explicit;
        decision.message = Some(if explicit {
            format!("WARNING: you explicitly requested AM API version {desired}. {summary}")
        } else {
            summary
        });
        decision
    }

    fn lock_memo(&self) -> MutexGuard<'_, HashMap<String, Result<ProbedCapabilities, ProbeError>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
