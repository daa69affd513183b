//! Capability probing with cache consultation.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::VersionCache;
use crate::capability::{CapabilitySnapshot, capabilities_from_reply};
use crate::endpoint::Endpoint;
use crate::failure::{SkipReason, TransportFailure};
use crate::transport::{AbortSignal, CallContext, Transport};

const PROBE_TARGET: &str = "omnicall::probe";

/// Wire name of the capability introspection call.
pub const GET_VERSION_METHOD: &str = "GetVersion";

/// Knobs controlling how probes consult the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Maximum age of a cached snapshot served without re-probing.
    pub max_age: Duration,
    /// Whether cached snapshots may be served at all.
    pub use_cache: bool,
    /// Deadline for a live probe.
    pub timeout: Duration,
}

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedCapabilities {
    /// Parsed snapshot.
    pub snapshot: CapabilitySnapshot,
    /// Capability map as returned by the aggregate.
    pub capabilities: Value,
    /// Whether the snapshot came from the cache.
    pub from_cache: bool,
}

/// Why a probe produced no usable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The call failed in transit.
    Transport(TransportFailure),
    /// The reply was not a usable capability map.
    Malformed(String),
    /// Cancellation was requested first.
    Aborted,
}

impl ProbeError {
    /// Skip reason equivalent to this failure.
    #[must_use]
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            Self::Transport(failure) => SkipReason::Transport(failure.clone()),
            Self::Malformed(detail) => SkipReason::MalformedCapabilities {
                detail: detail.clone(),
            },
            Self::Aborted => SkipReason::Aborted,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(failure) => write!(formatter, "{failure}"),
            Self::Malformed(detail) => write!(formatter, "malformed GetVersion reply: {detail}"),
            Self::Aborted => formatter.write_str("cancelled"),
        }
    }
}

/// Fetches capability snapshots, preferring fresh cache entries.
pub struct CapabilityProber<'a> {
    transport: &'a dyn Transport,
    cache: &'a VersionCache,
    settings: ProbeSettings,
}

impl<'a> CapabilityProber<'a> {
    /// Builds a prober over the given transport and cache.
    #[must_use]
    pub const fn new(transport: &'a dyn Transport, cache: &'a VersionCache, settings: ProbeSettings) -> Self {
        Self {
            transport,
            cache,
            settings,
        }
    }

    /// Returns the endpoint's capabilities, from cache when fresh enough.
    ///
    /// Every live probe records its result, success or failure, in the cache.
    /// Cache write failures are logged and never fail the probe.
    pub fn probe(
        &self,
        endpoint: &Endpoint,
        force_refresh: bool,
        abort: &AbortSignal,
    ) -> Result<ProbedCapabilities, ProbeError> {
        if !force_refresh && self.settings.use_cache {
            if let Some(cached) = self.fresh_from_cache(endpoint) {
                return Ok(cached);
            }
        }
        if abort.is_aborted() {
            return Err(ProbeError::Aborted);
        }

        let context = CallContext {
            timeout: self.settings.timeout,
            abort,
        };
        debug!(target: PROBE_TARGET, endpoint = %endpoint, "probing capabilities");
        let reply = match self
            .transport
            .invoke(endpoint, GET_VERSION_METHOD, &[], &context)
        {
            Ok(reply) => reply,
            Err(error) => {
                let failure =
                    TransportFailure::classify(endpoint, error.message(), self.settings.timeout);
                self.record_error(endpoint, &failure.message);
                return Err(ProbeError::Transport(failure));
            }
        };

        let fetched_at = OffsetDateTime::now_utc();
        let parsed = capabilities_from_reply(&reply).and_then(|capabilities| {
            CapabilitySnapshot::from_capabilities(capabilities, fetched_at)
                .map(|snapshot| (snapshot, capabilities.clone()))
        });
        let (snapshot, capabilities) = match parsed {
            Ok(parts) => parts,
            Err(error) => {
                let detail = error.to_string();
                self.record_error(endpoint, &detail);
                return Err(ProbeError::Malformed(detail));
            }
        };
        if let Err(error) = self.cache.put(endpoint, &capabilities, fetched_at) {
            warn!(target: PROBE_TARGET, %error, "failed to update version cache");
        }
        info!(
            target: PROBE_TARGET,
            endpoint = %endpoint,
            version = snapshot.primary_version,
            "probed capabilities"
        );
        Ok(ProbedCapabilities {
            snapshot,
            capabilities,
            from_cache: false,
        })
    }

    fn fresh_from_cache(&self, endpoint: &Endpoint) -> Option<ProbedCapabilities> {
        let cached = self.cache.get(endpoint.url())?;
        if !cached
            .snapshot
            .is_fresh(self.settings.max_age, OffsetDateTime::now_utc())
        {
            debug!(target: PROBE_TARGET, endpoint = %endpoint, "cached capabilities are stale");
            return None;
        }
        debug!(target: PROBE_TARGET, endpoint = %endpoint, "using cached capabilities");
        Some(ProbedCapabilities {
            snapshot: cached.snapshot,
            capabilities: cached.capabilities,
            from_cache: true,
        })
    }

    fn record_error(&self, endpoint: &Endpoint, message: &str) {
        warn!(target: PROBE_TARGET, endpoint = %endpoint, message, "probe failed");
        if let Err(error) = self.cache.mark_error(endpoint, message) {
            warn!(target: PROBE_TARGET, %error, "failed to record probe error in version cache");
        }
    }
}
