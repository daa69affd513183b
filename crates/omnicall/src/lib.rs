//! Multi-aggregate AM API call orchestration.
//!
//! The crate issues one logical operation against many independently run
//! aggregates that may each speak a different AM API version. It resolves
//! endpoint identifiers, probes capabilities through a file-backed
//! [`VersionCache`], negotiates a version per endpoint (optionally after a
//! fleet-wide vote), shapes version-correct calls, fans them out over a
//! caller-supplied [`Transport`], and folds the replies into a single
//! [`OperationOutcome`].
//!
//! Network access and credential storage stay behind the [`Transport`] and
//! [`CredentialProvider`] traits so embedders and tests can inject their own
//! implementations.

#![deny(missing_docs)]

mod aggregate;
mod cache;
mod capability;
mod credentials;
mod dispatch;
mod endpoint;
mod errors;
mod failure;
mod negotiate;
mod normalize;
mod operation;
mod options;
mod orchestrator;
mod pool;
mod probe;
mod reconcile;
mod resolver;
pub mod telemetry;
mod timestamp;
mod transport;

pub use aggregate::{EndpointOutcome, OperationOutcome, ResultAggregator};
pub use cache::{CacheEntry, CachedVersion, VersionCache};
pub use capability::{
    AllocationStyle, CapabilitySnapshot, CredentialType, capabilities_from_reply,
};
pub use credentials::{Credential, CredentialError, CredentialProvider, NoCredentials};
pub use dispatch::{CallPlanner, DispatchEntry, Dispatcher, PlannedCall, RawOutcome};
pub use endpoint::{Endpoint, UNSPECIFIED_URN};
pub use errors::{
    CapabilityError, OperationError, OptionError, OrchestrationError, ResolveError,
    VersionCacheError,
};
pub use failure::{CallFailure, ErrorKind, SkipReason, TransportFailure, TransportFailureKind};
pub use negotiate::{
    EndpointVersions, FleetDecision, Negotiated, NegotiationMode, Negotiator, Resolution, Tally,
    Vote, VoteRule, vote,
};
pub use normalize::{NormalizedResult, PROOF_KEY, ResponseNormalizer, unwrap_envelope};
pub use operation::{Operation, OperationArgs, OperationClass, PreparedCall, prepare_call};
pub use options::{BuiltOptions, CallIntent, CallOptions, RequestOptionBuilder, takes_rspec_version};
pub use orchestrator::{EngineSettings, OperationRequest, Orchestrator};
pub use probe::{
    CapabilityProber, GET_VERSION_METHOD, ProbeError, ProbeSettings, ProbedCapabilities,
};
pub use reconcile::{
    AllocationState, OperationalState, OutcomeClass, Reconciliation, ResourceRecord, reconcile,
};
pub use resolver::{AggregateRegistry, EndpointResolver, RegistryEntry, RegistryError};
pub use timestamp::{format_instant, parse_instant};
pub use transport::{AbortSignal, CallContext, Transport, TransportError};

#[cfg(test)]
mod tests;
