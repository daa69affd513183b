//! Error types that abort an invocation or a component operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::failure::{CallFailure, SkipReason};
use crate::operation::Operation;

/// Errors raised while turning identifiers into endpoints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A URL could not be canonicalised.
    #[error("'{input}' is not a usable aggregate URL: {reason}")]
    InvalidUrl {
        /// Identifier as supplied.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The identifier matched no nickname, URN, or URL.
    #[error("unknown aggregate '{0}': not a URL, configured nickname, or known URN")]
    UnknownAggregate(String),
    /// No identifiers were given and no defaults are available.
    #[error("no aggregates specified and none configured")]
    NoAggregates,
    /// The aggregate registry could not be queried.
    #[error("aggregate registry lookup failed: {0}")]
    Registry(String),
}

impl ResolveError {
    pub(crate) fn invalid_url(input: &str, reason: String) -> Self {
        Self::InvalidUrl {
            input: input.to_owned(),
            reason,
        }
    }
}

/// Errors raised by the persistent version cache.
#[derive(Debug, Error)]
pub enum VersionCacheError {
    /// Reading or writing the cache file failed.
    #[error("version cache I/O failed for {path}: {source}")]
    Io {
        /// Cache file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The cache could not be serialised.
    #[error("version cache could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

impl VersionCacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while interpreting a capability reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The reply was not a key/value map.
    #[error("reply is not a map")]
    NotAMap,
    /// The reply carried no primary protocol version.
    #[error("reply does not name a primary AM API version")]
    MissingApiVersion,
    /// The aggregate answered the probe with an error code.
    #[error("aggregate reported error {code}: {output}")]
    Reported {
        /// Protocol-level result code.
        code: i64,
        /// Error text.
        output: String,
    },
}

/// Errors raised while building call options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// The option is not legal for this operation at this version.
    #[error("option {option} is not supported by {operation} at AM API version {version}")]
    NotApplicable {
        /// Option name.
        option: &'static str,
        /// Requested operation.
        operation: Operation,
        /// Negotiated version.
        version: u32,
    },
    /// A time value could not be parsed.
    #[error("option {option} has an unparseable time '{value}': {reason}")]
    InvalidTime {
        /// Option name.
        option: &'static str,
        /// Value as supplied.
        value: String,
        /// Parser error.
        reason: String,
    },
    /// The requested resource-description format is not advertised.
    #[error("resource description format {requested} is not advertised (available: {advertised})")]
    UnadvertisedRspec {
        /// Requested format.
        requested: String,
        /// Formats the aggregate listed.
        advertised: String,
    },
}

/// Errors raised while shaping an operation call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The operation does not exist at the chosen version.
    #[error("{operation} is not available at AM API version {version}")]
    Unavailable {
        /// Requested operation.
        operation: Operation,
        /// Chosen version.
        version: u32,
    },
    /// A required argument was not supplied.
    #[error("{operation} requires {argument}")]
    MissingArgument {
        /// Requested operation.
        operation: Operation,
        /// Missing argument.
        argument: &'static str,
    },
    /// An argument was present but unusable.
    #[error("{operation} argument {argument} is invalid: {reason}")]
    InvalidArgument {
        /// Requested operation.
        operation: Operation,
        /// Offending argument.
        argument: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The operation name was not recognised.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
}

/// Errors that abort an invocation outright.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Endpoint identifiers could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Options were illegal for the operation.
    #[error(transparent)]
    Options(#[from] OptionError),
    /// The operation could not be shaped for the chosen version.
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// No credential could be obtained.
    #[error("could not obtain a credential for {subject}: {source}")]
    Credential {
        /// Subject the credential was requested for.
        subject: String,
        /// Provider error.
        #[source]
        source: CredentialError,
    },
    /// The only endpoint in the invocation was skipped.
    #[error("cannot call {endpoint}: {reason}")]
    EndpointSkipped {
        /// Endpoint label.
        endpoint: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The only endpoint in the invocation failed in transit.
    #[error("call to {endpoint} failed: {failure}")]
    EndpointFailed {
        /// Endpoint label.
        endpoint: String,
        /// Transport failure.
        failure: CallFailure,
    },
    /// Every capability probe failed during fleet reconciliation.
    #[error("no aggregate answered GetVersion: {}", failures.join("; "))]
    NoReachableEndpoints {
        /// Per-endpoint failure text.
        failures: Vec<String>,
    },
    /// Cancellation was requested before any outcome was produced.
    #[error("invocation cancelled")]
    Aborted,
}

impl OrchestrationError {
    pub(crate) fn credential(subject: &str, source: CredentialError) -> Self {
        Self::Credential {
            subject: subject.to_owned(),
            source,
        }
    }
}
