//! Response envelope normalisation.

use serde_json::Value;
use tracing::{debug, warn};

use crate::credentials::CredentialProvider;
use crate::dispatch::RawOutcome;
use crate::endpoint::Endpoint;
use crate::failure::{CallFailure, ErrorKind};
use crate::negotiate::NegotiationMode;
use crate::reconcile::text;

const NORMALIZE_TARGET: &str = "omnicall::normalize";

/// Reply key carrying a trust proof alongside the envelope.
pub const PROOF_KEY: &str = "proof";

/// Version-independent view of one endpoint's reply.
///
/// Exactly one of `value` and `failure` is authoritative; both are present
/// only when relaxed mode keeps a value that accompanied an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResult {
    /// Returned value, when non-null.
    pub value: Option<Value>,
    /// Why the call did not succeed.
    pub failure: Option<CallFailure>,
    /// Free-text output returned by the aggregate.
    pub output: Option<String>,
    /// Whether the value came from the version cache.
    pub from_cache: bool,
}

impl NormalizedResult {
    fn failed(failure: CallFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Protocol error code reported by the aggregate.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        self.failure.as_ref().and_then(CallFailure::code)
    }

    /// Human-readable failure description.
    #[must_use]
    pub fn error_detail(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }

    /// Structured failure classification.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(CallFailure::kind)
    }
}

/// Turns raw outcomes into [`NormalizedResult`]s.
pub struct ResponseNormalizer<'a> {
    credentials: &'a dyn CredentialProvider,
    mode: NegotiationMode,
}

impl<'a> ResponseNormalizer<'a> {
    /// Creates a normaliser that hands trust proofs to `credentials`.
    #[must_use]
    pub const fn new(credentials: &'a dyn CredentialProvider, mode: NegotiationMode) -> Self {
        Self { credentials, mode }
    }

    /// Normalises one endpoint's outcome.
    ///
    /// `version` is the version the endpoint was called at.
    #[must_use]
    pub fn normalize(&self, endpoint: &Endpoint, outcome: RawOutcome, version: u32) -> NormalizedResult {
        match outcome {
            RawOutcome::Skipped(reason) => NormalizedResult::failed(CallFailure::Skipped(reason)),
            RawOutcome::Failed(failure) => NormalizedResult::failed(CallFailure::Transport(failure)),
            RawOutcome::Probed {
                capabilities,
                from_cache,
            } => NormalizedResult {
                value: Some(capabilities).filter(|value| !value.is_null()),
                from_cache,
                ..NormalizedResult::default()
            },
            RawOutcome::Replied(mut reply) => {
                if version >= 2 {
                    self.hand_off_proof(endpoint, &mut reply);
                }
                let result = unwrap_envelope(reply, version, self.mode);
                if result.is_success() && result.value.is_none() {
                    warn!(
                        target: NORMALIZE_TARGET,
                        endpoint = %endpoint,
                        "aggregate reported success with an empty value"
                    );
                }
                result
            }
        }
    }

    fn hand_off_proof(&self, endpoint: &Endpoint, reply: &mut Value) {
        let Some(proof) = reply.as_object_mut().and_then(|map| map.remove(PROOF_KEY)) else {
            return;
        };
        if let Err(error) = self.credentials.record_proof(endpoint, &proof) {
            warn!(
                target: NORMALIZE_TARGET,
                endpoint = %endpoint,
                %error,
                "failed to record trust proof"
            );
            return;
        }
        debug!(target: NORMALIZE_TARGET, endpoint = %endpoint, "recorded trust proof");
    }
}

/// Interprets a reply for `version`; version 1 replies carry no envelope.
#[must_use]
pub fn unwrap_envelope(reply: Value, version: u32, mode: NegotiationMode) -> NormalizedResult {
    if version < 2 {
        return NormalizedResult {
            value: Some(reply).filter(|value| !value.is_null()),
            ..NormalizedResult::default()
        };
    }

    let Value::Object(mut map) = reply else {
        return malformed("reply is not a map");
    };
    let Some(raw_code) = map.get("code") else {
        return malformed("reply has no code");
    };
    let Some(code) = raw_code.as_object() else {
        return malformed("code is not a map");
    };
    let Some(geni_code) = code.get("geni_code").and_then(Value::as_i64) else {
        return malformed("code has no integer geni_code");
    };
    let am_type = text(code, "am_type");
    let am_code = code.get("am_code").and_then(Value::as_i64);
    let output = text(&map, "output");
    let value = map.remove("value").filter(|value| !value.is_null());

    if geni_code == 0 {
        return NormalizedResult {
            value,
            failure: None,
            output,
            from_cache: false,
        };
    }
    NormalizedResult {
        value: value.filter(|_| mode == NegotiationMode::Relaxed),
        failure: Some(CallFailure::AmReported {
            geni_code,
            am_type,
            am_code,
            output: output.clone(),
        }),
        output,
        from_cache: false,
    }
}

fn malformed(detail: &str) -> NormalizedResult {
    NormalizedResult::failed(CallFailure::MalformedResponse {
        detail: detail.to_owned(),
    })
}
