//! Per-endpoint failure descriptions.
//!
//! These values never abort an invocation on their own: they are recorded
//! against the endpoint that produced them and surface in the aggregate
//! outcome. Hard failures live in [`crate::errors`].

use std::fmt;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::operation::Operation;

/// Category of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFailureKind {
    /// The call exceeded its deadline.
    Timeout,
    /// The socket could not be opened or was reset.
    Socket,
    /// The aggregate's server certificate was not trusted.
    ServerUntrusted,
    /// The aggregate rejected the caller's certificate.
    UserCertificate,
    /// Anything not recognised above; the raw text is kept.
    Other,
}

/// Transport failure with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Classified category.
    pub kind: TransportFailureKind,
    /// Message suitable for the operator.
    pub message: String,
}

impl TransportFailure {
    /// Classifies raw transport error text into a friendly failure.
    ///
    /// Matching is case-insensitive; unrecognised text is passed through.
    #[must_use]
    pub fn classify(endpoint: &Endpoint, raw: &str, timeout: Duration) -> Self {
        let lowered = raw.to_ascii_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

        if contains_any(&["timed out", "timeout"]) {
            return Self {
                kind: TransportFailureKind::Timeout,
                message: format!(
                    "Timed out after {} seconds waiting for {endpoint}",
                    timeout.as_secs()
                ),
            };
        }
        if contains_any(&[
            "connection refused",
            "errno",
            "no route to host",
            "name or service not known",
            "getaddrinfo",
            "connection reset",
        ]) {
            return Self {
                kind: TransportFailureKind::Socket,
                message: format!("Failed to reach {endpoint}: {raw}"),
            };
        }
        if contains_any(&["certificate verify failed", "unknown ca"]) {
            return Self {
                kind: TransportFailureKind::ServerUntrusted,
                message: format!("Server certificate for {endpoint} is not trusted: {raw}"),
            };
        }
        if contains_any(&[
            "bad certificate",
            "certificate expired",
            "certificate unknown",
        ]) {
            return Self {
                kind: TransportFailureKind::UserCertificate,
                message: format!("{endpoint} rejected your certificate: {raw}"),
            };
        }
        Self {
            kind: TransportFailureKind::Other,
            message: raw.to_owned(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message)
    }
}

/// Why an endpoint was excluded from an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Capability probing failed at the transport level.
    Transport(TransportFailure),
    /// The capability reply could not be interpreted.
    MalformedCapabilities {
        /// What was wrong with the reply.
        detail: String,
    },
    /// The endpoint does not speak the desired version.
    VersionMismatch {
        /// Version the invocation wanted.
        desired: u32,
        /// Versions the endpoint advertised.
        supported: Vec<u32>,
    },
    /// The operation does not exist at the version in use.
    OperationUnavailable {
        /// Requested operation.
        operation: Operation,
        /// Version the endpoint was resolved to.
        version: u32,
    },
    /// The endpoint does not advertise the requested resource-description
    /// format.
    UnsupportedRspec {
        /// Format the caller asked for.
        requested: String,
        /// Formats the endpoint advertised, comma separated.
        advertised: String,
    },
    /// The request cannot be shaped for the version this endpoint speaks.
    IncompatibleRequest {
        /// Version the endpoint was resolved to.
        version: u32,
        /// Why the request does not fit.
        detail: String,
    },
    /// Cancellation was requested before the endpoint was contacted.
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(failure) => write!(formatter, "unreachable: {failure}"),
            Self::MalformedCapabilities { detail } => {
                write!(formatter, "unusable GetVersion reply: {detail}")
            }
            Self::VersionMismatch { desired, supported } => {
                let supported = supported
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    formatter,
                    "does not speak AM API version {desired} (supports {supported})"
                )
            }
            Self::OperationUnavailable { operation, version } => {
                write!(formatter, "{operation} is not defined at AM API version {version}")
            }
            Self::UnsupportedRspec {
                requested,
                advertised,
            } => write!(
                formatter,
                "does not advertise resource description format {requested} (available: {advertised})"
            ),
            Self::IncompatibleRequest { version, detail } => {
                write!(formatter, "request does not fit AM API version {version}: {detail}")
            }
            Self::Aborted => formatter.write_str("cancelled before contact"),
        }
    }
}

/// Structured error classification attached to endpoint results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network, TLS, or timeout failure.
    TransportError,
    /// No usable protocol version.
    VersionMismatch,
    /// The reply did not have the expected shape.
    MalformedResponse,
    /// The aggregate answered with a non-success code.
    AmReportedError,
    /// A requested resource was absent from the result.
    ResourceMissing,
    /// A returned resource carried an error.
    ResourceFailed,
    /// The invocation was cancelled.
    Aborted,
}

/// Failure recorded against one endpoint's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The endpoint was never called.
    Skipped(SkipReason),
    /// The call failed in transit.
    Transport(TransportFailure),
    /// The reply could not be interpreted.
    MalformedResponse {
        /// What was wrong with the reply.
        detail: String,
    },
    /// The aggregate reported an error code.
    AmReported {
        /// Protocol-level result code.
        geni_code: i64,
        /// Aggregate implementation family, when reported.
        am_type: Option<String>,
        /// Implementation-specific code, when reported.
        am_code: Option<i64>,
        /// Error text from the aggregate.
        output: Option<String>,
    },
}

impl CallFailure {
    /// Structured classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Skipped(SkipReason::Transport(_)) | Self::Transport(_) => {
                ErrorKind::TransportError
            }
            Self::Skipped(
                SkipReason::VersionMismatch { .. }
                | SkipReason::OperationUnavailable { .. }
                | SkipReason::UnsupportedRspec { .. }
                | SkipReason::IncompatibleRequest { .. },
            ) => ErrorKind::VersionMismatch,
            Self::Skipped(SkipReason::MalformedCapabilities { .. })
            | Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Skipped(SkipReason::Aborted) => ErrorKind::Aborted,
            Self::AmReported { .. } => ErrorKind::AmReportedError,
        }
    }

    /// Protocol error code, when the aggregate reported one.
    #[must_use]
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::AmReported { geni_code, .. } => Some(*geni_code),
            _ => None,
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(formatter, "skipped: {reason}"),
            Self::Transport(failure) => write!(formatter, "{failure}"),
            Self::MalformedResponse { detail } => write!(formatter, "malformed reply: {detail}"),
            Self::AmReported {
                geni_code,
                am_type,
                am_code,
                output,
            } => {
                write!(formatter, "error code {geni_code}")?;
                match (am_type, am_code) {
                    (Some(family), Some(code)) => write!(formatter, " ({family} {code})")?,
                    (None, Some(code)) => write!(formatter, " (AM code {code})")?,
                    (Some(family), None) => write!(formatter, " ({family})")?,
                    (None, None) => {}
                }
                if let Some(output) = output.as_deref().filter(|text| !text.is_empty()) {
                    write!(formatter, ": {output}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("urn:x", "https://am.example.net").expect("endpoint")
    }

    #[rstest]
    #[case("The read operation Timed Out", TransportFailureKind::Timeout)]
    #[case("[Errno 111] Connection refused", TransportFailureKind::Socket)]
    #[case("getaddrinfo failed", TransportFailureKind::Socket)]
    #[case("SSL: CERTIFICATE_VERIFY_FAILED certificate verify failed", TransportFailureKind::ServerUntrusted)]
    #[case("tlsv1 alert unknown ca", TransportFailureKind::ServerUntrusted)]
    #[case("sslv3 alert bad certificate", TransportFailureKind::UserCertificate)]
    #[case("sslv3 alert certificate expired", TransportFailureKind::UserCertificate)]
    #[case("teapot", TransportFailureKind::Other)]
    fn classifies_transport_text(#[case] raw: &str, #[case] expected: TransportFailureKind) {
        let failure = TransportFailure::classify(&endpoint(), raw, Duration::from_secs(30));
        assert_eq!(failure.kind, expected);
    }

    #[rstest]
    fn unrecognised_text_passes_through() {
        let failure = TransportFailure::classify(&endpoint(), "teapot", Duration::from_secs(1));
        assert_eq!(failure.message, "teapot");
    }

    #[rstest]
    fn timeout_message_names_endpoint_and_deadline() {
        let failure = TransportFailure::classify(&endpoint(), "timed out", Duration::from_secs(30));
        assert_eq!(
            failure.message,
            "Timed out after 30 seconds waiting for https://am.example.net"
        );
    }

    #[rstest]
    fn kinds_follow_failure_shape() {
        let mismatch = CallFailure::Skipped(SkipReason::VersionMismatch {
            desired: 3,
            supported: vec![1, 2],
        });
        assert_eq!(mismatch.kind(), ErrorKind::VersionMismatch);
        assert_eq!(mismatch.to_string(), "skipped: does not speak AM API version 3 (supports 1, 2)");

        let reported = CallFailure::AmReported {
            geni_code: 12,
            am_type: Some(String::from("protogeni")),
            am_code: Some(7),
            output: Some(String::from("no such slice")),
        };
        assert_eq!(reported.kind(), ErrorKind::AmReportedError);
        assert_eq!(reported.code(), Some(12));
        assert_eq!(reported.to_string(), "error code 12 (protogeni 7): no such slice");
    }

    #[rstest]
    #[case(None, Some(7), "error code 2 (AM code 7): busy")]
    #[case(Some("sfa"), None, "error code 2 (sfa): busy")]
    #[case(None, None, "error code 2: busy")]
    fn am_detail_renders_whatever_was_reported(
        #[case] am_type: Option<&str>,
        #[case] am_code: Option<i64>,
        #[case] expected: &str,
    ) {
        let reported = CallFailure::AmReported {
            geni_code: 2,
            am_type: am_type.map(str::to_owned),
            am_code,
            output: Some(String::from("busy")),
        };
        assert_eq!(reported.to_string(), expected);
    }

    #[rstest]
    fn request_shape_skips_count_as_version_mismatches() {
        let rspec = CallFailure::Skipped(SkipReason::UnsupportedRspec {
            requested: String::from("GENI 3"),
            advertised: String::from("ProtoGENI 2"),
        });
        assert_eq!(rspec.kind(), ErrorKind::VersionMismatch);
        assert_eq!(
            rspec.to_string(),
            "skipped: does not advertise resource description format GENI 3 (available: ProtoGENI 2)"
        );

        let shape = CallFailure::Skipped(SkipReason::IncompatibleRequest {
            version: 2,
            detail: String::from("Status requires a slice URN"),
        });
        assert_eq!(shape.kind(), ErrorKind::VersionMismatch);
    }
}
