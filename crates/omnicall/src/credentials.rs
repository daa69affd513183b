//! Credential supply and trust-proof recording.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::endpoint::Endpoint;

/// Authorisation token presented with mutating and slice-scoped calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Credential family, for example `geni_sfa`.
    pub cred_type: String,
    /// Version within the family.
    pub version: String,
    /// Signed credential document.
    pub value: String,
}

impl Credential {
    /// Wraps a signed document as an SFA credential.
    #[must_use]
    pub fn sfa(value: impl Into<String>) -> Self {
        Self {
            cred_type: String::from("geni_sfa"),
            version: String::from("3"),
            value: value.into(),
        }
    }

    /// Wire representation for the given protocol version.
    ///
    /// Versions 1 and 2 carry the bare document; version 3 onwards wraps it
    /// with its type and version.
    pub(crate) fn to_wire(&self, api_version: u32) -> Value {
        if api_version < 3 {
            Value::String(self.value.clone())
        } else {
            json!({
                "geni_type": self.cred_type,
                "geni_version": self.version,
                "geni_value": self.value,
            })
        }
    }
}

/// Error raised by a [`CredentialProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CredentialError {
    message: String,
}

impl CredentialError {
    /// Builds a credential error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Supplies credentials and stores trust proofs returned by aggregates.
pub trait CredentialProvider: Send + Sync {
    /// Returns the credential authorising calls against `subject_urn`.
    fn get_credential(&self, subject_urn: &str) -> Result<Credential, CredentialError>;

    /// Stores a trust proof returned alongside a reply.
    fn record_proof(&self, endpoint: &Endpoint, proof: &Value) -> Result<(), CredentialError>;
}

/// Provider for callers that only issue credential-free calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn get_credential(&self, subject_urn: &str) -> Result<Credential, CredentialError> {
        Err(CredentialError::new(format!(
            "no credential source configured for {subject_urn}"
        )))
    }

    fn record_proof(&self, _endpoint: &Endpoint, _proof: &Value) -> Result<(), CredentialError> {
        Ok(())
    }
}
