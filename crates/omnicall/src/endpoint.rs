//! Aggregate endpoint identity.

use std::fmt;

use omnicall_config::canonical_url;
use serde::{Deserialize, Serialize};

use crate::errors::ResolveError;

/// URN recorded for endpoints named only by URL.
pub const UNSPECIFIED_URN: &str = "unspecified_AM_URN";

/// Addressable aggregate manager.
///
/// Two endpoints are the same target when their canonical URLs match; the
/// URN and nickname are descriptive only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    urn: String,
    url: String,
    nickname: Option<String>,
    negotiated_version: Option<u32>,
}

impl Endpoint {
    /// Builds an endpoint after canonicalising its URL.
    ///
    /// An empty URN is replaced by [`UNSPECIFIED_URN`].
    pub fn new(urn: impl Into<String>, url: &str) -> Result<Self, ResolveError> {
        let canonical =
            canonical_url(url).map_err(|reason| ResolveError::invalid_url(url, reason))?;
        let raw_urn = urn.into();
        let trimmed = raw_urn.trim();
        Ok(Self {
            urn: if trimmed.is_empty() {
                String::from(UNSPECIFIED_URN)
            } else {
                trimmed.to_owned()
            },
            url: canonical,
            nickname: None,
            negotiated_version: None,
        })
    }

    /// Attaches the nickname the caller used for this endpoint.
    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Aggregate URN, or [`UNSPECIFIED_URN`].
    #[must_use]
    pub const fn urn(&self) -> &str {
        self.urn.as_str()
    }

    /// Canonical URL.
    #[must_use]
    pub const fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Nickname, when the endpoint was named by one.
    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Protocol version chosen for this endpoint, once negotiated.
    #[must_use]
    pub const fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }

    /// Whether both endpoints address the same URL.
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.url == other.url
    }

    pub(crate) fn at_version(&self, version: u32) -> Self {
        Self {
            negotiated_version: Some(version),
            ..self.clone()
        }
    }

    /// Copy of this endpoint addressed at an already canonical URL.
    pub(crate) fn redirected(&self, canonical: String, version: u32) -> Self {
        Self {
            url: canonical,
            negotiated_version: Some(version),
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(nickname) = &self.nickname {
            return write!(formatter, "{nickname} ({})", self.url);
        }
        formatter.write_str(&self.url)
    }
}
