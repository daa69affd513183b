//! Aggregate nicknames.
//!
//! Nicknames map short operator-chosen names to an aggregate's URN and URL.
//! The table also answers reverse lookups by URL or URN so that results can
//! be labelled with the name the operator knows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors produced when parsing [`NicknameDirective`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NicknameDirectiveParseError {
    /// The `=` separating the nickname from its target was missing.
    #[error("nickname directive '{0}' is missing the assignment '='")]
    MissingAssignment(String),
    /// The `,` separating the URN from the URL was missing.
    #[error("nickname directive '{0}' is missing the ',' between URN and URL")]
    MissingUrl(String),
    /// The nickname itself was blank.
    #[error("nickname directive '{0}' has an empty nickname")]
    EmptyNickname(String),
    /// The URL could not be parsed or is not HTTP(S).
    #[error("nickname directive '{directive}' has an invalid URL: {reason}")]
    InvalidUrl {
        /// Directive being parsed.
        directive: String,
        /// Why the URL was rejected.
        reason: String,
    },
}

/// Declarative `nickname=urn,url` binding for an aggregate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NicknameDirective {
    /// Short name used on the command line.
    pub nickname: String,
    /// Aggregate URN; may be empty when unknown.
    pub urn: String,
    /// Aggregate URL.
    pub url: String,
}

impl NicknameDirective {
    /// Creates a new directive.
    #[must_use]
    pub fn new(
        nickname: impl Into<String>,
        urn: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            urn: urn.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for NicknameDirective {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={},{}", self.nickname, self.urn, self.url)
    }
}

impl FromStr for NicknameDirective {
    type Err = NicknameDirectiveParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (nickname, rest) = input
            .split_once('=')
            .ok_or_else(|| NicknameDirectiveParseError::MissingAssignment(input.to_owned()))?;
        let (urn, url) = rest
            .split_once(',')
            .ok_or_else(|| NicknameDirectiveParseError::MissingUrl(input.to_owned()))?;
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(NicknameDirectiveParseError::EmptyNickname(input.to_owned()));
        }
        let url = url.trim();
        canonical_url(url).map_err(|reason| NicknameDirectiveParseError::InvalidUrl {
            directive: input.to_owned(),
            reason,
        })?;
        Ok(Self::new(nickname, urn.trim(), url))
    }
}

/// Target of a nickname.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NicknameEntry {
    /// Aggregate URN; empty when the directive did not name one.
    pub urn: String,
    /// Aggregate URL as written in the directive.
    pub url: String,
}

/// Nicknames grouped for lookup by name, URL, or URN.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NicknameTable {
    /// Entries keyed by lower-cased nickname.
    #[serde(default)]
    pub entries: BTreeMap<String, NicknameEntry>,
}

impl NicknameTable {
    /// Builds a table from directives; later directives replace earlier ones.
    #[must_use]
    pub fn from_directives<'a, I>(directives: I) -> Self
    where
        I: IntoIterator<Item = &'a NicknameDirective>,
    {
        let mut table = Self::default();
        for directive in directives {
            table.insert(
                directive.nickname.as_str(),
                directive.urn.as_str(),
                directive.url.as_str(),
            );
        }
        table
    }

    /// Stores or replaces a nickname.
    pub fn insert(&mut self, nickname: &str, urn: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(
            normalise_key(nickname),
            NicknameEntry {
                urn: urn.into(),
                url: url.into(),
            },
        );
    }

    /// Looks a nickname up, ignoring case.
    #[must_use]
    pub fn lookup(&self, nickname: &str) -> Option<&NicknameEntry> {
        self.entries.get(&normalise_key(nickname))
    }

    /// Finds the nickname bound to a URL, comparing canonical forms.
    #[must_use]
    pub fn find_by_url(&self, url: &str) -> Option<(&str, &NicknameEntry)> {
        let wanted = canonical_url(url).ok()?;
        self.entries
            .iter()
            .find(|(_, entry)| canonical_url(&entry.url).is_ok_and(|candidate| candidate == wanted))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Finds the first nickname whose URN names the same authority.
    #[must_use]
    pub fn find_by_urn(&self, urn: &str) -> Option<(&str, &NicknameEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| !entry.urn.is_empty() && same_authority(&entry.urn, urn))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Whether the table holds no nicknames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical form of an aggregate URL used for identity comparisons.
///
/// Scheme and host are lower-cased, default ports dropped, and a trailing
/// `/` removed. Only `http` and `https` URLs are accepted.
pub fn canonical_url(input: &str) -> Result<String, String> {
    let parsed = Url::parse(input.trim()).map_err(|error| error.to_string())?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{other}'")),
    }
    if parsed.host_str().is_none() {
        return Err(String::from("missing host"));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_owned())
}

/// Whether two URNs name the same aggregate authority.
///
/// Component managers and aggregate managers of one authority are published
/// with `+authority+cm` and `+authority+am` suffixes interchangeably.
#[must_use]
pub fn same_authority(left: &str, right: &str) -> bool {
    authority_key(left) == authority_key(right)
}

fn authority_key(urn: &str) -> String {
    let lowered = urn.trim().to_ascii_lowercase();
    for suffix in ["+authority+am", "+authority+cm"] {
        if let Some(stem) = lowered.strip_suffix(suffix) {
            return stem.to_owned();
        }
    }
    lowered
}

fn normalise_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
