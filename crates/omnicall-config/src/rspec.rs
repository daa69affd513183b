//! Resource-description format descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a resource-description format cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("resource description format '{0}' must look like TYPE:VERSION")]
pub struct RspecFormatParseError(String);

/// Resource-description (RSpec) format as a type and version pair.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct RspecFormat {
    /// Format family, for example `GENI` or `ProtoGENI`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Version within the family, for example `3`.
    pub version: String,
}

impl RspecFormat {
    /// Creates a format descriptor.
    #[must_use]
    pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: version.into(),
        }
    }

    /// Case-insensitive comparison of type and version.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.kind.eq_ignore_ascii_case(&other.kind)
            && self.version.eq_ignore_ascii_case(&other.version)
    }
}

impl fmt::Display for RspecFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.kind, self.version)
    }
}

impl FromStr for RspecFormat {
    type Err = RspecFormatParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (kind, version) = trimmed
            .split_once(':')
            .or_else(|| trimmed.split_once(char::is_whitespace))
            .ok_or_else(|| RspecFormatParseError(input.to_owned()))?;
        let (kind, version) = (kind.trim(), version.trim());
        if kind.is_empty() || version.is_empty() {
            return Err(RspecFormatParseError(input.to_owned()));
        }
        Ok(Self::new(kind, version))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("GENI:3")]
    #[case("GENI 3")]
    #[case(" geni : 3 ")]
    fn parses_type_and_version(#[case] input: &str) {
        let format: RspecFormat = input.parse().expect("format should parse");
        assert!(format.matches(&RspecFormat::new("GENI", "3")));
    }

    #[rstest]
    #[case("GENI")]
    #[case(":3")]
    #[case("")]
    fn rejects_incomplete_formats(#[case] input: &str) {
        assert!(input.parse::<RspecFormat>().is_err());
    }
}
