//! Capability snapshots parsed from GetVersion replies.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use omnicall_config::RspecFormat;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

use crate::errors::CapabilityError;

const CAPABILITY_TARGET: &str = "omnicall::capability";

/// How an aggregate allows resources to be allocated within a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStyle {
    /// One allocation per slice.
    #[default]
    Single,
    /// Several allocations, each covering disjoint resources.
    Disjoint,
    /// Any number of allocations.
    Many,
}

impl AllocationStyle {
    fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "geni_single" => Some(Self::Single),
            "geni_disjoint" => Some(Self::Disjoint),
            "geni_many" => Some(Self::Many),
            _ => None,
        }
    }
}

impl fmt::Display for AllocationStyle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Single => "geni_single",
            Self::Disjoint => "geni_disjoint",
            Self::Many => "geni_many",
        };
        formatter.write_str(label)
    }
}

/// Credential family an aggregate accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialType {
    /// Family name, for example `geni_sfa`.
    pub kind: String,
    /// Version within the family.
    pub version: String,
}

/// What an aggregate claims to support, as of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    /// Version the aggregate speaks at the probed URL.
    pub primary_version: u32,
    /// Other versions the aggregate serves, keyed by version.
    pub other_versions: BTreeMap<u32, String>,
    /// Advertisement formats the aggregate can produce.
    pub ad_formats: Vec<RspecFormat>,
    /// Request formats the aggregate accepts.
    pub request_formats: Vec<RspecFormat>,
    /// Credential families the aggregate accepts.
    pub credential_types: Vec<CredentialType>,
    /// Whether every sliver in a slice must be handled together.
    pub single_allocation: bool,
    /// Allocation style.
    pub allocation_style: AllocationStyle,
    /// When the snapshot was fetched.
    pub fetched_at: OffsetDateTime,
    /// Error from the most recent failed probe, if any.
    pub last_error: Option<String>,
}

impl CapabilitySnapshot {
    /// Interprets a capability map.
    ///
    /// The map must name a primary version under `geni_api`; every other key
    /// is optional and silently ignored when malformed.
    pub fn from_capabilities(
        capabilities: &Value,
        fetched_at: OffsetDateTime,
    ) -> Result<Self, CapabilityError> {
        let map = capabilities.as_object().ok_or(CapabilityError::NotAMap)?;
        let primary_version = map
            .get("geni_api")
            .and_then(version_number)
            .ok_or(CapabilityError::MissingApiVersion)?;

        Ok(Self {
            primary_version,
            other_versions: other_versions(map),
            ad_formats: formats(map, &["geni_ad_rspec_versions", "ad_rspec_versions"]),
            request_formats: formats(
                map,
                &["geni_request_rspec_versions", "request_rspec_versions"],
            ),
            credential_types: credential_types(map),
            single_allocation: map.get("geni_single_allocation").is_some_and(truthy),
            allocation_style: map
                .get("geni_allocate")
                .and_then(Value::as_str)
                .and_then(AllocationStyle::from_wire)
                .unwrap_or_default(),
            fetched_at,
            last_error: None,
        })
    }

    /// Versions the aggregate speaks at any URL, including the primary.
    #[must_use]
    pub fn supported_versions(&self) -> BTreeSet<u32> {
        let mut versions: BTreeSet<u32> = self.other_versions.keys().copied().collect();
        versions.insert(self.primary_version);
        versions
    }

    /// Whether the aggregate speaks `version` at any URL.
    #[must_use]
    pub fn supports(&self, version: u32) -> bool {
        self.primary_version == version || self.other_versions.contains_key(&version)
    }

    /// URL advertised for `version`, if any.
    #[must_use]
    pub fn url_for(&self, version: u32) -> Option<&str> {
        self.other_versions.get(&version).map(String::as_str)
    }

    /// Whether the snapshot may be served without re-probing.
    ///
    /// Snapshots carrying an error are always stale.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration, now: OffsetDateTime) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let age = now - self.fetched_at;
        age.is_negative() || age.unsigned_abs() <= max_age
    }
}

/// Locates the capability map inside a raw GetVersion reply.
///
/// Version 2 and later wrap the map in an envelope whose `value` carries the
/// detail; version 1 replies are the map itself.
pub fn capabilities_from_reply(reply: &Value) -> Result<&Value, CapabilityError> {
    let map = reply.as_object().ok_or(CapabilityError::NotAMap)?;
    if let Some(envelope_code) = map.get("code").and_then(Value::as_object) {
        let reported = envelope_code.get("geni_code").and_then(Value::as_i64);
        if let Some(geni_code) = reported.filter(|code| *code != 0) {
            let output = map
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            return Err(CapabilityError::Reported {
                code: geni_code,
                output,
            });
        }
    }
    match map.get("value") {
        Some(value) if value.get("geni_api").is_some() => Ok(value),
        _ if map.contains_key("geni_api") => Ok(reply),
        _ => Err(CapabilityError::MissingApiVersion),
    }
}

fn version_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|raw| u32::try_from(raw).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|raw| raw != 0),
        Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

fn other_versions(map: &Map<String, Value>) -> BTreeMap<u32, String> {
    let Some(advertised) = map.get("geni_api_versions").and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    advertised
        .iter()
        .filter_map(|(key, url)| {
            let version = key.trim().parse::<u32>().ok();
            let url = url.as_str().map(str::trim).filter(|url| !url.is_empty());
            if version.is_none() || url.is_none() {
                debug!(
                    target: CAPABILITY_TARGET,
                    key = key.as_str(),
                    "ignoring malformed geni_api_versions entry"
                );
            }
            Some((version?, url?.to_owned()))
        })
        .collect()
}

fn formats(map: &Map<String, Value>, keys: &[&str]) -> Vec<RspecFormat> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let kind = scalar_text(entry.get("type")?)?;
                    let version = scalar_text(entry.get("version")?)?;
                    Some(RspecFormat::new(kind, version))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn credential_types(map: &Map<String, Value>) -> Vec<CredentialType> {
    map.get("geni_credential_types")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(CredentialType {
                        kind: scalar_text(entry.get("geni_type")?)?,
                        version: scalar_text(entry.get("geni_version")?)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000)
    }

    #[expect(clippy::indexing_slicing, reason = "lengths are fixed by the fixture")]
    #[rstest]
    fn parses_full_capability_map() {
        let reply = json!({
            "geni_api": 2,
            "geni_api_versions": {
                "2": "https://am.example.net/am/2.0",
                "3": "https://am.example.net/am/3.0",
                "x": "https://ignored",
            },
            "geni_ad_rspec_versions": [{"type": "GENI", "version": "3"}],
            "geni_request_rspec_versions": [
                {"type": "GENI", "version": 3},
                {"type": "ProtoGENI", "version": "2"},
            ],
            "geni_credential_types": [{"geni_type": "geni_sfa", "geni_version": 3}],
            "geni_single_allocation": 1,
            "geni_allocate": "geni_many",
        });

        let snapshot = CapabilitySnapshot::from_capabilities(&reply, now()).expect("snapshot");

        assert_eq!(snapshot.primary_version, 2);
        assert_eq!(snapshot.other_versions.len(), 2);
        assert_eq!(snapshot.url_for(3), Some("https://am.example.net/am/3.0"));
        assert_eq!(snapshot.ad_formats, vec![RspecFormat::new("GENI", "3")]);
        assert_eq!(snapshot.request_formats.len(), 2);
        assert_eq!(snapshot.credential_types[0].version, "3");
        assert!(snapshot.single_allocation);
        assert_eq!(snapshot.allocation_style, AllocationStyle::Many);
        assert_eq!(
            snapshot.supported_versions().into_iter().collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[rstest]
    fn accepts_legacy_keys_and_string_versions() {
        let reply = json!({
            "geni_api": "1",
            "ad_rspec_versions": [{"type": "ProtoGENI", "version": "2"}],
        });
        let snapshot = CapabilitySnapshot::from_capabilities(&reply, now()).expect("snapshot");
        assert_eq!(snapshot.primary_version, 1);
        assert_eq!(snapshot.ad_formats, vec![RspecFormat::new("ProtoGENI", "2")]);
        assert_eq!(snapshot.allocation_style, AllocationStyle::Single);
    }

    #[rstest]
    #[case(json!([1, 2]), CapabilityError::NotAMap)]
    #[case(json!({"geni_api_versions": {}}), CapabilityError::MissingApiVersion)]
    #[case(json!({"geni_api": "two"}), CapabilityError::MissingApiVersion)]
    fn rejects_malformed_maps(#[case] reply: Value, #[case] expected: CapabilityError) {
        assert_eq!(
            CapabilitySnapshot::from_capabilities(&reply, now()),
            Err(expected)
        );
    }

    #[rstest]
    fn unwraps_enveloped_replies() {
        let reply = json!({
            "geni_api": 2,
            "code": {"geni_code": 0},
            "value": {"geni_api": 2, "geni_api_versions": {"2": "https://am"}},
            "output": "",
        });
        let capabilities = capabilities_from_reply(&reply).expect("capabilities");
        assert!(capabilities.get("geni_api_versions").is_some());
    }

    #[rstest]
    fn reported_probe_errors_are_failures() {
        let reply = json!({"code": {"geni_code": 5}, "value": null, "output": "busy"});
        assert_eq!(
            capabilities_from_reply(&reply),
            Err(CapabilityError::Reported {
                code: 5,
                output: String::from("busy"),
            })
        );
    }

    #[rstest]
    fn errored_snapshots_are_never_fresh() {
        let reply = json!({"geni_api": 2});
        let mut snapshot = CapabilitySnapshot::from_capabilities(&reply, now()).expect("snapshot");
        let max_age = Duration::from_secs(60);
        assert!(snapshot.is_fresh(max_age, now() + time::Duration::seconds(30)));
        assert!(!snapshot.is_fresh(max_age, now() + time::Duration::seconds(61)));

        snapshot.last_error = Some(String::from("timed out"));
        assert!(!snapshot.is_fresh(max_age, now()));
    }
}
