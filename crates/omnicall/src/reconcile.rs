//! Per-resource reconciliation of multi-resource replies.
//!
//! A reply names the slivers the aggregate acted on. Comparing those records
//! against what the caller asked for yields the resources that went missing,
//! the ones that reported an error, and an overall [`OutcomeClass`].

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

/// Keys under which a reply may carry its resource list.
const RECORD_KEYS: [&str; 2] = ["geni_slivers", "geni_resources"];

/// Allocation state of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationState {
    /// Not (or no longer) reserved.
    Unallocated,
    /// Reserved but not instantiated.
    Allocated,
    /// Instantiated.
    Provisioned,
    /// The aggregate did not say.
    Unreported,
    /// A state this client does not know.
    Other(String),
}

impl AllocationState {
    fn parse(raw: Option<&str>) -> Self {
        let Some(reported) = raw else {
            return Self::Unreported;
        };
        match strip_prefix(reported).as_str() {
            "unallocated" => Self::Unallocated,
            "allocated" => Self::Allocated,
            "provisioned" => Self::Provisioned,
            "" => Self::Unreported,
            _ => Self::Other(reported.to_owned()),
        }
    }
}

/// Operational state of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationalState {
    /// Up and usable.
    Ready,
    /// Instantiated but not usable.
    NotReady,
    /// Being set up.
    Configuring,
    /// Broken.
    Failed,
    /// The aggregate does not know.
    Unknown,
    /// A state this client does not know.
    Other(String),
}

impl OperationalState {
    fn parse(raw: &str) -> Self {
        match strip_prefix(raw).as_str() {
            "ready" => Self::Ready,
            "notready" | "not_ready" => Self::NotReady,
            "configuring" | "changing" => Self::Configuring,
            "failed" => Self::Failed,
            "unknown" => Self::Unknown,
            _ => Self::Other(raw.to_owned()),
        }
    }
}

fn strip_prefix(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered
        .strip_prefix("geni_")
        .map_or_else(|| lowered.clone(), str::to_owned)
}

/// One resource as reported by an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Sliver URN.
    pub identifier_urn: String,
    /// Allocation state.
    pub allocation_state: AllocationState,
    /// Operational state, when reported.
    pub operational_state: Option<OperationalState>,
    /// Expiration as reported.
    pub expires_at: Option<String>,
    /// Per-resource error text, when non-empty.
    pub error: Option<String>,
}

impl ResourceRecord {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let identifier_urn = text(map, "geni_sliver_urn").or_else(|| text(map, "geni_urn"))?;
        let operational_state = text(map, "geni_operational_status")
            .or_else(|| text(map, "geni_status"))
            .map(|raw| OperationalState::parse(&raw));
        Some(Self {
            identifier_urn,
            allocation_state: AllocationState::parse(
                text(map, "geni_allocation_status").as_deref(),
            ),
            operational_state,
            expires_at: text(map, "geni_expires"),
            error: text(map, "geni_error"),
        })
    }
}

/// Trimmed string at `key`, when present and non-empty.
pub(crate) fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// How an endpoint's call turned out once resources are accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeClass {
    /// Every requested resource came back without error.
    Success,
    /// A value came back, but some resources are missing or failed.
    PartialSuccess,
    /// No usable value came back.
    Failure,
}

/// Result of comparing a reply with the requested resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Records found in the reply.
    pub records: Vec<ResourceRecord>,
    /// Requested identifiers absent from the reply, in request order.
    pub missing: Vec<String>,
    /// Identifiers that reported an error, with the error text.
    pub failed: BTreeMap<String, String>,
    /// Overall class.
    pub class: OutcomeClass,
}

/// Reconciles a normalised `value` against `requested` sliver URNs.
///
/// An empty `requested` list means the whole collection was asked about, so
/// nothing can be missing. A null, absent, or `false` value is a failure.
#[must_use]
pub fn reconcile(value: Option<&Value>, requested: &[String]) -> Reconciliation {
    let Some(body) = value.filter(|candidate| !matches!(candidate, Value::Null | Value::Bool(false)))
    else {
        return Reconciliation {
            records: Vec::new(),
            missing: Vec::new(),
            failed: BTreeMap::new(),
            class: OutcomeClass::Failure,
        };
    };

    let records: Vec<ResourceRecord> = record_values(body)
        .iter()
        .filter_map(ResourceRecord::from_value)
        .collect();
    let returned: BTreeSet<&str> = records
        .iter()
        .map(|record| record.identifier_urn.as_str())
        .collect();

    let mut seen = BTreeSet::new();
    let missing: Vec<String> = requested
        .iter()
        .filter(|urn| !returned.contains(urn.as_str()))
        .filter(|urn| seen.insert(urn.as_str()))
        .cloned()
        .collect();
    let failed: BTreeMap<String, String> = records
        .iter()
        .filter_map(|record| {
            record
                .error
                .as_ref()
                .map(|error| (record.identifier_urn.clone(), error.clone()))
        })
        .collect();

    let class = if missing.is_empty() && failed.is_empty() {
        OutcomeClass::Success
    } else {
        OutcomeClass::PartialSuccess
    };
    Reconciliation {
        records,
        missing,
        failed,
        class,
    }
}

fn record_values(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => RECORD_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    }
}
