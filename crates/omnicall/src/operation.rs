//! Operations, their per-version wire names, and positional argument shapes.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::credentials::Credential;
use crate::errors::OperationError;
use crate::options::CallOptions;
use crate::timestamp::normalise_time;

/// Logical operation issued against a set of aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Capability introspection.
    GetVersion,
    /// Resource advertisement, optionally scoped to a slice.
    ListResources,
    /// Manifest for slivers or a slice.
    Describe,
    /// Reserve resources for a slice.
    Allocate,
    /// Instantiate allocated resources.
    Provision,
    /// Start, stop, or restart provisioned resources.
    PerformOperationalAction,
    /// Extend the lifetime of resources.
    Renew,
    /// Report resource state.
    Status,
    /// Release resources.
    Delete,
    /// Emergency stop of a slice.
    Shutdown,
}

/// Broad behaviour class used for option legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Does not change aggregate state.
    ReadOnly,
    /// Reserves new resources.
    Allocation,
    /// Changes state across a set of resources.
    MultiResource,
    /// Acts on a whole slice at once.
    SliceWide,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::GetVersion,
        Self::ListResources,
        Self::Describe,
        Self::Allocate,
        Self::Provision,
        Self::PerformOperationalAction,
        Self::Renew,
        Self::Status,
        Self::Delete,
        Self::Shutdown,
    ];

    /// Canonical operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetVersion => "GetVersion",
            Self::ListResources => "ListResources",
            Self::Describe => "Describe",
            Self::Allocate => "Allocate",
            Self::Provision => "Provision",
            Self::PerformOperationalAction => "PerformOperationalAction",
            Self::Renew => "Renew",
            Self::Status => "Status",
            Self::Delete => "Delete",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Wire method name at `version`, or `None` where undefined.
    #[must_use]
    pub fn method_name(self, version: u32) -> Option<&'static str> {
        let legacy = version < 3;
        let name = match self {
            Self::GetVersion => "GetVersion",
            Self::ListResources => "ListResources",
            Self::Shutdown => "Shutdown",
            Self::Allocate if legacy => "CreateSliver",
            Self::Renew if legacy => "RenewSliver",
            Self::Status if legacy => "SliverStatus",
            Self::Delete if legacy => "DeleteSliver",
            Self::Describe | Self::Provision | Self::PerformOperationalAction if legacy => {
                return None;
            }
            other => other.as_str(),
        };
        (version >= 1).then_some(name)
    }

    /// Behaviour class.
    #[must_use]
    pub const fn class(self) -> OperationClass {
        match self {
            Self::GetVersion | Self::ListResources | Self::Describe | Self::Status => {
                OperationClass::ReadOnly
            }
            Self::Allocate => OperationClass::Allocation,
            Self::Provision | Self::PerformOperationalAction | Self::Renew | Self::Delete => {
                OperationClass::MultiResource
            }
            Self::Shutdown => OperationClass::SliceWide,
        }
    }

    /// Whether a many-endpoint invocation may change the requested version.
    #[must_use]
    pub fn reconciles_fleet(self) -> bool {
        self != Self::GetVersion && self.class() == OperationClass::ReadOnly
    }

    /// Whether results are compared against requested sliver URNs.
    #[must_use]
    pub const fn reports_resources(self) -> bool {
        !matches!(self, Self::GetVersion | Self::ListResources | Self::Shutdown)
    }

    /// Checks that `args` carry what the operation needs at `version`.
    pub fn validate(self, version: u32, args: &OperationArgs) -> Result<(), OperationError> {
        if self.method_name(version).is_none() {
            return Err(OperationError::Unavailable {
                operation: self,
                version,
            });
        }
        let missing = |argument| OperationError::MissingArgument {
            operation: self,
            argument,
        };
        let sliver_scoped = version >= 3 && self.class() != OperationClass::SliceWide;
        match self {
            Self::GetVersion | Self::ListResources => {}
            Self::Allocate => {
                args.slice_urn.as_ref().ok_or_else(|| missing("a slice URN"))?;
                args.rspec.as_ref().ok_or_else(|| missing("a request rspec"))?;
            }
            _ if sliver_scoped => {
                if args.slice_urn.is_none() && args.sliver_urns.is_empty() {
                    return Err(missing("a slice or sliver URNs"));
                }
            }
            _ => {
                args.slice_urn.as_ref().ok_or_else(|| missing("a slice URN"))?;
            }
        }
        if self == Self::Renew {
            args.expiration
                .as_ref()
                .ok_or_else(|| missing("an expiration time"))?;
        }
        if self == Self::PerformOperationalAction {
            args.action.as_ref().ok_or_else(|| missing("an action"))?;
        }
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = OperationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let key: String = input
            .trim()
            .chars()
            .filter(|character| !matches!(character, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        let operation = match key.as_str() {
            "getversion" => Self::GetVersion,
            "listresources" => Self::ListResources,
            "describe" => Self::Describe,
            "allocate" | "createsliver" => Self::Allocate,
            "provision" => Self::Provision,
            "performoperationalaction" | "poa" => Self::PerformOperationalAction,
            "renew" | "renewsliver" => Self::Renew,
            "status" | "sliverstatus" => Self::Status,
            "delete" | "deletesliver" => Self::Delete,
            "shutdown" => Self::Shutdown,
            _ => return Err(OperationError::UnknownOperation(input.to_owned())),
        };
        Ok(operation)
    }
}

/// Caller-supplied arguments for an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationArgs {
    /// Slice the operation applies to.
    pub slice_urn: Option<String>,
    /// Individual slivers; also the resources results are checked against.
    pub sliver_urns: Vec<String>,
    /// Request rspec document for allocation.
    pub rspec: Option<String>,
    /// Users and keys to install, when allocating or provisioning.
    pub users: Option<Value>,
    /// Requested new expiry for renewals.
    pub expiration: Option<String>,
    /// Operational action name.
    pub action: Option<String>,
}

impl OperationArgs {
    /// Arguments naming a slice.
    #[must_use]
    pub fn for_slice(slice_urn: impl Into<String>) -> Self {
        Self {
            slice_urn: Some(slice_urn.into()),
            ..Self::default()
        }
    }

    /// Adds sliver URNs.
    #[must_use]
    pub fn with_slivers<I, S>(mut self, slivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sliver_urns.extend(slivers.into_iter().map(Into::into));
        self
    }

    /// Resources the caller asked about; empty means the whole collection.
    #[must_use]
    pub fn requested_resources(&self) -> &[String] {
        &self.sliver_urns
    }

    fn target_urns(&self) -> Vec<Value> {
        if self.sliver_urns.is_empty() {
            self.slice_urn.iter().cloned().map(Value::String).collect()
        } else {
            self.sliver_urns.iter().cloned().map(Value::String).collect()
        }
    }
}

/// Method name and positional arguments ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    /// Wire method name.
    pub method: &'static str,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Shapes the positional arguments for `operation` at `version`.
///
/// Version 1 methods other than `ListResources` take no options argument.
pub fn prepare_call(
    operation: Operation,
    version: u32,
    args: &OperationArgs,
    credentials: &[Credential],
    options: CallOptions,
) -> Result<PreparedCall, OperationError> {
    operation.validate(version, args)?;
    let method = operation
        .method_name(version)
        .ok_or(OperationError::Unavailable { operation, version })?;

    let wire_credentials = Value::Array(
        credentials
            .iter()
            .map(|credential| credential.to_wire(version))
            .collect(),
    );
    let slice = || Value::String(args.slice_urn.clone().unwrap_or_default());
    let modern = version >= 3;

    let mut positional = match operation {
        Operation::GetVersion => Vec::new(),
        Operation::ListResources => vec![wire_credentials],
        Operation::Allocate if modern => vec![
            slice(),
            wire_credentials,
            Value::String(args.rspec.clone().unwrap_or_default()),
        ],
        Operation::Allocate => vec![
            slice(),
            wire_credentials,
            Value::String(args.rspec.clone().unwrap_or_default()),
            args.users.clone().unwrap_or_else(|| Value::Array(Vec::new())),
        ],
        Operation::Renew => {
            let raw = args.expiration.as_deref().unwrap_or_default();
            let expiration = normalise_time(raw).map_err(|reason| OperationError::InvalidArgument {
                operation,
                argument: "expiration",
                reason,
            })?;
            let target = if modern {
                Value::Array(args.target_urns())
            } else {
                slice()
            };
            vec![target, wire_credentials, Value::String(expiration)]
        }
        Operation::PerformOperationalAction => vec![
            Value::Array(args.target_urns()),
            wire_credentials,
            Value::String(args.action.clone().unwrap_or_default()),
        ],
        Operation::Shutdown => vec![slice(), wire_credentials],
        Operation::Describe
        | Operation::Provision
        | Operation::Status
        | Operation::Delete => {
            if modern {
                vec![Value::Array(args.target_urns()), wire_credentials]
            } else {
                vec![slice(), wire_credentials]
            }
        }
    };

    let takes_options = match operation {
        Operation::GetVersion => modern,
        Operation::ListResources => true,
        _ => version >= 2,
    };
    if takes_options {
        positional.push(options.into_value());
    }

    Ok(PreparedCall {
        method,
        args: positional,
    })
}
