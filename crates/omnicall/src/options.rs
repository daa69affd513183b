//! Request option construction.
//!
//! Options are computed from the caller's intent, the operation, and the
//! negotiated version. Only options legal for that combination are set; in
//! relaxed mode an illegal option is passed through with a warning instead
//! of failing the call.

use std::collections::BTreeMap;

use omnicall_config::RspecFormat;
use serde_json::{Map, Value, json};

use crate::errors::OptionError;
use crate::negotiate::NegotiationMode;
use crate::operation::{Operation, OperationArgs, OperationClass};
use crate::timestamp::normalise_time;

/// Open map of wire option name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions(BTreeMap<String, Value>);

impl CallOptions {
    /// Sets an option, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Value of an option.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Option names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Wire form: a JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect::<Map<String, Value>>())
    }
}

/// What the caller wants from a call, independent of protocol version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallIntent {
    /// Let the aggregate act on the resources it can, rather than all or none.
    pub best_effort: bool,
    /// Requested end of the reservation.
    pub end_time: Option<String>,
    /// Requested start of the reservation.
    pub start_time: Option<String>,
    /// Explicit resource-description format.
    pub rspec_format: Option<RspecFormat>,
    /// Subject the caller is speaking for.
    pub speaking_for: Option<String>,
    /// Only advertise available resources.
    pub available_only: bool,
    /// Ask for a compressed advertisement.
    pub compressed: bool,
    /// Renew as long as possible when the requested time is refused.
    pub extend_alap: bool,
    /// Raw options applied last; these win over computed values.
    pub overrides: BTreeMap<String, Value>,
}

/// Options plus the warnings raised while building them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltOptions {
    /// Options to send.
    pub options: CallOptions,
    /// Operator-facing warnings.
    pub warnings: Vec<String>,
}

/// Whether `operation` accepts a resource-description version option.
#[must_use]
pub const fn takes_rspec_version(operation: Operation) -> bool {
    matches!(operation, Operation::ListResources | Operation::Describe)
}

/// Builds per-call options; performs no I/O.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptionBuilder {
    mode: NegotiationMode,
}

struct Draft {
    operation: Operation,
    version: u32,
    mode: NegotiationMode,
    built: BuiltOptions,
}

impl Draft {
    /// Sets `option` when legal; otherwise fails or warns according to mode.
    fn set(&mut self, legal: bool, option: &'static str, value: Value) -> Result<(), OptionError> {
        if !legal {
            if self.mode == NegotiationMode::Strict {
                return Err(OptionError::NotApplicable {
                    option,
                    operation: self.operation,
                    version: self.version,
                });
            }
            self.built.warnings.push(format!(
                "{option} is not supported by {} at AM API version {}; passing it anyway",
                self.operation, self.version
            ));
        }
        self.built.options.insert(option, value);
        Ok(())
    }
}

impl RequestOptionBuilder {
    /// Creates a builder for the given negotiation mode.
    #[must_use]
    pub const fn new(mode: NegotiationMode) -> Self {
        Self { mode }
    }

    /// Computes the options for one call.
    ///
    /// `advertised` lists the formats the endpoint can produce; it is only
    /// consulted when choosing a resource-description version.
    pub fn build(
        &self,
        operation: Operation,
        version: u32,
        intent: &CallIntent,
        args: &OperationArgs,
        advertised: &[RspecFormat],
    ) -> Result<BuiltOptions, OptionError> {
        let modern = version >= 3;
        let class = operation.class();
        let mut draft = Draft {
            operation,
            version,
            mode: self.mode,
            built: BuiltOptions::default(),
        };

        if intent.best_effort {
            let legal = modern && class == OperationClass::MultiResource;
            draft.set(legal, "geni_best_effort", Value::Bool(true))?;
        }
        if let Some(end_time) = &intent.end_time {
            let legal =
                modern && matches!(operation, Operation::Allocate | Operation::Provision);
            draft.set(legal, "geni_end_time", time_value("geni_end_time", end_time)?)?;
        }
        if let Some(start_time) = &intent.start_time {
            let legal = modern && operation == Operation::Allocate;
            draft.set(legal, "geni_start_time", time_value("geni_start_time", start_time)?)?;
        }
        self.rspec_version(&mut draft, intent, advertised)?;
        if intent.available_only {
            draft.set(
                operation == Operation::ListResources,
                "geni_available",
                Value::Bool(true),
            )?;
        }
        if intent.compressed {
            draft.set(
                operation == Operation::ListResources,
                "geni_compressed",
                Value::Bool(true),
            )?;
        }
        if operation == Operation::ListResources {
            if let Some(slice) = &args.slice_urn {
                draft.set(!modern, "geni_slice_urn", Value::String(slice.clone()))?;
            }
        }
        if intent.extend_alap {
            let legal = modern && operation == Operation::Renew;
            draft.set(legal, "geni_extend_alap", Value::Bool(true))?;
        }
        if modern && operation == Operation::Provision {
            if let Some(users) = &args.users {
                draft.set(true, "geni_users", users.clone())?;
            }
        }
        if let Some(subject) = &intent.speaking_for {
            draft.set(true, "geni_speaking_for", Value::String(subject.clone()))?;
        }
        for (name, value) in &intent.overrides {
            draft.built.options.insert(name.clone(), value.clone());
        }

        if version < 2 && operation != Operation::ListResources && !draft.built.options.is_empty() {
            let names = draft.built.options.names().collect::<Vec<_>>().join(", ");
            draft.built.warnings.push(format!(
                "AM API version 1 {operation} takes no options; dropping {names}"
            ));
        }
        Ok(draft.built)
    }

    fn rspec_version(
        &self,
        draft: &mut Draft,
        intent: &CallIntent,
        advertised: &[RspecFormat],
    ) -> Result<(), OptionError> {
        let key = if draft.version < 2 {
            "rspec_version"
        } else {
            "geni_rspec_version"
        };
        let applies = takes_rspec_version(draft.operation);

        if let Some(requested) = &intent.rspec_format {
            if applies
                && !advertised.is_empty()
                && !advertised.iter().any(|format| format.matches(requested))
            {
                let listed = advertised
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                if self.mode == NegotiationMode::Strict {
                    return Err(OptionError::UnadvertisedRspec {
                        requested: requested.to_string(),
                        advertised: listed,
                    });
                }
                draft.built.warnings.push(format!(
                    "resource description format {requested} is not advertised \
                     (available: {listed}); requesting it anyway"
                ));
            }
            return draft.set(applies, key, format_value(requested));
        }

        if !applies {
            return Ok(());
        }
        match advertised {
            [only] => draft.set(true, key, format_value(only)),
            [] => {
                draft
                    .built
                    .warnings
                    .push(String::from("aggregate advertises no resource description formats"));
                Ok(())
            }
            several => {
                let listed = several
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                draft.built.warnings.push(format!(
                    "aggregate advertises several resource description formats ({listed}); \
                     choose one to request a specific format"
                ));
                Ok(())
            }
        }
    }
}

fn time_value(option: &'static str, raw: &str) -> Result<Value, OptionError> {
    normalise_time(raw)
        .map(Value::String)
        .map_err(|reason| OptionError::InvalidTime {
            option,
            value: raw.to_owned(),
            reason,
        })
}

fn format_value(format: &RspecFormat) -> Value {
    json!({"type": format.kind, "version": format.version})
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn strict() -> RequestOptionBuilder {
        RequestOptionBuilder::new(NegotiationMode::Strict)
    }

    fn geni3() -> RspecFormat {
        RspecFormat::new("GENI", "3")
    }

    #[rstest]
    fn best_effort_is_legal_for_multi_resource_calls(strict: RequestOptionBuilder) {
        let intent = CallIntent {
            best_effort: true,
            ..CallIntent::default()
        };
        let built = strict
            .build(Operation::Renew, 3, &intent, &OperationArgs::default(), &[])
            .expect("options");
        assert_eq!(built.options.get("geni_best_effort"), Some(&Value::Bool(true)));
        assert!(built.warnings.is_empty());
    }

    #[rstest]
    #[case(Operation::ListResources, 3)]
    #[case(Operation::Renew, 2)]
    fn best_effort_elsewhere_is_rejected_in_strict_mode(
        strict: RequestOptionBuilder,
        #[case] operation: Operation,
        #[case] version: u32,
    ) {
        let intent = CallIntent {
            best_effort: true,
            ..CallIntent::default()
        };
        let error = strict
            .build(operation, version, &intent, &OperationArgs::default(), &[geni3()])
            .expect_err("must fail");
        assert_eq!(
            error,
            OptionError::NotApplicable {
                option: "geni_best_effort",
                operation,
                version,
            }
        );
    }

    #[rstest]
    fn relaxed_mode_passes_illegal_options_with_warning() {
        let builder = RequestOptionBuilder::new(NegotiationMode::Relaxed);
        let intent = CallIntent {
            start_time: Some(String::from("2026-04-01T00:00:00Z")),
            ..CallIntent::default()
        };
        let built = builder
            .build(Operation::Status, 3, &intent, &OperationArgs::default(), &[])
            .expect("options");
        assert_eq!(
            built.options.get("geni_start_time"),
            Some(&json!("2026-04-01T00:00:00Z"))
        );
        assert_eq!(built.warnings.len(), 1);
    }

    #[rstest]
    fn start_time_never_set_for_operations_that_do_not_accept_it(strict: RequestOptionBuilder) {
        let intent = CallIntent {
            start_time: Some(String::from("2026-04-01T00:00:00Z")),
            ..CallIntent::default()
        };
        assert!(
            strict
                .build(Operation::Provision, 3, &intent, &OperationArgs::default(), &[])
                .is_err()
        );
    }

    #[rstest]
    fn allocation_times_drop_sub_seconds(strict: RequestOptionBuilder) {
        let intent = CallIntent {
            end_time: Some(String::from("2026-04-01T12:00:00.75+01:00")),
            ..CallIntent::default()
        };
        let built = strict
            .build(Operation::Allocate, 3, &intent, &OperationArgs::default(), &[])
            .expect("options");
        assert_eq!(
            built.options.get("geni_end_time"),
            Some(&json!("2026-04-01T11:00:00Z"))
        );
    }

    #[rstest]
    fn unparseable_times_are_errors_even_when_relaxed() {
        let builder = RequestOptionBuilder::new(NegotiationMode::Relaxed);
        let intent = CallIntent {
            end_time: Some(String::from("next tuesday")),
            ..CallIntent::default()
        };
        assert!(matches!(
            builder.build(Operation::Allocate, 3, &intent, &OperationArgs::default(), &[]),
            Err(OptionError::InvalidTime { option: "geni_end_time", .. })
        ));
    }

    #[rstest]
    fn single_advertised_format_is_chosen(strict: RequestOptionBuilder) {
        let built = strict
            .build(
                Operation::ListResources,
                2,
                &CallIntent::default(),
                &OperationArgs::default(),
                &[geni3()],
            )
            .expect("options");
        assert_eq!(
            built.options.get("geni_rspec_version"),
            Some(&json!({"type": "GENI", "version": "3"}))
        );
    }

    #[rstest]
    fn ambiguous_formats_are_left_unset_with_warning(strict: RequestOptionBuilder) {
        let built = strict
            .build(
                Operation::ListResources,
                3,
                &CallIntent::default(),
                &OperationArgs::default(),
                &[geni3(), RspecFormat::new("ProtoGENI", "2")],
            )
            .expect("options");
        assert!(built.options.get("geni_rspec_version").is_none());
        assert_eq!(built.warnings.len(), 1);
    }

    #[rstest]
    fn explicit_format_uses_legacy_key_at_version_one(strict: RequestOptionBuilder) {
        let intent = CallIntent {
            rspec_format: Some(RspecFormat::new("ProtoGENI", "2")),
            ..CallIntent::default()
        };
        let built = strict
            .build(
                Operation::ListResources,
                1,
                &intent,
                &OperationArgs::default(),
                &[RspecFormat::new("protogeni", "2")],
            )
            .expect("options");
        assert!(built.options.get("rspec_version").is_some());
        assert!(built.options.get("geni_rspec_version").is_none());
    }

    #[rstest]
    fn unadvertised_explicit_format_is_rejected(strict: RequestOptionBuilder) {
        let intent = CallIntent {
            rspec_format: Some(RspecFormat::new("ProtoGENI", "2")),
            ..CallIntent::default()
        };
        assert!(matches!(
            strict.build(
                Operation::Describe,
                3,
                &intent,
                &OperationArgs::default(),
                &[geni3()],
            ),
            Err(OptionError::UnadvertisedRspec { .. })
        ));
    }

    #[rstest]
    fn slice_scoped_listing_uses_slice_option_before_version_three(strict: RequestOptionBuilder) {
        let args = OperationArgs::for_slice("urn:publicid:IDN+ch.geni.net:proj+slice+demo");
        let built = strict
            .build(Operation::ListResources, 2, &CallIntent::default(), &args, &[geni3()])
            .expect("options");
        assert_eq!(
            built.options.get("geni_slice_urn"),
            Some(&json!("urn:publicid:IDN+ch.geni.net:proj+slice+demo"))
        );
    }

    #[rstest]
    fn overrides_win_over_computed_values(strict: RequestOptionBuilder) {
        let mut intent = CallIntent {
            available_only: true,
            speaking_for: Some(String::from("urn:publicid:IDN+ch.geni.net+user+alice")),
            ..CallIntent::default()
        };
        intent
            .overrides
            .insert(String::from("geni_available"), Value::Bool(false));
        intent
            .overrides
            .insert(String::from("vendor_flag"), json!(7));
        let built = strict
            .build(
                Operation::ListResources,
                3,
                &intent,
                &OperationArgs::default(),
                &[geni3()],
            )
            .expect("options");
        assert_eq!(built.options.get("geni_available"), Some(&Value::Bool(false)));
        assert_eq!(built.options.get("vendor_flag"), Some(&json!(7)));
        assert!(built.options.get("geni_speaking_for").is_some());
    }
}
