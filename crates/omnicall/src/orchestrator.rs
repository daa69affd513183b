//! End-to-end execution of one logical operation.
//!
//! An [`Orchestrator`] is built once per process and owns the version cache
//! and the collaborator handles. Each [`Orchestrator::run`] resolves
//! endpoints, optionally reconciles the fleet-wide version, fans the call
//! out, and folds the replies into an [`OperationOutcome`].

use std::sync::Arc;
use std::time::Duration;

use omnicall_config::{Config, NicknameTable, RspecFormat};
use tracing::{info, warn};

use crate::aggregate::{OperationOutcome, ResultAggregator};
use crate::cache::VersionCache;
use crate::credentials::{Credential, CredentialProvider};
use crate::dispatch::{CallPlanner, Dispatcher, PlannedCall};
use crate::errors::{OperationError, OptionError, OrchestrationError};
use crate::failure::SkipReason;
use crate::negotiate::{Negotiated, NegotiationMode, Negotiator};
use crate::normalize::ResponseNormalizer;
use crate::operation::{Operation, OperationArgs, prepare_call};
use crate::options::{CallIntent, RequestOptionBuilder, takes_rspec_version};
use crate::probe::{CapabilityProber, ProbeSettings};
use crate::resolver::{AggregateRegistry, EndpointResolver};
use crate::transport::{AbortSignal, Transport};

const ORCHESTRATE_TARGET: &str = "omnicall::orchestrate";

/// One logical operation as requested by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Operation to issue.
    pub operation: Operation,
    /// Endpoint identifiers; empty falls back to configured defaults.
    pub endpoints: Vec<String>,
    /// Positional arguments.
    pub args: OperationArgs,
    /// Option intent.
    pub intent: CallIntent,
    /// Version to ask for; `None` uses the configured version.
    pub api_version: Option<u32>,
    /// Whether `api_version` was requested emphatically.
    pub explicit_version: bool,
    /// Subject whose credential authorises the call; defaults to the slice.
    pub subject_urn: Option<String>,
}

impl OperationRequest {
    /// Request for `operation` with no arguments.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            endpoints: Vec::new(),
            args: OperationArgs::default(),
            intent: CallIntent::default(),
            api_version: None,
            explicit_version: false,
            subject_urn: None,
        }
    }

    /// Targets the given endpoint identifiers.
    #[must_use]
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: OperationArgs) -> Self {
        self.args = args;
        self
    }

    /// Sets the option intent.
    #[must_use]
    pub fn with_intent(mut self, intent: CallIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Asks for `version`; `explicit` makes overriding it warn.
    #[must_use]
    pub const fn at_version(mut self, version: u32, explicit: bool) -> Self {
        self.api_version = Some(version);
        self.explicit_version = explicit;
        self
    }

    /// Requests credentials for `subject_urn` instead of the slice.
    #[must_use]
    pub fn speaking_as(mut self, subject_urn: impl Into<String>) -> Self {
        self.subject_urn = Some(subject_urn.into());
        self
    }

    fn credential_subject(&self) -> String {
        self.subject_urn
            .clone()
            .or_else(|| self.args.slice_urn.clone())
            .unwrap_or_default()
    }
}

/// Engine knobs derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Version asked for when a request names none.
    pub api_version: u32,
    /// Whether the configured version was requested emphatically.
    pub explicit_api_version: bool,
    /// Strict or relaxed negotiation.
    pub mode: NegotiationMode,
    /// Probe cache and timeout settings.
    pub probe: ProbeSettings,
    /// Re-probe every endpoint once per invocation.
    pub force_refresh: bool,
    /// Timeout attached to every call.
    pub call_timeout: Duration,
    /// Endpoints contacted concurrently.
    pub worker_limit: usize,
    /// Resource-description format used when a request names none.
    pub preferred_rspec: Option<RspecFormat>,
}

impl EngineSettings {
    /// Settings implied by `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_version: config.api_version,
            explicit_api_version: config.explicit_api_version,
            mode: NegotiationMode::from_developer_mode(config.developer_mode),
            probe: ProbeSettings {
                max_age: config.version_cache_max_age(),
                use_cache: !config.no_version_cache,
                timeout: config.probe_timeout(),
            },
            force_refresh: config.force_refresh,
            call_timeout: config.call_timeout(),
            worker_limit: config.worker_limit(),
            preferred_rspec: config.preferred_rspec.clone(),
        }
    }
}

/// Runs operations against sets of aggregates.
pub struct Orchestrator {
    settings: EngineSettings,
    nicknames: NicknameTable,
    defaults: Vec<String>,
    cache: VersionCache,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    registry: Option<Arc<dyn AggregateRegistry>>,
}

impl Orchestrator {
    /// Creates an orchestrator with no nicknames or default aggregates.
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        cache: VersionCache,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            settings,
            nicknames: NicknameTable::default(),
            defaults: Vec::new(),
            cache,
            transport,
            credentials,
            registry: None,
        }
    }

    /// Creates an orchestrator from merged configuration.
    #[must_use]
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let cache = VersionCache::open(config.version_cache_path().as_std_path());
        Self::new(EngineSettings::from_config(config), cache, transport, credentials)
            .with_nicknames(config.nickname_table())
            .with_defaults(config.default_aggregates.clone())
    }

    /// Replaces the nickname table.
    #[must_use]
    pub fn with_nicknames(mut self, nicknames: NicknameTable) -> Self {
        self.nicknames = nicknames;
        self
    }

    /// Replaces the identifiers used when a request names no endpoints.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Vec<String>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Consults `registry` when nothing else names an aggregate.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn AggregateRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Settings in force.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Version cache shared by every run.
    #[must_use]
    pub const fn cache(&self) -> &VersionCache {
        &self.cache
    }

    /// Executes `request`.
    ///
    /// Endpoint-scoped failures are reported inside the outcome. Only caller
    /// errors, credential failures, a failed fleet probe, cancellation, or the
    /// failure of a lone endpoint produce `Err`.
    pub fn run(
        &self,
        request: &OperationRequest,
        abort: &AbortSignal,
    ) -> Result<OperationOutcome, OrchestrationError> {
        if abort.is_aborted() {
            return Err(OrchestrationError::Aborted);
        }
        let operation = request.operation;
        let endpoints = self.resolver().resolve(&request.endpoints)?;
        let (requested, explicit) = request.api_version.map_or(
            (self.settings.api_version, self.settings.explicit_api_version),
            |version| (version, request.explicit_version),
        );
        info!(
            target: ORCHESTRATE_TARGET,
            %operation,
            endpoints = endpoints.len(),
            version = requested,
            "starting operation"
        );
        let credentials = self.credentials_for(request)?;

        let mode = self.settings.mode;
        let prober = CapabilityProber::new(self.transport.as_ref(), &self.cache, self.settings.probe);
        let negotiator = Negotiator::new(prober, mode, self.settings.force_refresh, abort);

        let mut version = requested;
        let mut fleet_message = None;
        if endpoints.len() > 1 && operation.reconciles_fleet() {
            let decision =
                negotiator.reconcile_fleet(&endpoints, requested, explicit, self.settings.worker_limit)?;
            if let Some(message) = &decision.message {
                info!(target: ORCHESTRATE_TARGET, warning = decision.warning, "{message}");
            }
            version = decision.version;
            fleet_message = decision.message;
        }

        let intent = self.intent_for(request);
        let builder = RequestOptionBuilder::new(mode);
        if operation != Operation::GetVersion {
            match operation.validate(version, &request.args) {
                Ok(()) | Err(OperationError::Unavailable { .. }) => {}
                Err(error) => return Err(error.into()),
            }
            builder.build(operation, version, &intent, &request.args, &[])?;
        }

        let planner = OperationPlanner {
            operation,
            fallback_version: version,
            args: &request.args,
            intent: &intent,
            credentials: &credentials,
            builder,
        };
        let dispatcher = Dispatcher::new(
            &negotiator,
            self.transport.as_ref(),
            self.settings.call_timeout,
            self.settings.worker_limit,
            abort,
        );
        let entries = dispatcher.execute(&endpoints, version, &planner)?;

        let normalizer = ResponseNormalizer::new(self.credentials.as_ref(), mode);
        let mut aggregator = ResultAggregator::new(operation, version, request.args.requested_resources())
            .with_fleet_message(fleet_message);
        for entry in entries {
            let called_at = entry.version().unwrap_or(version);
            let target = entry.called.as_ref().unwrap_or(&entry.slot);
            let result = normalizer.normalize(target, entry.outcome.clone(), called_at);
            aggregator.push(entry, result);
        }
        let outcome = aggregator.finish();
        info!(
            target: ORCHESTRATE_TARGET,
            %operation,
            version,
            succeeded = outcome.success_count,
            partial = outcome.partial_count,
            total = outcome.total_endpoints,
            "operation finished"
        );
        Ok(outcome)
    }

    fn resolver(&self) -> EndpointResolver<'_> {
        let resolver = EndpointResolver::new(&self.nicknames, &self.defaults);
        if let Some(registry) = &self.registry {
            return resolver.with_registry(registry.as_ref());
        }
        resolver
    }

    fn credentials_for(&self, request: &OperationRequest) -> Result<Vec<Credential>, OrchestrationError> {
        if request.operation == Operation::GetVersion {
            return Ok(Vec::new());
        }
        let subject = request.credential_subject();
        let credential = self
            .credentials
            .get_credential(&subject)
            .map_err(|error| OrchestrationError::credential(&subject, error))?;
        Ok(vec![credential])
    }

    fn intent_for(&self, request: &OperationRequest) -> CallIntent {
        let mut intent = request.intent.clone();
        if intent.rspec_format.is_none() && takes_rspec_version(request.operation) {
            intent.rspec_format.clone_from(&self.settings.preferred_rspec);
        }
        intent
    }
}

/// Shapes the call for each negotiated endpoint.
struct OperationPlanner<'r> {
    operation: Operation,
    fallback_version: u32,
    args: &'r OperationArgs,
    intent: &'r CallIntent,
    credentials: &'r [Credential],
    builder: RequestOptionBuilder,
}

impl OperationPlanner<'_> {
    /// Arguments accepted for the invocation version may not fit an endpoint
    /// that negotiated a different one; that endpoint is skipped.
    fn incompatible(&self, version: u32, error: &impl std::error::Error) -> PlannedCall {
        warn!(
            target: ORCHESTRATE_TARGET,
            operation = %self.operation,
            version,
            "{error}"
        );
        PlannedCall::Unavailable(SkipReason::IncompatibleRequest {
            version,
            detail: error.to_string(),
        })
    }
}

impl CallPlanner for OperationPlanner<'_> {
    fn plan(&self, negotiated: &Negotiated) -> Result<PlannedCall, OrchestrationError> {
        let operation = self.operation;
        let version = negotiated.version().unwrap_or(self.fallback_version);
        if operation.method_name(version).is_none() {
            return Ok(PlannedCall::Unavailable(SkipReason::OperationUnavailable {
                operation,
                version,
            }));
        }
        let advertised = negotiated
            .capabilities
            .as_ref()
            .map(|probed| probed.snapshot.ad_formats.as_slice())
            .unwrap_or_default();
        let built = match self
            .builder
            .build(operation, version, self.intent, self.args, advertised)
        {
            Ok(built) => built,
            Err(OptionError::UnadvertisedRspec {
                requested,
                advertised: listed,
            }) => {
                return Ok(PlannedCall::Unavailable(SkipReason::UnsupportedRspec {
                    requested,
                    advertised: listed,
                }));
            }
            Err(error) => return Ok(self.incompatible(version, &error)),
        };
        for warning in &built.warnings {
            warn!(
                target: ORCHESTRATE_TARGET,
                endpoint = %negotiated.endpoint,
                %operation,
                "{warning}"
            );
        }
        let warnings = built.warnings;
        Ok(
            prepare_call(operation, version, self.args, self.credentials, built.options)
                .map_or_else(
                    |error| self.incompatible(version, &error),
                    |call| PlannedCall::Invoke { call, warnings },
                ),
        )
    }

    fn answers_from_probe(&self) -> bool {
        self.operation == Operation::GetVersion
    }
}
