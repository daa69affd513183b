//! Scenario world for the orchestration behaviour suite.

use std::fs;

use serde_json::{Value, json};

use crate::aggregate::{EndpointOutcome, OperationOutcome};
use crate::errors::OrchestrationError;
use crate::negotiate::NegotiationMode;
use crate::operation::{Operation, OperationArgs};
use crate::orchestrator::OperationRequest;
use crate::transport::AbortSignal;

use super::{CacheDir, ScriptedTransport, am_url, envelope, orchestrator, settings, version_reply};

/// Aggregates, cache, and the last run shared across steps.
pub struct TestWorld {
    /// Scripted network.
    pub transport: ScriptedTransport,
    cache_dir: CacheDir,
    /// Negotiation mode for the next run.
    pub mode: NegotiationMode,
    /// Aggregate names in the order they were introduced.
    pub aggregates: Vec<String>,
    /// Sliver URNs the next run asks about.
    pub slivers: Vec<String>,
    /// Explicitly requested version, if any.
    pub explicit_version: Option<u32>,
    result: Option<Result<OperationOutcome, OrchestrationError>>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self {
            transport: ScriptedTransport::default(),
            cache_dir: CacheDir::default(),
            mode: NegotiationMode::Strict,
            aggregates: Vec::new(),
            slivers: Vec::new(),
            explicit_version: None,
            result: None,
        }
    }
}

impl TestWorld {
    /// Adds an aggregate speaking `version` that answers every call with an
    /// empty sliver list.
    pub fn add_aggregate(&mut self, name: &str, version: u32) {
        let url = am_url(name);
        self.transport.version(&url, version_reply(version, &[]));
        self.transport
            .answer_everything(&url, envelope(json!({"geni_slivers": []})));
        self.aggregates.push(name.to_owned());
    }

    /// Adds an aggregate that also serves `alternate` at a second URL.
    pub fn add_aggregate_with_alternate(&mut self, name: &str, version: u32, alternate: u32) {
        let url = am_url(name);
        let alternate_url = format!("{url}/v{alternate}");
        self.transport
            .version(&url, version_reply(version, &[(alternate, &alternate_url)]));
        self.transport
            .version(&alternate_url, version_reply(alternate, &[(version, &url)]));
        self.transport
            .answer_everything(&url, envelope(json!({"geni_slivers": []})));
        self.transport
            .answer_everything(&alternate_url, envelope(json!({"geni_slivers": []})));
        self.aggregates.push(name.to_owned());
    }

    /// Adds an aggregate whose GetVersion call fails with `message`.
    pub fn add_unreachable_aggregate(&mut self, name: &str, message: &str) {
        let url = am_url(name);
        self.transport.fail(&url, "GetVersion", message);
        self.aggregates.push(name.to_owned());
    }

    /// Scripts `method` at the named aggregate to return `value` enveloped.
    pub fn script_reply(&self, name: &str, method: &str, value: Value) {
        self.transport.reply(&am_url(name), method, envelope(value));
    }

    /// Overwrites the cache file with `contents`.
    pub fn corrupt_cache(&self, contents: &str) {
        fs::write(&self.cache_dir.path, contents).expect("write cache file");
    }

    /// Reads the cache file back.
    #[must_use]
    pub fn cache_contents(&self) -> String {
        fs::read_to_string(&self.cache_dir.path).expect("read cache file")
    }

    /// Runs `operation`, optionally on `slice`, against every aggregate at
    /// `version`.
    pub fn run(&mut self, operation: Operation, slice: Option<&str>, version: u32) {
        let explicit = self.explicit_version == Some(version);
        let args = OperationArgs {
            slice_urn: slice.map(str::to_owned),
            ..OperationArgs::default()
        }
        .with_slivers(self.slivers.iter().cloned());
        let request = OperationRequest::new(operation)
            .with_endpoints(self.aggregates.iter().map(|name| am_url(name)))
            .with_args(args)
            .at_version(version, explicit);
        let engine = orchestrator(&self.transport, self.cache_dir.cache(), settings(self.mode, 2));
        self.result = Some(engine.run(&request, &AbortSignal::new()));
    }

    /// Outcome of the last run, or why there is none.
    pub fn outcome(&self) -> Result<&OperationOutcome, String> {
        match &self.result {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(error)) => Err(format!("operation failed: {error}")),
            None => Err(String::from("no operation has run")),
        }
    }

    /// Per-endpoint outcome for the named aggregate.
    pub fn endpoint(&self, name: &str) -> Result<&EndpointOutcome, String> {
        let url = am_url(name);
        self.outcome()?
            .per_endpoint
            .get(&url)
            .ok_or_else(|| format!("no result recorded for {url}"))
    }

    /// Error from the last run, or why there is none.
    pub fn error(&self) -> Result<&OrchestrationError, String> {
        match &self.result {
            Some(Err(error)) => Ok(error),
            Some(Ok(outcome)) => Err(format!(
                "operation unexpectedly succeeded:\n{}",
                outcome.summary()
            )),
            None => Err(String::from("no operation has run")),
        }
    }
}
