//! Shared fixtures and doubles for engine tests.

mod transport;
mod world;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::cache::VersionCache;
use crate::credentials::{Credential, CredentialError, CredentialProvider};
use crate::endpoint::Endpoint;
use crate::negotiate::NegotiationMode;
use crate::orchestrator::{EngineSettings, Orchestrator};
use crate::probe::ProbeSettings;

pub use transport::{RecordedCall, ScriptedTransport, UNSCRIPTED_ERROR};
pub use world::TestWorld;

mock! {
    pub Credentials {}

    impl CredentialProvider for Credentials {
        fn get_credential(&self, subject_urn: &str) -> Result<Credential, CredentialError>;
        fn record_proof(&self, endpoint: &Endpoint, proof: &Value) -> Result<(), CredentialError>;
    }
}

/// Credential mock that grants every subject and accepts every proof.
#[must_use]
pub fn permissive_credentials() -> MockCredentials {
    let mut credentials = MockCredentials::new();
    credentials
        .expect_get_credential()
        .returning(|_| Ok(Credential::sfa("<signed-credential/>")));
    credentials.expect_record_proof().returning(|_, _| Ok(()));
    credentials
}

/// Temporary directory holding a cache file that does not exist yet.
pub struct CacheDir {
    _dir: TempDir,
    /// Cache file location.
    pub path: PathBuf,
}

impl Default for CacheDir {
    fn default() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("get_version_cache.json");
        Self { _dir: dir, path }
    }
}

impl CacheDir {
    /// Opens a cache handle over the file.
    #[must_use]
    pub fn cache(&self) -> VersionCache {
        VersionCache::open(self.path.clone())
    }
}

/// `https://{name}.example.net/am`.
#[must_use]
pub fn am_url(name: &str) -> String {
    format!("https://{name}.example.net/am")
}

/// Endpoint for [`am_url`] with a URN derived from `name`.
#[must_use]
pub fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(
        format!("urn:publicid:IDN+{name}.example.net+authority+am"),
        &am_url(name),
    )
    .expect("test endpoint")
}

/// Successful version 2+ envelope around `value`.
#[must_use]
pub fn envelope(value: Value) -> Value {
    json!({"code": {"geni_code": 0}, "value": value, "output": ""})
}

/// Failing version 2+ envelope.
#[must_use]
pub fn error_envelope(geni_code: i64, output: &str) -> Value {
    json!({"code": {"geni_code": geni_code}, "value": null, "output": output})
}

/// GetVersion reply for an aggregate speaking `primary`, plus `others` at
/// the given URLs.
#[must_use]
pub fn version_reply(primary: u32, others: &[(u32, &str)]) -> Value {
    version_reply_advertising(primary, others, ("GENI", "3"))
}

/// Like [`version_reply`], but advertising only the `(type, version)`
/// resource-description format given.
#[must_use]
pub fn version_reply_advertising(
    primary: u32,
    others: &[(u32, &str)],
    (kind, format_version): (&str, &str),
) -> Value {
    let mut versions = Map::new();
    for (version, url) in others {
        versions.insert(version.to_string(), Value::String((*url).to_owned()));
    }
    let format = json!([{"type": kind, "version": format_version}]);
    envelope(json!({
        "geni_api": primary,
        "geni_api_versions": versions,
        "ad_rspec_versions": format,
        "request_rspec_versions": format,
        "geni_credential_types": [{"geni_type": "geni_sfa", "geni_version": "3"}],
    }))
}

/// Engine settings for tests: no cache age limit surprises, short timeouts.
#[must_use]
pub fn settings(mode: NegotiationMode, worker_limit: usize) -> EngineSettings {
    EngineSettings {
        api_version: 2,
        explicit_api_version: false,
        mode,
        probe: ProbeSettings {
            max_age: Duration::from_secs(3600),
            use_cache: true,
            timeout: Duration::from_secs(5),
        },
        force_refresh: false,
        call_timeout: Duration::from_secs(5),
        worker_limit,
        preferred_rspec: None,
    }
}

/// Orchestrator over a scripted transport and permissive credentials.
#[must_use]
pub fn orchestrator(
    transport: &ScriptedTransport,
    cache: VersionCache,
    settings: EngineSettings,
) -> Orchestrator {
    Orchestrator::new(
        settings,
        cache,
        Arc::new(transport.clone()),
        Arc::new(permissive_credentials()),
    )
}
