//! Shared configuration for the omnicall orchestration engine.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file (`--config-path`), then `OMNICALL_*` environment
//! variables, then command-line flags. The engine only ever reads the merged
//! [`Config`]; it never parses files or flags itself.

mod defaults;
mod logging;
mod nickname;
mod rspec;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_API_VERSION, DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_LOG_FILTER,
    DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_VERSION_CACHE_MAX_AGE_SECS, DEFAULT_WORKER_LIMIT,
    default_api_version, default_call_timeout_secs, default_log_filter,
    default_log_filter_string, default_log_format, default_probe_timeout_secs,
    default_version_cache_max_age_secs, default_version_cache_path, default_worker_limit,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use nickname::{
    NicknameDirective, NicknameDirectiveParseError, NicknameEntry, NicknameTable, canonical_url,
    same_authority,
};
pub use rspec::{RspecFormat, RspecFormatParseError};

/// Merged configuration consumed by the engine and its telemetry setup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "OMNICALL")]
pub struct Config {
    /// `tracing` filter expression, for example `info` or `omnicall=debug`.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for log lines.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// AM API version requested when the caller does not name one.
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// The caller asked for `api_version` emphatically; overriding it warns.
    #[serde(default)]
    pub explicit_api_version: bool,
    /// Relaxed negotiation: mismatches and option misuse warn instead of skipping.
    #[serde(default)]
    pub developer_mode: bool,
    /// File backing the capability cache.
    #[serde(default = "default_version_cache_path")]
    pub version_cache_path: Utf8PathBuf,
    /// Age after which a cached capability snapshot is re-probed.
    #[serde(default = "default_version_cache_max_age_secs")]
    pub version_cache_max_age_secs: u64,
    /// Ignore cached snapshots when probing (results are still written back).
    #[serde(default)]
    pub no_version_cache: bool,
    /// Re-probe every endpoint once per invocation regardless of cache age.
    #[serde(default)]
    pub force_refresh: bool,
    /// Timeout attached to every capability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Timeout attached to every operation call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Number of endpoints contacted concurrently; `1` keeps calls sequential.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Aggregate nicknames in `nickname=urn,url` form.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub aggregate_nicknames: Vec<NicknameDirective>,
    /// Endpoint identifiers used when the caller names none.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub default_aggregates: Vec<String>,
    /// Preferred resource-description format, for example `GENI:3`.
    #[serde(default)]
    pub preferred_rspec: Option<RspecFormat>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            api_version: default_api_version(),
            explicit_api_version: false,
            developer_mode: false,
            version_cache_path: default_version_cache_path(),
            version_cache_max_age_secs: default_version_cache_max_age_secs(),
            no_version_cache: false,
            force_refresh: false,
            probe_timeout_secs: default_probe_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            worker_limit: default_worker_limit(),
            aggregate_nicknames: Vec::new(),
            default_aggregates: Vec::new(),
            preferred_rspec: None,
        }
    }
}

impl Config {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Capability cache location.
    #[must_use]
    pub fn version_cache_path(&self) -> &Utf8PathBuf {
        &self.version_cache_path
    }

    /// Staleness threshold for cached capability snapshots.
    #[must_use]
    pub fn version_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.version_cache_max_age_secs)
    }

    /// Timeout attached to capability probes.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Timeout attached to operation calls.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Worker limit clamped to at least one.
    #[must_use]
    pub fn worker_limit(&self) -> usize {
        self.worker_limit.max(1)
    }

    /// Nickname directives grouped into a lookup table.
    #[must_use]
    pub fn nickname_table(&self) -> NicknameTable {
        NicknameTable::from_directives(&self.aggregate_nicknames)
    }
}
