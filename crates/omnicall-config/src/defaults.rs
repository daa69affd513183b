use std::env;

use camino::Utf8PathBuf;

/// AM API version requested when nothing else is configured.
pub const DEFAULT_API_VERSION: u32 = 2;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Capability snapshots older than this are re-probed (seven days).
pub const DEFAULT_VERSION_CACHE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Timeout attached to capability probes.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 60;

/// Timeout attached to operation calls; allocation can be slow.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 360;

/// Endpoints are contacted one at a time unless configured otherwise.
pub const DEFAULT_WORKER_LIMIT: usize = 1;

const CACHE_FILE_NAME: &str = "get_version_cache.json";

/// Default log filter expression.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Default requested AM API version.
pub fn default_api_version() -> u32 {
    DEFAULT_API_VERSION
}

/// Default cache staleness threshold in seconds.
pub fn default_version_cache_max_age_secs() -> u64 {
    DEFAULT_VERSION_CACHE_MAX_AGE_SECS
}

/// Default probe timeout in seconds.
pub fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

/// Default call timeout in seconds.
pub fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

/// Default number of concurrent endpoint workers.
pub fn default_worker_limit() -> usize {
    DEFAULT_WORKER_LIMIT
}

/// Computes the default capability cache file.
///
/// Prefers the per-user cache directory and falls back to the temporary
/// directory when none is available or it is not valid UTF-8.
pub fn default_version_cache_path() -> Utf8PathBuf {
    let mut base = cache_base_directory().unwrap_or_else(fallback_base_directory);
    base.push("omnicall");
    base.push(CACHE_FILE_NAME);
    base
}

fn cache_base_directory() -> Option<Utf8PathBuf> {
    dirs::cache_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_ends_with_cache_file() {
        let path = default_version_cache_path();
        assert_eq!(path.file_name(), Some(CACHE_FILE_NAME));
        assert!(
            path.parent()
                .and_then(|parent| parent.file_name())
                .is_some_and(|name| name == "omnicall"),
            "unexpected cache directory: {path}"
        );
    }
}
