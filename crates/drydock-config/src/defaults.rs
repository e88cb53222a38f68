//! Default values shared by the harness library and the CLI.

use std::time::Duration;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Readiness timeout used on developer machines.
pub const LOCAL_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Readiness timeout used when the `CI` environment variable is present.
pub const CI_START_TIMEOUT: Duration = Duration::from_secs(120);

/// Default graceful stop budget, in seconds, before escalating to SIGKILL.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Default wait after SIGKILL before a stop is reported as failed.
pub const DEFAULT_KILL_GRACE_MS: u64 = 2_000;

/// Default interval between readiness probe attempts.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 100;

/// Default connect/read timeout applied to a single readiness probe.
pub const DEFAULT_PROBE_CONNECT_TIMEOUT_MS: u64 = 500;

/// Default number of attempts the port allocator makes before giving up.
pub const DEFAULT_PORT_ATTEMPTS: u32 = 16;

/// Environment variable whose presence marks a continuous-integration run.
pub const CI_ENV_VAR: &str = "CI";

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Reports whether the current process runs under continuous integration.
#[must_use]
pub fn running_under_ci() -> bool {
    std::env::var_os(CI_ENV_VAR).is_some()
}

/// Readiness timeout applied when no explicit override is configured.
#[must_use]
pub const fn default_start_timeout(ci: bool) -> Duration {
    if ci { CI_START_TIMEOUT } else { LOCAL_START_TIMEOUT }
}
