//! Shared configuration for the drydock test-harness orchestrator.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file, then `DRYDOCK_*` environment variables, then
//! command-line flags. The resolved [`Config`] is folded into the harness
//! context once per test session and never mutated afterwards.

mod defaults;
mod logging;
mod selection;

use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    CI_ENV_VAR, CI_START_TIMEOUT, DEFAULT_KILL_GRACE_MS, DEFAULT_LOG_FILTER,
    DEFAULT_PORT_ATTEMPTS, DEFAULT_PROBE_CONNECT_TIMEOUT_MS, DEFAULT_PROBE_INTERVAL_MS,
    DEFAULT_STOP_TIMEOUT_SECS, LOCAL_START_TIMEOUT, default_log_filter, default_log_filter_string,
    default_log_format, default_start_timeout, running_under_ci,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use selection::{
    FAST_DISABLED_REASON, NO_FAST_ENV_VAR, RUN_SLOW_ENV_VAR, SLOW_DISABLED_REASON,
    SLOW_TEST_MARKER, SLOW_TEST_MARKER_HELP, SLOW_TESTS_ENV_VAR, Selection, TestSelection,
};

/// Resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DRYDOCK")]
pub struct Config {
    /// Tracing filter expression applied to harness telemetry.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for harness telemetry.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Explicit readiness timeout; falls back to the CI-aware default.
    pub start_timeout_secs: Option<u64>,
    /// Graceful stop budget before escalating to SIGKILL.
    #[ortho_config(default = defaults::DEFAULT_STOP_TIMEOUT_SECS)]
    pub stop_timeout_secs: u64,
    /// Wait after SIGKILL before a stop is reported as failed.
    #[ortho_config(default = defaults::DEFAULT_KILL_GRACE_MS)]
    pub kill_grace_ms: u64,
    /// Interval between readiness probe attempts.
    #[ortho_config(default = defaults::DEFAULT_PROBE_INTERVAL_MS)]
    pub probe_interval_ms: u64,
    /// Connect/read timeout for a single readiness probe.
    #[ortho_config(default = defaults::DEFAULT_PROBE_CONNECT_TIMEOUT_MS)]
    pub probe_connect_timeout_ms: u64,
    /// Attempts the port allocator makes before reporting exhaustion.
    #[ortho_config(default = defaults::DEFAULT_PORT_ATTEMPTS)]
    pub port_attempts: u32,
    /// Parent directory for per-daemon configuration directories.
    pub root_dir: Option<Utf8PathBuf>,
    /// Keep per-daemon configuration directories after teardown.
    #[ortho_config(default = false)]
    pub retain_config_dirs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            start_timeout_secs: None,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            probe_connect_timeout_ms: DEFAULT_PROBE_CONNECT_TIMEOUT_MS,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            root_dir: None,
            retain_config_dirs: false,
        }
    }
}

impl Config {
    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Telemetry output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Readiness timeout: the explicit override, or 120 s under CI and 60 s
    /// otherwise.
    #[must_use]
    pub fn start_timeout(&self, ci: bool) -> Duration {
        self.start_timeout_secs
            .map_or_else(|| default_start_timeout(ci), Duration::from_secs)
    }

    /// Graceful stop budget.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Wait after SIGKILL.
    #[must_use]
    pub const fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Interval between readiness probe attempts.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Timeout for a single readiness probe.
    #[must_use]
    pub const fn probe_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_connect_timeout_ms)
    }

    /// Attempts the port allocator makes; never less than one.
    #[must_use]
    pub fn port_attempts(&self) -> u32 {
        self.port_attempts.max(1)
    }

    /// Parent directory for per-daemon configuration directories.
    #[must_use]
    pub fn root_dir(&self) -> std::path::PathBuf {
        self.root_dir
            .as_ref()
            .map_or_else(env::temp_dir, |dir| dir.as_std_path().to_path_buf())
    }

    /// Whether configuration directories survive teardown.
    #[must_use]
    pub const fn retain_config_dirs(&self) -> bool {
        self.retain_config_dirs
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::local(false, LOCAL_START_TIMEOUT)]
    #[case::ci(true, CI_START_TIMEOUT)]
    fn start_timeout_follows_ci_rule(#[case] ci: bool, #[case] expected: Duration) {
        assert_eq!(Config::default().start_timeout(ci), expected);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn explicit_start_timeout_wins(#[case] ci: bool) {
        let config = Config {
            start_timeout_secs: Some(5),
            ..Config::default()
        };
        assert_eq!(config.start_timeout(ci), Duration::from_secs(5));
    }

    #[test]
    fn port_attempts_never_zero() {
        let config = Config {
            port_attempts: 0,
            ..Config::default()
        };
        assert_eq!(config.port_attempts(), 1);
    }

    #[test]
    fn root_dir_defaults_to_temp_dir() {
        assert_eq!(Config::default().root_dir(), env::temp_dir());
    }

    #[test]
    fn root_dir_uses_override() {
        let config = Config {
            root_dir: Some(Utf8PathBuf::from("/srv/drydock")),
            ..Config::default()
        };
        assert_eq!(config.root_dir(), std::path::PathBuf::from("/srv/drydock"));
    }
}
