//! Slow/fast test selection shared by the CLI wrapper and test code.
//!
//! The surrounding test runner marks long-running tests with
//! [`SLOW_TEST_MARKER`]. Slow tests only run when `--run-slow` is passed, and
//! `--no-fast-tests` inverts the default so that only slow tests run.

/// Marker name attached to slow tests.
pub const SLOW_TEST_MARKER: &str = "slow_test";

/// Human-readable description registered for [`SLOW_TEST_MARKER`].
pub const SLOW_TEST_MARKER_HELP: &str =
    "Mark test as being slow. These tests are skipped by default unless `--run-slow` is passed";

/// Environment variable exported for downstream test code.
pub const SLOW_TESTS_ENV_VAR: &str = "SLOW_TESTS";

/// Environment variable carrying `--run-slow` into the test process.
pub const RUN_SLOW_ENV_VAR: &str = "DRYDOCK_RUN_SLOW";

/// Environment variable carrying `--no-fast-tests` into the test process.
pub const NO_FAST_ENV_VAR: &str = "DRYDOCK_NO_FAST";

/// Skip message for slow tests when slow tests are disabled.
pub const SLOW_DISABLED_REASON: &str =
    "Slow tests are disabled, pass '--run-slow' to enable them.";

/// Skip message for fast tests when `--no-fast-tests` is active.
pub const FAST_DISABLED_REASON: &str = "Fast tests have been disabled by '--no-fast-tests'.";

/// Flags controlling which tests run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSelection {
    /// Run tests carrying the slow marker.
    pub run_slow: bool,
    /// Skip tests that do not carry the slow marker.
    pub no_fast: bool,
}

/// Outcome of evaluating a single test against a [`TestSelection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The test should run.
    Run,
    /// The test should be skipped.
    Skip {
        /// Message reported by the test runner.
        reason: &'static str,
    },
}

impl TestSelection {
    /// Builds a selection from the two command-line flags.
    #[must_use]
    pub const fn new(run_slow: bool, no_fast: bool) -> Self {
        Self { run_slow, no_fast }
    }

    /// Reads the flags exported by `drydock run`. Unset or unrecognised
    /// values count as `false`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(env_flag(RUN_SLOW_ENV_VAR), env_flag(NO_FAST_ENV_VAR))
    }

    /// Every variable `drydock run` exports for this selection.
    #[must_use]
    pub const fn env_pairs(self) -> [(&'static str, &'static str); 3] {
        [
            self.slow_tests_env(),
            (RUN_SLOW_ENV_VAR, bool_text(self.run_slow)),
            (NO_FAST_ENV_VAR, bool_text(self.no_fast)),
        ]
    }

    /// Decides whether a test runs given whether it carries the slow marker.
    #[must_use]
    pub const fn evaluate(self, marked_slow: bool) -> Selection {
        if marked_slow {
            if self.run_slow {
                Selection::Run
            } else {
                Selection::Skip {
                    reason: SLOW_DISABLED_REASON,
                }
            }
        } else if self.no_fast {
            Selection::Skip {
                reason: FAST_DISABLED_REASON,
            }
        } else {
            Selection::Run
        }
    }

    /// Environment pair flagging whether slow tests are enabled.
    ///
    /// The value uses the capitalised boolean literals existing downstream
    /// readers compare against.
    #[must_use]
    pub const fn slow_tests_env(self) -> (&'static str, &'static str) {
        let value = if self.run_slow { "True" } else { "False" };
        (SLOW_TESTS_ENV_VAR, value)
    }
}

const fn bool_text(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
