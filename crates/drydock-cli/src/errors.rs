//! Error type for the CLI runtime.

use std::ffi::OsString;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use drydock::HarnessError;
use drydock::telemetry::TelemetryError;
use thiserror::Error;

/// Shell convention for a command that could not be launched.
pub(crate) const LAUNCH_FAILURE_EXIT: u8 = 127;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(TelemetryError),
    #[error("failed to launch {program:?}: {source}")]
    Launch {
        program: OsString,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error("{probe} not ready: {reason}")]
    NotReady { probe: String, reason: String },
    #[error("failed to write output: {0}")]
    Write(io::Error),
}

impl AppError {
    /// Process exit status for this error.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self {
            Self::Launch { .. } => ExitCode::from(LAUNCH_FAILURE_EXIT),
            Self::CliUsage(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}
