//! Command-line companion for the drydock test harness.
//!
//! `drydock run` wraps the surrounding test runner: it applies the slow/fast
//! selection flags by exporting them to the test process and exits with the
//! runner's status. Diagnostic subcommands locate the SFTP subsystem and
//! probe daemons by hand.

mod cli;
mod config;
mod errors;
mod runner;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use drydock::{ProbeOutcome, ReadinessProbe, RpcHealthProbe, TcpConnectProbe, sftp, telemetry};

use cli::{Cli, CliCommand, ProbeArgs};
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
pub(crate) use errors::AppError;

/// Runs the CLI with the given arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(&split.cli_arguments) {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", AppError::CliUsage(error));
            return ExitCode::from(2);
        }
    };
    let result = loader.load(&split.config_arguments).and_then(|config| {
        telemetry::initialise(&config).map_err(AppError::Telemetry)?;
        dispatch(cli.command, stdout)
    });
    match result {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(stderr, "drydock: {error}");
            error.exit_code()
        }
    }
}

fn dispatch<W: Write>(command: CliCommand, stdout: &mut W) -> Result<ExitCode, AppError> {
    match command {
        CliCommand::Run(args) => runner::run_tests(&args),
        CliCommand::SftpServer => {
            let path = sftp::discover()?;
            writeln!(stdout, "{}", path.display()).map_err(AppError::Write)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Probe(args) => probe(&args, stdout),
    }
}

fn probe<W: Write>(args: &ProbeArgs, stdout: &mut W) -> Result<ExitCode, AppError> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let probe: Box<dyn ReadinessProbe> = if args.rpc {
        Box::new(RpcHealthProbe::new(args.address, timeout))
    } else {
        Box::new(TcpConnectProbe::new(args.address, timeout))
    };
    match probe.check() {
        ProbeOutcome::Ready => {
            writeln!(stdout, "{}: ready", probe.describe()).map_err(AppError::Write)?;
            Ok(ExitCode::SUCCESS)
        }
        ProbeOutcome::NotReady(reason) => Err(AppError::NotReady {
            probe: probe.describe(),
            reason,
        }),
    }
}
