//! Command-line argument definitions.

use std::ffi::OsString;
use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

/// Test-harness companion for drydock.
#[derive(Parser, Debug)]
#[command(name = "drydock", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Runs a test command with the selection flags exported.
    Run(RunArgs),
    /// Prints the SFTP subsystem binary used for remote-exec daemons.
    SftpServer,
    /// Probes a daemon once and reports whether it is ready.
    Probe(ProbeArgs),
}

/// Arguments of `drydock run`.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Run tests marked slow.
    #[arg(long = "run-slow", visible_aliases = ["slow", "slow-tests"])]
    pub(crate) run_slow: bool,
    /// Skip tests not marked slow.
    #[arg(long = "no-fast-tests", visible_alias = "no-fast")]
    pub(crate) no_fast: bool,
    /// Test command and its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) command: Vec<OsString>,
}

/// Arguments of `drydock probe`.
#[derive(Args, Debug)]
pub(crate) struct ProbeArgs {
    /// Address to probe, for example `127.0.0.1:4506`.
    #[arg(value_name = "ADDRESS")]
    pub(crate) address: SocketAddr,
    /// Send a health request instead of a bare connect.
    #[arg(long)]
    pub(crate) rpc: bool,
    /// Connect and read timeout.
    #[arg(long, default_value_t = 500)]
    pub(crate) timeout_ms: u64,
}
