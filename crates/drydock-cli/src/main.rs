//! CLI entrypoint for drydock.
//!
//! Delegates to [`drydock_cli::run`], which parses arguments, loads
//! configuration and dispatches the subcommand.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    drydock_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
