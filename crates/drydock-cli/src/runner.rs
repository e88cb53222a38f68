//! `drydock run`: executes the test runner with selection flags exported.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitCode, ExitStatus};

use drydock_config::TestSelection;

use crate::AppError;
use crate::cli::RunArgs;

/// Runs the command and mirrors its exit status.
pub(crate) fn run_tests(args: &RunArgs) -> Result<ExitCode, AppError> {
    let selection = TestSelection::new(args.run_slow, args.no_fast);
    let mut parts = args.command.iter();
    let program = parts.next().cloned().unwrap_or_else(OsString::new);
    let mut command = Command::new(&program);
    command.args(parts);
    for (key, value) in selection.env_pairs() {
        command.env(key, value);
    }
    let status = command
        .status()
        .map_err(|source| AppError::Launch {
            program: program.clone(),
            source,
        })?;
    Ok(exit_code_from_status(status))
}

/// Child exit code, or `128 + signal` when the child was killed.
pub(crate) fn exit_code_from_status(status: ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        return u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from);
    }
    status
        .signal()
        .and_then(|signal| u8::try_from(128 + signal).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, ExitCode::SUCCESS)]
    #[case(3, ExitCode::from(3))]
    #[case(255, ExitCode::from(255))]
    fn mirrors_child_exit_code(#[case] code: i32, #[case] expected: ExitCode) {
        assert_eq!(exit_code_from_status(ExitStatus::from_raw(code << 8)), expected);
    }

    #[test]
    fn reports_signal_deaths_shell_style() {
        // Raw wait status 9 is "killed by SIGKILL".
        assert_eq!(exit_code_from_status(ExitStatus::from_raw(9)), ExitCode::from(137));
    }
}
