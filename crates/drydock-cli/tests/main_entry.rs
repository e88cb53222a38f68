//! Integration tests for the `drydock` binary.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use rstest::rstest;

#[rstest]
#[case::long("--run-slow")]
#[case::short_alias("--slow")]
#[case::legacy_alias("--slow-tests")]
fn run_slow_exports_flag(#[case] flag: &str) {
    let mut command = cargo_bin_cmd!("drydock");
    command.args([
        "run",
        flag,
        "--",
        "sh",
        "-c",
        r#"test "$SLOW_TESTS" = True && test "$DRYDOCK_RUN_SLOW" = true"#,
    ]);
    command.assert().success();
}

#[test]
fn defaults_disable_slow_tests() {
    let mut command = cargo_bin_cmd!("drydock");
    command.args([
        "run",
        "--no-fast-tests",
        "--",
        "sh",
        "-c",
        r#"test "$SLOW_TESTS" = False && test "$DRYDOCK_NO_FAST" = true"#,
    ]);
    command.assert().success();
}

#[test]
fn run_mirrors_child_exit_code() {
    let mut command = cargo_bin_cmd!("drydock");
    command.args(["run", "--", "sh", "-c", "exit 7"]);
    command.assert().code(7);
}

#[test]
fn unlaunchable_command_exits_127() {
    let mut command = cargo_bin_cmd!("drydock");
    command.args(["run", "--", "/nonexistent/drydock-test-runner"]);
    command
        .assert()
        .code(127)
        .stderr(contains("failed to launch"));
}

#[test]
fn config_flags_precede_the_subcommand() {
    let mut command = cargo_bin_cmd!("drydock");
    command.args(["--log-filter", "debug", "run", "--", "true"]);
    command.assert().success();
}

#[test]
fn sftp_server_reports_path_or_search_list() -> anyhow::Result<()> {
    let mut command = cargo_bin_cmd!("drydock");
    let output = command.arg("sftp-server").output()?;
    if output.status.success() {
        let stdout = String::from_utf8(output.stdout)?;
        assert!(stdout.trim().ends_with("sftp-server"), "{stdout}");
    } else {
        let stderr = String::from_utf8(output.stderr)?;
        assert!(stderr.contains("searched: /usr/lib/openssh/sftp-server"), "{stderr}");
    }
    Ok(())
}
