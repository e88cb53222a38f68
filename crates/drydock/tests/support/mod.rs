//! Shared fixtures for tests driving the stub daemon.

use std::time::Duration;

use camino::Utf8PathBuf;
use drydock::{Config, DaemonCommand, HarnessContext, Orchestrator, TestSelection};
use tempfile::TempDir;

/// Readiness budget generous enough for loaded CI machines.
pub const START_TIMEOUT: Duration = Duration::from_secs(20);

/// Stub daemon command; `extra` flags are appended to the standard ones.
pub fn stub_command(extra: &[&str]) -> DaemonCommand {
    DaemonCommand::new(env!("CARGO_BIN_EXE_drydockd-stub"))
        .args([
            "--role",
            "{role}",
            "--name",
            "{name}",
            "--port",
            "{port}",
            "--config-dir",
            "{config_dir}",
        ])
        .args(extra.iter().copied())
}

/// Orchestrator rooted in a private temp directory.
///
/// Field order matters: the orchestrator drops before the directory.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub root: TempDir,
}

pub fn harness() -> Harness {
    let root = TempDir::new().expect("temp root");
    let config = Config {
        root_dir: Some(
            Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf-8 temp path"),
        ),
        start_timeout_secs: Some(START_TIMEOUT.as_secs()),
        stop_timeout_secs: 5,
        kill_grace_ms: 500,
        probe_interval_ms: 20,
        probe_connect_timeout_ms: 200,
        ..Config::default()
    };
    let context = HarnessContext::from_config(config, TestSelection::default())
        .with_command_for_all(&stub_command(&[]))
        .with_sftp_server(None);
    Harness {
        orchestrator: Orchestrator::new(context),
        root,
    }
}

/// Whether a process with `pid` still exists.
pub fn process_exists(pid: u32) -> bool {
    let raw = i32::try_from(pid).expect("pid fits in i32");
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None).is_ok()
}
