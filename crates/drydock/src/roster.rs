//! Remote-execution access documents for a control daemon.
//!
//! After a remote-exec daemon is up, the control daemon needs a known-hosts
//! file with its host keys and a roster naming the host, port and user to
//! connect as. Both land inside the control daemon's bundle so its teardown
//! removes them.

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::config_map::ConfigMap;
use crate::errors::{ConfigRenderError, HarnessError};
use crate::handle::ProcessHandle;
use crate::materialize::{ConfigBundle, ConfigMaterializer};
use crate::role::LOOPBACK;
use crate::user::current_user;

const ROSTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::roster");

/// File name of the known-hosts document.
pub const KNOWN_HOSTS_FILE: &str = "ssh-known-hosts";

/// Overlay pointing the control daemon at the known-hosts document.
pub const KNOWN_HOSTS_OVERLAY: &str = "ssh-known-hosts.conf";

/// File name of the roster document.
pub const ROSTER_FILE: &str = "roster";

/// Host entry written to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Address to connect to.
    pub host: String,
    /// Port of the remote-exec daemon.
    pub port: u16,
    /// Login user.
    pub user: String,
}

impl RosterEntry {
    /// Loopback entry for `port` and `user`.
    #[must_use]
    pub fn loopback(port: u16, user: impl Into<String>) -> Self {
        Self {
            host: LOOPBACK.to_owned(),
            port,
            user: user.into(),
        }
    }
}

/// Paths written by [`provision_remote_exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExecAccess {
    /// Known-hosts document.
    pub known_hosts: PathBuf,
    /// Roster document.
    pub roster: PathBuf,
}

/// Writes `ssh-known-hosts` (one key per line) beside the control daemon's
/// config directory, plus an overlay setting `known_hosts_file`.
///
/// # Errors
///
/// Returns [`HarnessError::Document`] when either write fails.
pub fn write_known_hosts(
    materializer: &ConfigMaterializer,
    control: &ConfigBundle,
    host_keys: &[String],
) -> Result<PathBuf, HarnessError> {
    let path = control.root().join(KNOWN_HOSTS_FILE);
    fs::write(&path, host_keys.join("\n")).map_err(|source| HarnessError::Document {
        document: "known hosts",
        source: ConfigRenderError::Write {
            path: path.clone(),
            source,
        },
    })?;
    let overlay = ConfigMap::from_pairs([("known_hosts_file", path.display().to_string())]);
    materializer
        .write_overlay(control, KNOWN_HOSTS_OVERLAY, &overlay)
        .map_err(|source| HarnessError::Document {
            document: "known hosts overlay",
            source,
        })?;
    Ok(path)
}

/// Roster document for one host.
#[must_use]
pub fn render_roster(entry: &RosterEntry) -> String {
    let mut roster = format!(
        "localhost:\n  host: {}\n  port: {}\n  user: {}\n",
        entry.host, entry.port, entry.user
    );
    if cfg!(target_os = "macos") {
        roster.push_str("  set_path: $PATH:/usr/local/bin/\n");
    }
    roster
}

/// Writes the roster into the control daemon's config directory.
///
/// # Errors
///
/// Returns [`HarnessError::Document`] when the write fails.
pub fn write_roster(
    materializer: &ConfigMaterializer,
    control: &ConfigBundle,
    entry: &RosterEntry,
) -> Result<PathBuf, HarnessError> {
    materializer
        .write_file(control, ROSTER_FILE, &render_roster(entry))
        .map_err(|source| HarnessError::Document {
            document: "roster",
            source,
        })
}

/// Gives `control` access to `remote`: known hosts from its `*.pub` keys
/// and a roster for the current user.
///
/// # Errors
///
/// Fails when host keys cannot be read, the user cannot be resolved, or a
/// document cannot be written.
pub fn provision_remote_exec(
    materializer: &ConfigMaterializer,
    control: &ProcessHandle,
    remote: &ProcessHandle,
) -> Result<RemoteExecAccess, HarnessError> {
    let keys = remote
        .host_keys()
        .map_err(|source| HarnessError::Document {
            document: "host keys",
            source: ConfigRenderError::Write {
                path: remote.config_dir().to_path_buf(),
                source,
            },
        })?;
    let known_hosts = write_known_hosts(materializer, control.bundle(), &keys)?;
    let entry = RosterEntry::loopback(remote.port(), current_user()?);
    let roster = write_roster(materializer, control.bundle(), &entry)?;
    info!(
        target: ROSTER_TARGET,
        control = control.name(),
        remote = remote.name(),
        keys = keys.len(),
        "remote-exec access provisioned"
    );
    Ok(RemoteExecAccess { known_hosts, roster })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::materialize::RenderRequest;
    use crate::role::Role;

    struct Setup {
        _dir: TempDir,
        materializer: ConfigMaterializer,
        bundle: ConfigBundle,
    }

    #[fixture]
    fn setup() -> Setup {
        let dir = TempDir::new().expect("temp dir");
        let materializer = ConfigMaterializer::new(dir.path(), false);
        let overrides = ConfigMap::new();
        let bundle = materializer
            .render(&RenderRequest {
                name: "control",
                id: "control-abc123",
                role: Role::Control,
                port: 4506,
                overrides: &overrides,
                links: &[],
                sftp_server: None,
            })
            .expect("render");
        Setup {
            _dir: dir,
            materializer,
            bundle,
        }
    }

    #[rstest]
    fn known_hosts_overlay_points_at_file(setup: Setup) {
        let keys = ["ssh-ed25519 AAAA one".to_owned(), "ssh-rsa BBBB two".to_owned()];
        let path = write_known_hosts(&setup.materializer, &setup.bundle, &keys).expect("write");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "ssh-ed25519 AAAA one\nssh-rsa BBBB two"
        );
        let overlay = setup
            .bundle
            .config_dir()
            .join("master.d")
            .join(KNOWN_HOSTS_OVERLAY);
        let contents = fs::read_to_string(overlay).expect("read overlay");
        assert!(
            contents.contains(&format!("known_hosts_file: {}", path.display())),
            "{contents}"
        );
    }

    #[rstest]
    fn roster_is_tracked_in_bundle(setup: Setup) {
        let entry = RosterEntry::loopback(2222, "tester");
        let path = write_roster(&setup.materializer, &setup.bundle, &entry).expect("write");
        assert_eq!(path, setup.bundle.config_dir().join(ROSTER_FILE));
        assert!(setup.bundle.files().iter().any(|file| file.path == path));
    }

    #[test]
    fn roster_lists_loopback_host() {
        let roster = render_roster(&RosterEntry::loopback(2222, "tester"));
        assert!(roster.starts_with("localhost:\n  host: 127.0.0.1\n  port: 2222\n  user: tester\n"));
    }
}
