//! Daemon roles and their per-role conventions.
//!
//! Each role fixes the on-disk layout of its configuration (base file name,
//! drop-in overlay directory, document format), the readiness probe used to
//! decide it is accepting work, and the default configuration merged beneath
//! caller overrides.

use std::path::Path;

use serde_json::{Value, json};
use strum::{Display, EnumString};

use crate::config_map::{ConfigFormat, ConfigMap};

/// Role a spawned daemon plays in the test topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Role {
    /// Coordinating daemon that dispatches work to agents.
    Control,
    /// Worker daemon executing tasks directed by a control daemon.
    Agent,
    /// Secure-shell server used for agentless remote execution.
    RemoteExec,
}

/// Which readiness probe a role uses by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// JSON line health request answered by the daemon.
    RpcHealth,
    /// Bare TCP connect on the listening port.
    TcpConnect,
}

/// Facts about a dependency that a dependent daemon's configuration needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedDaemon {
    /// Logical name of the dependency.
    pub name: String,
    /// Role of the dependency.
    pub role: Role,
    /// Port the dependency listens on.
    pub port: u16,
}

/// Inputs for a role's default configuration.
#[derive(Debug, Clone, Copy)]
pub struct RoleDefaults<'a> {
    /// Daemon identifier written into the configuration.
    pub id: &'a str,
    /// Listening port.
    pub port: u16,
    /// Scratch root owned by the daemon (logs, pid files, pki).
    pub root: &'a Path,
    /// Discovered SFTP subsystem binary, if any.
    pub sftp_server: Option<&'a Path>,
    /// Daemons this one depends on.
    pub links: &'a [LinkedDaemon],
}

pub(crate) const LOOPBACK: &str = "127.0.0.1";

impl Role {
    /// All roles in declaration order.
    pub const ALL: [Self; 3] = [Self::Control, Self::Agent, Self::RemoteExec];

    /// Logical name used when the caller does not pick one.
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Agent => "agent",
            Self::RemoteExec => "remote-exec",
        }
    }

    /// Prefix for randomised daemon identifiers.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Control => "control-",
            Self::Agent => "agent-",
            Self::RemoteExec => "remote-exec-",
        }
    }

    /// Name of the base configuration document.
    #[must_use]
    pub const fn base_file(self) -> &'static str {
        match self {
            Self::Control => "master",
            Self::Agent => "minion",
            Self::RemoteExec => "sshd_config",
        }
    }

    /// Drop-in directory whose files override the base document.
    #[must_use]
    pub const fn overlay_dir(self) -> Option<&'static str> {
        match self {
            Self::Control => Some("master.d"),
            Self::Agent => Some("minion.d"),
            Self::RemoteExec => None,
        }
    }

    /// Document format of the base configuration.
    #[must_use]
    pub const fn format(self) -> ConfigFormat {
        match self {
            Self::Control | Self::Agent => ConfigFormat::Mapping,
            Self::RemoteExec => ConfigFormat::Directive,
        }
    }

    /// Readiness probe used unless a `DaemonSpec` supplies its own.
    #[must_use]
    pub const fn probe_kind(self) -> ProbeKind {
        match self {
            Self::Control | Self::Agent => ProbeKind::RpcHealth,
            Self::RemoteExec => ProbeKind::TcpConnect,
        }
    }

    /// Default configuration merged beneath caller overrides.
    #[must_use]
    pub fn default_config(self, defaults: &RoleDefaults<'_>) -> ConfigMap {
        match self {
            Self::Control | Self::Agent => self.mapping_defaults(defaults),
            Self::RemoteExec => sshd_defaults(defaults),
        }
    }

    fn mapping_defaults(self, defaults: &RoleDefaults<'_>) -> ConfigMap {
        let root = defaults.root;
        let mut map = ConfigMap::new();
        map.insert("id", defaults.id);
        map.insert("interface", LOOPBACK);
        map.insert("port", defaults.port);
        map.insert("root_dir", path_value(root));
        map.insert("pki_dir", path_value(&root.join("pki")));
        map.insert(
            "log_file",
            path_value(&root.join("logs").join(format!("{}.log", defaults.id))),
        );
        map.insert("log_level_logfile", "debug");
        if self == Self::Agent
            && let Some(control) = defaults.links.iter().find(|link| link.role == Self::Control)
        {
            map.insert("control_id", control.name.as_str());
            map.insert("control_host", LOOPBACK);
            map.insert("control_port", control.port);
        }
        map
    }
}

fn sshd_defaults(defaults: &RoleDefaults<'_>) -> ConfigMap {
    let mut map = ConfigMap::from_pairs([
        ("Protocol", json!("2")),
        // Strict modes off so the daemon can operate under the temp dir.
        ("StrictModes", json!("no")),
        ("SyslogFacility", json!("AUTH")),
        ("LogLevel", json!("INFO")),
        ("LoginGraceTime", json!("120")),
        ("PermitRootLogin", json!("without-password")),
        ("PubkeyAuthentication", json!("yes")),
        ("IgnoreRhosts", json!("yes")),
        ("HostbasedAuthentication", json!("no")),
        ("PermitEmptyPasswords", json!("no")),
        ("ChallengeResponseAuthentication", json!("no")),
        ("PasswordAuthentication", json!("no")),
        ("X11Forwarding", json!("no")),
        ("X11DisplayOffset", json!("10")),
        ("PrintMotd", json!("no")),
        ("PrintLastLog", json!("yes")),
        ("TCPKeepAlive", json!("yes")),
        ("AcceptEnv", json!("LANG LC_*")),
        ("UsePAM", json!("yes")),
    ]);
    map.insert("Port", defaults.port);
    map.insert("ListenAddress", LOOPBACK);
    map.insert(
        "PidFile",
        path_value(&defaults.root.join("run").join("sshd.pid")),
    );
    if let Some(sftp) = defaults.sftp_server {
        map.insert("Subsystem", format!("sftp {}", sftp.display()));
    }
    map
}

fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    fn defaults<'a>(root: &'a Path, links: &'a [LinkedDaemon]) -> RoleDefaults<'a> {
        RoleDefaults {
            id: "control-abc123",
            port: 4506,
            root,
            sftp_server: None,
            links,
        }
    }

    #[rstest]
    #[case("control", Role::Control)]
    #[case("agent", Role::Agent)]
    #[case("remote-exec", Role::RemoteExec)]
    #[case("Remote-Exec", Role::RemoteExec)]
    fn parses_kebab_case(#[case] text: &str, #[case] role: Role) {
        assert_eq!(Role::from_str(text).ok(), Some(role));
        assert_eq!(role.to_string(), text.to_ascii_lowercase());
    }

    #[test]
    fn control_defaults_listen_on_loopback() {
        let root = PathBuf::from("/tmp/drydock-test");
        let map = Role::Control.default_config(&defaults(&root, &[]));
        assert_eq!(map.get("interface"), Some(&json!("127.0.0.1")));
        assert_eq!(map.get("port"), Some(&json!(4506)));
        assert_eq!(map.get("id"), Some(&json!("control-abc123")));
        assert!(map.get("control_port").is_none());
    }

    #[test]
    fn agent_links_to_control_port() {
        let root = PathBuf::from("/tmp/drydock-test");
        let links = [LinkedDaemon {
            name: "control".to_owned(),
            role: Role::Control,
            port: 40000,
        }];
        let map = Role::Agent.default_config(&defaults(&root, &links));
        assert_eq!(map.get("control_port"), Some(&json!(40000)));
        assert_eq!(map.get("control_host"), Some(&json!("127.0.0.1")));
        assert_eq!(map.get("control_id"), Some(&json!("control")));
    }

    #[test]
    fn sshd_defaults_carry_subsystem_when_discovered() {
        let root = PathBuf::from("/tmp/drydock-test");
        let sftp = PathBuf::from("/usr/lib/openssh/sftp-server");
        let map = Role::RemoteExec.default_config(&RoleDefaults {
            sftp_server: Some(&sftp),
            ..defaults(&root, &[])
        });
        assert_eq!(
            map.get("Subsystem"),
            Some(&json!("sftp /usr/lib/openssh/sftp-server"))
        );
        assert_eq!(map.get("StrictModes"), Some(&json!("no")));
        assert_eq!(map.get("Port"), Some(&json!(4506)));
    }

    #[test]
    fn sshd_defaults_omit_subsystem_without_binary() {
        let root = PathBuf::from("/tmp/drydock-test");
        let map = Role::RemoteExec.default_config(&defaults(&root, &[]));
        assert!(map.get("Subsystem").is_none());
    }
}
