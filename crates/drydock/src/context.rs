//! Session-wide context handed to the orchestrator.
//!
//! Built once per test session from the resolved [`Config`] and the test
//! selection flags; read-only afterwards.

use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use drydock_config::{Config, TestSelection, running_under_ci};

use crate::probe::ProbePolicy;
use crate::role::Role;
use crate::sftp;

/// Environment variables forwarded to daemons when set in the harness.
pub const INHERITED_ENV_VARS: &[&str] = &["COVERAGE_PROCESS_START"];

/// Program and argument template used to launch a role.
///
/// Arguments may contain `{config_dir}`, `{config_file}`, `{port}`,
/// `{name}`, `{role}` and `{root}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    program: OsString,
    args: Vec<String>,
}

/// Values substituted into a [`DaemonCommand`] template.
#[derive(Debug, Clone, Copy)]
pub struct CommandVars<'a> {
    /// Logical daemon name.
    pub name: &'a str,
    /// Daemon role.
    pub role: Role,
    /// Listening port.
    pub port: u16,
    /// Scratch root of the daemon.
    pub root: &'a Path,
    /// Directory holding the rendered documents.
    pub config_dir: &'a Path,
    /// Base document.
    pub config_file: &'a Path,
}

impl DaemonCommand {
    /// Command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument template.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several argument templates.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Stock launch command for a role.
    #[must_use]
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::Control => Self::new("salt-master").args(["-c", "{config_dir}"]),
            Role::Agent => Self::new("salt-minion").args(["-c", "{config_dir}"]),
            Role::RemoteExec => Self::new("sshd").args(["-D", "-e", "-f", "{config_file}"]),
        }
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Unexpanded argument templates.
    #[must_use]
    pub fn arg_templates(&self) -> &[String] {
        &self.args
    }

    /// Arguments with every placeholder expanded.
    #[must_use]
    pub fn resolve(&self, vars: &CommandVars<'_>) -> Vec<OsString> {
        let port = vars.port.to_string();
        let role = vars.role.to_string();
        let config_dir = vars.config_dir.display().to_string();
        let config_file = vars.config_file.display().to_string();
        let root = vars.root.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                OsString::from(
                    arg.replace("{config_dir}", &config_dir)
                        .replace("{config_file}", &config_file)
                        .replace("{port}", &port)
                        .replace("{name}", vars.name)
                        .replace("{role}", &role)
                        .replace("{root}", &root),
                )
            })
            .collect()
    }
}

/// Immutable session context: configuration, CI flag, selection flags,
/// launch commands and the environment forwarded to daemons.
#[derive(Debug, Clone)]
pub struct HarnessContext {
    config: Config,
    ci: bool,
    selection: TestSelection,
    commands: BTreeMap<Role, DaemonCommand>,
    env: Vec<(OsString, OsString)>,
    sftp_server: Option<PathBuf>,
    require_sftp: bool,
}

impl HarnessContext {
    /// Builds the context, detecting CI from the environment and looking for
    /// an SFTP subsystem binary.
    #[must_use]
    pub fn from_config(config: Config, selection: TestSelection) -> Self {
        let env = INHERITED_ENV_VARS
            .iter()
            .filter_map(|key| env::var_os(key).map(|value| (OsString::from(key), value)))
            .collect();
        Self {
            config,
            ci: running_under_ci(),
            selection,
            commands: Role::ALL
                .into_iter()
                .map(|role| (role, DaemonCommand::default_for(role)))
                .collect(),
            env,
            sftp_server: sftp::discover().ok(),
            require_sftp: false,
        }
    }

    /// Overrides CI detection.
    #[must_use]
    pub const fn with_ci(mut self, ci: bool) -> Self {
        self.ci = ci;
        self
    }

    /// Replaces the launch command of `role`.
    #[must_use]
    pub fn with_command(mut self, role: Role, command: DaemonCommand) -> Self {
        self.commands.insert(role, command);
        self
    }

    /// Uses one command for every role.
    #[must_use]
    pub fn with_command_for_all(mut self, command: &DaemonCommand) -> Self {
        for role in Role::ALL {
            self.commands.insert(role, command.clone());
        }
        self
    }

    /// Forwards an extra environment variable to every daemon.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Pins the SFTP subsystem binary.
    #[must_use]
    pub fn with_sftp_server(mut self, path: Option<PathBuf>) -> Self {
        self.sftp_server = path;
        self
    }

    /// Makes remote-exec daemons fail to start without an SFTP binary.
    #[must_use]
    pub const fn require_sftp(mut self, required: bool) -> Self {
        self.require_sftp = required;
        self
    }

    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the harness runs under CI.
    #[must_use]
    pub const fn ci(&self) -> bool {
        self.ci
    }

    /// Test selection flags.
    #[must_use]
    pub const fn selection(&self) -> TestSelection {
        self.selection
    }

    /// Launch command for `role`.
    #[must_use]
    pub fn command(&self, role: Role) -> DaemonCommand {
        self.commands
            .get(&role)
            .cloned()
            .unwrap_or_else(|| DaemonCommand::default_for(role))
    }

    /// Readiness timeout: the configured override, else 120 s under CI and
    /// 60 s locally.
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        self.config.start_timeout(self.ci)
    }

    /// Graceful stop budget.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        self.config.stop_timeout()
    }

    /// Probe cadence.
    #[must_use]
    pub const fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            interval: self.config.probe_interval(),
            attempt_timeout: self.config.probe_connect_timeout(),
        }
    }

    /// SFTP subsystem binary, if one was found or pinned.
    #[must_use]
    pub fn sftp_server(&self) -> Option<&Path> {
        self.sftp_server.as_deref()
    }

    /// Whether a missing SFTP binary is fatal for remote-exec daemons.
    #[must_use]
    pub const fn sftp_required(&self) -> bool {
        self.require_sftp
    }

    /// Environment passed to every daemon: `SLOW_TESTS` plus inherited
    /// variables.
    #[must_use]
    pub fn daemon_env(&self) -> Vec<(OsString, OsString)> {
        let (key, value) = self.selection.slow_tests_env();
        let mut env = vec![(OsString::from(key), OsString::from(value))];
        env.extend(self.env.iter().cloned());
        env
    }
}
