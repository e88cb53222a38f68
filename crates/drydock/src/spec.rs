//! Declarative description of a daemon to start.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config_map::ConfigMap;
use crate::context::DaemonCommand;
use crate::handle::ProcessHandle;
use crate::probe::ReadinessProbe;
use crate::role::{LinkedDaemon, Role};

/// What to start: role, overrides and the optional knobs callers may pin.
///
/// Unset fields are filled in by the factory: a port is allocated, an id is
/// generated, the probe and command come from the role and harness context.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    role: Role,
    overrides: ConfigMap,
    working_dir: Option<PathBuf>,
    port: Option<u16>,
    id: Option<String>,
    links: Vec<LinkedDaemon>,
    start_timeout: Option<Duration>,
    probe: Option<Arc<dyn ReadinessProbe>>,
    command: Option<DaemonCommand>,
}

impl DaemonSpec {
    /// Spec for `role` with no overrides.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            overrides: ConfigMap::new(),
            working_dir: None,
            port: None,
            id: None,
            links: Vec::new(),
            start_timeout: None,
            probe: None,
            command: None,
        }
    }

    /// Replaces the override map.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigMap) -> Self {
        self.overrides = overrides;
        self
    }

    /// Adds one override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(key, value);
        self
    }

    /// Runs the daemon from `dir` instead of its scratch directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Pins the listening port. The port must not be reserved elsewhere.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Pins the identifier written into the configuration.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Records a dependency whose port ends up in this daemon's config.
    #[must_use]
    pub fn with_link(mut self, link: LinkedDaemon) -> Self {
        self.links.push(link);
        self
    }

    /// Records `handle` as a dependency.
    #[must_use]
    pub fn linked_to(self, handle: &ProcessHandle) -> Self {
        self.with_link(LinkedDaemon {
            name: handle.name().to_owned(),
            role: handle.role(),
            port: handle.port(),
        })
    }

    /// Overrides the harness start timeout for this daemon.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Replaces the role's default readiness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replaces the harness command for this daemon only.
    #[must_use]
    pub fn with_command(mut self, command: DaemonCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Daemon role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Caller overrides.
    #[must_use]
    pub const fn overrides(&self) -> &ConfigMap {
        &self.overrides
    }

    /// Working directory, when pinned.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Port, when pinned or once assigned.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Identifier, when pinned or once assigned.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Declared dependencies.
    #[must_use]
    pub fn links(&self) -> &[LinkedDaemon] {
        &self.links
    }

    /// Per-daemon start timeout.
    #[must_use]
    pub const fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout
    }

    /// Custom probe.
    #[must_use]
    pub fn probe(&self) -> Option<&Arc<dyn ReadinessProbe>> {
        self.probe.as_ref()
    }

    /// Per-daemon command.
    #[must_use]
    pub const fn command(&self) -> Option<&DaemonCommand> {
        self.command.as_ref()
    }

    /// Copy with the port and id the factory settled on.
    pub(crate) fn resolved(mut self, port: u16, id: String) -> Self {
        self.port = Some(port);
        self.id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_accumulates_overrides_and_links() {
        let spec = DaemonSpec::new(Role::Agent)
            .with_override("log_level", "debug")
            .with_override("multiprocessing", false)
            .with_link(LinkedDaemon {
                name: "control".to_owned(),
                role: Role::Control,
                port: 4506,
            })
            .with_start_timeout(Duration::from_secs(3));
        assert_eq!(spec.role(), Role::Agent);
        assert_eq!(spec.overrides().get("log_level"), Some(&json!("debug")));
        assert_eq!(spec.overrides().len(), 2);
        assert_eq!(spec.links().len(), 1);
        assert_eq!(spec.start_timeout(), Some(Duration::from_secs(3)));
        assert!(spec.port().is_none());
    }

    #[test]
    fn resolution_keeps_caller_fields() {
        let spec = DaemonSpec::new(Role::Control)
            .with_override("id", "fixed")
            .resolved(40123, "control-abcdef".to_owned());
        assert_eq!(spec.port(), Some(40123));
        assert_eq!(spec.id(), Some("control-abcdef"));
        assert_eq!(spec.overrides().get("id"), Some(&json!("fixed")));
    }
}
