//! Builds, registers and starts daemons for one scope.
//!
//! `get_or_create` is single-flight per `(role, name)`: concurrent callers
//! asking for the same daemon wait for the first caller and then share its
//! handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::context::{CommandVars, HarnessContext};
use crate::errors::HarnessError;
use crate::handle::{HandleParts, HandleState, LaunchPlan, ProcessHandle};
use crate::materialize::{ConfigMaterializer, RenderRequest};
use crate::naming::random_name;
use crate::ports::PortAllocator;
use crate::probe::{ProbePolicy, ReadinessProbe, RpcHealthProbe, TcpConnectProbe};
use crate::registry::FactoryRegistry;
use crate::role::{ProbeKind, Role};
use crate::sftp::SFTP_SERVER_CANDIDATES;
use crate::spec::DaemonSpec;

const FACTORY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::factory");

type Slot = Arc<Mutex<()>>;

/// Creates daemons and hands them to a [`FactoryRegistry`].
#[derive(Debug)]
pub struct DaemonFactory {
    context: Arc<HarnessContext>,
    ports: Arc<PortAllocator>,
    materializer: Arc<ConfigMaterializer>,
    registry: Arc<FactoryRegistry>,
    slots: Mutex<HashMap<(Role, String), Slot>>,
}

impl DaemonFactory {
    /// Factory sharing the session's allocator and materializer.
    #[must_use]
    pub fn new(
        context: Arc<HarnessContext>,
        ports: Arc<PortAllocator>,
        materializer: Arc<ConfigMaterializer>,
        registry: Arc<FactoryRegistry>,
    ) -> Self {
        Self {
            context,
            ports,
            materializer,
            registry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registry receiving the handles.
    #[must_use]
    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    /// Returns the running handle for `(spec.role(), name)` or starts a new
    /// one.
    ///
    /// A running handle is returned as is, even when `spec` carries
    /// different overrides (a warning is logged). A registered handle whose
    /// process died is stopped and replaced.
    ///
    /// # Errors
    ///
    /// Port, render, spawn and readiness failures. The handle is registered
    /// before it starts, so a failed start is still torn down with the scope.
    pub fn get_or_create(
        &self,
        name: &str,
        spec: DaemonSpec,
    ) -> Result<Arc<ProcessHandle>, HarnessError> {
        let role = spec.role();
        let slot = self.slot(role, name);
        let _flight = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.registry.get(role, name) {
            if existing.state() == HandleState::Running && existing.is_alive() {
                if existing.spec().overrides() != spec.overrides() {
                    warn!(
                        target: FACTORY_TARGET,
                        name,
                        role = %role,
                        "daemon already running with different overrides; reusing it"
                    );
                }
                debug!(target: FACTORY_TARGET, name, role = %role, "reusing running daemon");
                return Ok(existing);
            }
            if let Err(error) = existing.stop(self.context.stop_timeout()) {
                warn!(
                    target: FACTORY_TARGET,
                    name,
                    role = %role,
                    error = %error,
                    "failed to clean up stale daemon"
                );
            }
        }
        let timeout = spec
            .start_timeout()
            .unwrap_or_else(|| self.context.start_timeout());
        let handle = Arc::new(self.create(name, spec)?);
        self.registry.register(name, Arc::clone(&handle))?;
        handle.start(timeout)?;
        Ok(handle)
    }

    fn slot(&self, role: Role, name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry((role, name.to_owned())).or_default())
    }

    pub(crate) fn create(&self, name: &str, spec: DaemonSpec) -> Result<ProcessHandle, HarnessError> {
        let role = spec.role();
        if role == Role::RemoteExec
            && self.context.sftp_required()
            && self.context.sftp_server().is_none()
        {
            return Err(HarnessError::SftpServerNotFound {
                searched: SFTP_SERVER_CANDIDATES.iter().map(PathBuf::from).collect(),
            });
        }
        let port = match spec.port() {
            Some(port) => self.ports.reserve(port)?,
            None => self.ports.allocate()?,
        };
        let id = spec
            .id()
            .map_or_else(|| random_name(role.id_prefix()), str::to_owned);
        let spec = spec.resolved(port, id.clone());
        let request = RenderRequest {
            name,
            id: &id,
            role,
            port,
            overrides: spec.overrides(),
            links: spec.links(),
            sftp_server: self.context.sftp_server(),
        };
        let bundle = match self.materializer.render(&request) {
            Ok(bundle) => bundle,
            Err(source) => {
                self.ports.release(port);
                return Err(HarnessError::ConfigRender {
                    name: name.to_owned(),
                    role,
                    source,
                });
            }
        };
        let command = spec
            .command()
            .cloned()
            .unwrap_or_else(|| self.context.command(role));
        let args = command.resolve(&CommandVars {
            name,
            role,
            port,
            root: bundle.root(),
            config_dir: bundle.config_dir(),
            config_file: bundle.base_file(),
        });
        let policy = self.context.probe_policy();
        let plan = LaunchPlan {
            program: command.program().to_os_string(),
            args,
            env: self.context.daemon_env(),
            working_dir: spec
                .working_dir()
                .map_or_else(|| bundle.root().to_path_buf(), Path::to_path_buf),
            probe: spec
                .probe()
                .cloned()
                .unwrap_or_else(|| default_probe(role, port, policy)),
            probe_interval: policy.interval,
            kill_grace: self.context.config().kill_grace(),
        };
        Ok(ProcessHandle::new(HandleParts {
            name: name.to_owned(),
            spec,
            port,
            bundle,
            plan,
            ports: Arc::clone(&self.ports),
            materializer: Arc::clone(&self.materializer),
        }))
    }
}

fn default_probe(role: Role, port: u16, policy: ProbePolicy) -> Arc<dyn ReadinessProbe> {
    match role.probe_kind() {
        ProbeKind::RpcHealth => Arc::new(RpcHealthProbe::loopback(port, policy.attempt_timeout)),
        ProbeKind::TcpConnect => Arc::new(TcpConnectProbe::loopback(port, policy.attempt_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use serde_json::json;

    use super::*;
    use crate::errors::ConfigRenderError;
    use crate::test_support::factory_with;

    #[test]
    fn create_reserves_port_and_renders_config() {
        let fixture = factory_with(|context| context);
        let handle = fixture
            .factory
            .create("control", DaemonSpec::new(Role::Control))
            .expect("create");
        assert_eq!(handle.state(), HandleState::Created);
        assert!(fixture.ports.is_reserved(handle.port()));
        assert!(handle.id().starts_with("control-"));
        assert!(handle.bundle().base_file().is_file());
        assert!(handle.config_dir().starts_with(fixture.dir.path()));
    }

    #[test]
    fn pinned_port_in_use_is_rejected() {
        let fixture = factory_with(|context| context);
        let first = fixture
            .factory
            .create("a", DaemonSpec::new(Role::Agent))
            .expect("first");
        let error = fixture
            .factory
            .create("b", DaemonSpec::new(Role::Agent).with_port(first.port()))
            .expect_err("port taken");
        assert!(matches!(error, HarnessError::PortInUse { port } if port == first.port()));
    }

    #[test]
    fn render_failure_releases_the_port() {
        let fixture = factory_with(|context| context);
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let spec = DaemonSpec::new(Role::RemoteExec)
            .with_port(port)
            .with_override("Match", json!({"User": "ci"}));
        let error = fixture.factory.create("sshd", spec).expect_err("render fails");
        assert!(matches!(
            error,
            HarnessError::ConfigRender {
                source: ConfigRenderError::UnsupportedValue { .. },
                ..
            }
        ));
        assert!(!fixture.ports.is_reserved(port));
    }

    #[test]
    fn required_sftp_binary_must_exist() {
        let fixture = factory_with(|context| context.require_sftp(true));
        let error = fixture
            .factory
            .create("sshd", DaemonSpec::new(Role::RemoteExec))
            .expect_err("no sftp-server");
        assert!(matches!(error, HarnessError::SftpServerNotFound { .. }));
        assert_eq!(fixture.ports.reserved_count(), 0);
    }

    #[test]
    fn dropping_an_unstarted_handle_frees_everything() {
        let fixture = factory_with(|context| context);
        let handle = fixture
            .factory
            .create("agent", DaemonSpec::new(Role::Agent))
            .expect("create");
        let root = handle.bundle().root().to_path_buf();
        drop(handle);
        assert_eq!(fixture.ports.reserved_count(), 0);
        assert!(!root.exists());
        assert!(fixture.registry.is_empty());
    }
}
