//! Entry point tying the harness together.
//!
//! An [`Orchestrator`] is created once per test session from a
//! [`HarnessContext`]. Each fixture scope (session, module, function) opens a
//! [`Scope`]; daemons started through a scope live until it is torn down or
//! dropped.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strum::Display;
use tracing::{debug, info, warn};

use crate::config_map::ConfigMap;
use crate::context::HarnessContext;
use crate::errors::{HarnessError, TeardownErrors};
use crate::factory::DaemonFactory;
use crate::graph::DaemonGraph;
use crate::handle::ProcessHandle;
use crate::materialize::ConfigMaterializer;
use crate::ports::PortAllocator;
use crate::registry::FactoryRegistry;
use crate::role::Role;
use crate::roster::{self, RemoteExecAccess};
use crate::spec::DaemonSpec;

const ORCHESTRATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::orchestrator");

/// Lifetime of the daemons started through a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    /// Whole test session.
    Session,
    /// One test module.
    Module,
    /// One test function.
    Function,
}

/// Session-wide owner of the port allocator and config materializer.
#[derive(Debug)]
pub struct Orchestrator {
    context: Arc<HarnessContext>,
    ports: Arc<PortAllocator>,
    materializer: Arc<ConfigMaterializer>,
    root_dirs: Mutex<Vec<PathBuf>>,
}

impl Orchestrator {
    /// Builds the shared resources from `context`.
    #[must_use]
    pub fn new(context: HarnessContext) -> Self {
        let config = context.config();
        let ports = Arc::new(PortAllocator::new(config.port_attempts()));
        let materializer = Arc::new(ConfigMaterializer::new(
            config.root_dir(),
            config.retain_config_dirs(),
        ));
        info!(
            target: ORCHESTRATOR_TARGET,
            root = %materializer.root().display(),
            ci = context.ci(),
            start_timeout = ?context.start_timeout(),
            "orchestrator ready"
        );
        Self {
            context: Arc::new(context),
            ports,
            materializer,
            root_dirs: Mutex::new(Vec::new()),
        }
    }

    /// Session context.
    #[must_use]
    pub fn context(&self) -> &HarnessContext {
        &self.context
    }

    /// Shared port allocator.
    #[must_use]
    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Shared config materializer.
    #[must_use]
    pub fn materializer(&self) -> &Arc<ConfigMaterializer> {
        &self.materializer
    }

    /// Opens a scope whose daemons are torn down together.
    #[must_use]
    pub fn scope(&self, kind: ScopeKind) -> Scope {
        let registry = Arc::new(FactoryRegistry::new(kind));
        let factory = DaemonFactory::new(
            Arc::clone(&self.context),
            Arc::clone(&self.ports),
            Arc::clone(&self.materializer),
            Arc::clone(&registry),
        );
        debug!(target: ORCHESTRATOR_TARGET, scope = %kind, "scope opened");
        Scope {
            kind,
            registry,
            factory,
            materializer: Arc::clone(&self.materializer),
            stop_timeout: self.context.stop_timeout(),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Creates (or returns) a per-daemon root directory removed when the
    /// orchestrator drops.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::RootDir`] when the directory cannot be created.
    pub fn root_dir_for(&self, name: &str) -> Result<PathBuf, HarnessError> {
        let path = self.materializer.root().join(format!("drydock-root-{name}"));
        fs::create_dir_all(&path).map_err(|source| HarnessError::RootDir {
            path: path.clone(),
            source,
        })?;
        let mut dirs = self.root_dirs.lock().unwrap_or_else(PoisonError::into_inner);
        if !dirs.contains(&path) {
            dirs.push(path.clone());
        }
        Ok(path)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.materializer.retains() {
            return;
        }
        let dirs = self.root_dirs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for dir in dirs.drain(..) {
            if let Err(error) = fs::remove_dir_all(&dir) {
                warn!(
                    target: ORCHESTRATOR_TARGET,
                    dir = %dir.display(),
                    error = %error,
                    "failed to remove root directory"
                );
            }
        }
    }
}

/// Daemons sharing one fixture lifetime.
///
/// Dropping a scope that was not torn down explicitly tears it down and logs
/// any failures.
#[derive(Debug)]
pub struct Scope {
    kind: ScopeKind,
    registry: Arc<FactoryRegistry>,
    factory: DaemonFactory,
    materializer: Arc<ConfigMaterializer>,
    stop_timeout: Duration,
    torn_down: AtomicBool,
}

impl Scope {
    /// Scope lifetime.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Handles owned by this scope.
    #[must_use]
    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    /// Running daemon for `role` under its default name, started on first
    /// use.
    ///
    /// # Errors
    ///
    /// See [`DaemonFactory::get_or_create`].
    pub fn get_or_start(
        &self,
        role: Role,
        overrides: ConfigMap,
    ) -> Result<Arc<ProcessHandle>, HarnessError> {
        self.get_or_start_named(role.default_name(), role, overrides)
    }

    /// Running daemon `name` of `role`, started on first use.
    ///
    /// # Errors
    ///
    /// See [`DaemonFactory::get_or_create`].
    pub fn get_or_start_named(
        &self,
        name: &str,
        role: Role,
        overrides: ConfigMap,
    ) -> Result<Arc<ProcessHandle>, HarnessError> {
        self.start(name, DaemonSpec::new(role).with_overrides(overrides))
    }

    /// Running daemon `name` described by `spec`, started on first use.
    ///
    /// # Errors
    ///
    /// See [`DaemonFactory::get_or_create`].
    pub fn start(&self, name: &str, spec: DaemonSpec) -> Result<Arc<ProcessHandle>, HarnessError> {
        self.factory.get_or_create(name, spec)
    }

    /// Starts every node of `graph`, dependencies first, linking each node
    /// to the handles it depends on.
    ///
    /// # Errors
    ///
    /// Graph errors before anything starts, otherwise the first start
    /// failure. Daemons already started stay registered for teardown.
    pub fn start_graph(
        &self,
        graph: &DaemonGraph,
    ) -> Result<BTreeMap<String, Arc<ProcessHandle>>, HarnessError> {
        let order = graph.start_order()?;
        let mut started: BTreeMap<String, Arc<ProcessHandle>> = BTreeMap::new();
        for node in order {
            let mut spec = node.spec().clone();
            for dependency in node.depends_on() {
                if let Some(handle) = started.get(dependency) {
                    spec = spec.linked_to(handle);
                }
            }
            let handle = self.start(node.name(), spec)?;
            started.insert(node.name().to_owned(), handle);
        }
        Ok(started)
    }

    /// Writes known hosts and a roster so `control` can reach `remote`.
    ///
    /// # Errors
    ///
    /// See [`roster::provision_remote_exec`].
    pub fn provision_remote_exec(
        &self,
        control: &ProcessHandle,
        remote: &ProcessHandle,
    ) -> Result<RemoteExecAccess, HarnessError> {
        roster::provision_remote_exec(&self.materializer, control, remote)
    }

    /// Stops every daemon in reverse start order.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownErrors`] after every daemon was attempted.
    pub fn teardown(&self) -> Result<(), TeardownErrors> {
        self.torn_down.store(true, Ordering::SeqCst);
        self.registry.teardown_all(self.stop_timeout)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.torn_down.load(Ordering::SeqCst) && self.registry.is_empty() {
            return;
        }
        if let Err(errors) = self.teardown() {
            warn!(
                target: ORCHESTRATOR_TARGET,
                scope = %self.kind,
                error = %errors,
                "teardown on drop reported failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ScopeKind::Session, "session")]
    #[case(ScopeKind::Module, "module")]
    #[case(ScopeKind::Function, "function")]
    fn scope_kinds_render_lowercase(#[case] kind: ScopeKind, #[case] expected: &str) {
        assert_eq!(kind.to_string(), expected);
    }
}
