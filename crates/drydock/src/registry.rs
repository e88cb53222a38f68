//! Scope-bound ownership of started daemons.
//!
//! Handles are registered before they start, so a start that never returns
//! still leaves something to tear down. Teardown runs in reverse
//! registration order and attempts every handle even when earlier ones fail.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{RegistryError, TeardownErrors, TeardownFailure};
use crate::handle::ProcessHandle;
use crate::orchestrator::ScopeKind;
use crate::role::Role;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

#[derive(Debug)]
struct Entry {
    role: Role,
    name: String,
    handle: Arc<ProcessHandle>,
}

/// Handles owned by one scope, keyed by `(role, name)`.
#[derive(Debug)]
pub struct FactoryRegistry {
    scope: ScopeKind,
    entries: Mutex<Vec<Entry>>,
}

impl FactoryRegistry {
    /// Empty registry for `scope`.
    #[must_use]
    pub const fn new(scope: ScopeKind) -> Self {
        Self {
            scope,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Scope this registry belongs to.
    #[must_use]
    pub const fn scope(&self) -> ScopeKind {
        self.scope
    }

    /// Takes ownership of `handle` under `name`.
    ///
    /// An entry whose handle already stopped or failed is replaced; the new
    /// handle moves to the end of the teardown order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when a live handle holds the key.
    pub fn register(&self, name: &str, handle: Arc<ProcessHandle>) -> Result<(), RegistryError> {
        let role = handle.role();
        let mut entries = self.lock();
        if let Some(index) = entries
            .iter()
            .position(|entry| entry.role == role && entry.name == name)
        {
            if entries
                .get(index)
                .is_some_and(|entry| !entry.handle.state().is_terminal())
            {
                return Err(RegistryError::Duplicate {
                    name: name.to_owned(),
                    role,
                });
            }
            entries.remove(index);
        }
        entries.push(Entry {
            role,
            name: name.to_owned(),
            handle,
        });
        Ok(())
    }

    /// Handle registered under `(role, name)`.
    #[must_use]
    pub fn get(&self, role: Role, name: &str) -> Option<Arc<ProcessHandle>> {
        self.lock()
            .iter()
            .find(|entry| entry.role == role && entry.name == name)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Registered handles in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.lock()
            .iter()
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stops every handle, newest first, and empties the registry.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownErrors`] naming every handle whose stop reported a
    /// problem, after all handles were attempted.
    pub fn teardown_all(&self, stop_timeout: Duration) -> Result<(), TeardownErrors> {
        let drained = std::mem::take(&mut *self.lock());
        let total = drained.len();
        let mut failures = Vec::new();
        for entry in drained.into_iter().rev() {
            if let Err(error) = entry.handle.stop(stop_timeout) {
                warn!(
                    target: REGISTRY_TARGET,
                    scope = %self.scope,
                    name = %entry.name,
                    role = %entry.role,
                    error = %error,
                    "daemon teardown failed"
                );
                failures.push(TeardownFailure {
                    name: entry.name,
                    role: entry.role,
                    error,
                });
            }
        }
        info!(
            target: REGISTRY_TARGET,
            scope = %self.scope,
            stopped = total,
            failed = failures.len(),
            "scope torn down"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownErrors {
                scope: self.scope,
                failures,
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::handle::HandleState;
    use crate::spec::DaemonSpec;
    use crate::test_support::{FactoryFixture, factory_with};

    fn handle(fixture: &FactoryFixture, name: &str, role: Role) -> Arc<ProcessHandle> {
        Arc::new(
            fixture
                .factory
                .create(name, DaemonSpec::new(role))
                .expect("create handle"),
        )
    }

    #[test]
    fn live_duplicates_are_rejected() {
        let fixture = factory_with(|context| context);
        let registry = FactoryRegistry::new(ScopeKind::Module);
        registry
            .register("control", handle(&fixture, "control", Role::Control))
            .expect("first");
        let error = registry
            .register("control", handle(&fixture, "control", Role::Control))
            .expect_err("duplicate");
        assert!(matches!(error, RegistryError::Duplicate { role: Role::Control, .. }));
        registry
            .register("control", handle(&fixture, "control", Role::Agent))
            .expect("same name, other role");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn stopped_entries_are_replaced() {
        let fixture = factory_with(|context| context);
        let registry = FactoryRegistry::new(ScopeKind::Module);
        let old = handle(&fixture, "agent", Role::Agent);
        registry.register("agent", Arc::clone(&old)).expect("first");
        old.stop(Duration::from_millis(100)).expect("stop");
        let new = handle(&fixture, "agent", Role::Agent);
        registry.register("agent", Arc::clone(&new)).expect("replace");
        let current = registry.get(Role::Agent, "agent").expect("registered");
        assert!(Arc::ptr_eq(&current, &new));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn teardown_stops_and_empties() {
        let fixture = factory_with(|context| context);
        let registry = FactoryRegistry::new(ScopeKind::Session);
        let handles = ["a", "b", "c"].map(|name| handle(&fixture, name, Role::Agent));
        for handle in &handles {
            registry
                .register(handle.name(), Arc::clone(handle))
                .expect("register");
        }
        registry
            .teardown_all(Duration::from_millis(100))
            .expect("clean teardown");
        assert!(registry.is_empty());
        assert!(handles.iter().all(|handle| handle.state() == HandleState::Stopped));
        assert_eq!(fixture.ports.reserved_count(), 0);
    }
}
