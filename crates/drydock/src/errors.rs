//! Error taxonomy for the harness.
//!
//! Every variant that concerns a daemon names it and its role so a failing
//! test points straight at the offending process.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

use crate::handle::{HandleState, OutputTail};
use crate::orchestrator::ScopeKind;
use crate::role::Role;

/// Errors raised while writing or removing rendered configuration.
#[derive(Debug, Error)]
pub enum ConfigRenderError {
    /// The unique per-daemon directory could not be created.
    #[error("failed to create config directory under {root:?}: {source}")]
    CreateDir {
        /// Parent directory.
        root: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A rendered file could not be written.
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The value cannot be expressed in the target format.
    #[error("cannot render key '{key}': {kind} values are not supported by this format")]
    UnsupportedValue {
        /// Offending key.
        key: String,
        /// Kind of value that was rejected.
        kind: &'static str,
    },
    /// Overlay requested for a role without a drop-in directory.
    #[error("role {role} has no overlay directory")]
    NoOverlayDir {
        /// Role lacking the overlay directory.
        role: Role,
    },
    /// A relative file name escaped the config directory.
    #[error("config file name {name:?} must be a relative path inside the config directory")]
    InvalidFileName {
        /// Rejected name.
        name: String,
    },
    /// The directory could not be removed.
    #[error("failed to remove config directory {path:?}: {source}")]
    Remove {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Problems met while stopping a daemon. The handle still reaches `Stopped`.
#[derive(Debug, Error)]
pub enum StopError {
    /// SIGTERM could not be delivered.
    #[error("failed to send SIGTERM to {role} daemon '{name}' (pid {pid}): {source}")]
    Signal {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Target pid.
        pid: u32,
        /// OS error.
        #[source]
        source: Errno,
    },
    /// SIGKILL could not be delivered.
    #[error("failed to kill {role} daemon '{name}' (pid {pid}): {source}")]
    Kill {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Target pid.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Polling the child for exit failed.
    #[error("failed to wait on {role} daemon '{name}': {source}")]
    Wait {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The process survived SIGKILL for the whole grace period.
    #[error("{role} daemon '{name}' (pid {pid}) still alive {grace:?} after SIGKILL")]
    StillAlive {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Target pid.
        pid: u32,
        /// Grace period waited.
        grace: Duration,
    },
    /// Removing the configuration directory failed.
    #[error("failed to clean up config for {role} daemon '{name}': {source}")]
    Cleanup {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Underlying cleanup error.
        #[source]
        source: ConfigRenderError,
    },
}

/// One handle whose teardown reported a problem.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Daemon name.
    pub name: String,
    /// Daemon role.
    pub role: Role,
    /// What went wrong.
    pub error: StopError,
}

/// Aggregate of every teardown failure in a scope.
#[derive(Debug)]
pub struct TeardownErrors {
    /// Scope being torn down.
    pub scope: ScopeKind,
    /// Failures in teardown order.
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownErrors {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} daemon(s) failed to tear down in {} scope",
            self.failures.len(),
            self.scope
        )?;
        for failure in &self.failures {
            write!(
                formatter,
                "; {} ({}): {}",
                failure.name, failure.role, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownErrors {}

/// Errors raised by the scope registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A live handle is already registered under the key.
    #[error("{role} daemon '{name}' is already registered in this scope")]
    Duplicate {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
    },
}

/// Errors raised while ordering a dependency graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share a name.
    #[error("daemon '{name}' is declared twice in the dependency graph")]
    DuplicateNode {
        /// Repeated name.
        name: String,
    },
    /// A node depends on a name that is not declared.
    #[error("daemon '{node}' depends on undeclared daemon '{dependency}'")]
    UnknownDependency {
        /// Dependent node.
        node: String,
        /// Missing dependency.
        dependency: String,
    },
    /// The graph contains a cycle.
    #[error("dependency cycle between daemons: {}", .nodes.join(", "))]
    Cycle {
        /// Nodes that could not be ordered.
        nodes: Vec<String>,
    },
}

/// Top-level harness error.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// No free port could be reserved.
    #[error("no free port after {attempts} attempt(s)")]
    PortExhaustion {
        /// Attempts made.
        attempts: u32,
        /// Last bind error, when one occurred.
        #[source]
        last_error: Option<io::Error>,
    },
    /// An explicitly requested port is reserved by another handle.
    #[error("port {port} is already reserved by another daemon")]
    PortInUse {
        /// Requested port.
        port: u16,
    },
    /// Configuration could not be rendered; no process was spawned.
    #[error("failed to render config for {role} daemon '{name}': {source}")]
    ConfigRender {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Underlying render error.
        #[source]
        source: ConfigRenderError,
    },
    /// The daemon binary could not be launched.
    #[error("failed to launch {role} daemon '{name}' from {program:?}: {source}")]
    Spawn {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Program that failed to launch.
        program: OsString,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Readiness was not reached in time; the process was killed.
    #[error("{role} daemon '{name}' not ready within {timeout:?} ({probe}){output}")]
    DaemonStartTimeout {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Timeout that elapsed.
        timeout: Duration,
        /// Last probe observation.
        probe: String,
        /// Captured output tail.
        output: OutputTail,
    },
    /// The process exited before it became ready.
    #[error("{role} daemon '{name}' exited before becoming ready ({status}){output}")]
    DaemonExited {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Exit status description.
        status: String,
        /// Captured output tail.
        output: OutputTail,
    },
    /// `stop` ran while the daemon was still starting; the handle is stopped.
    #[error("start of {role} daemon '{name}' interrupted; handle is {state}")]
    StartInterrupted {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// State the handle was moved to.
        state: HandleState,
    },
    /// Polling the child process failed.
    #[error("failed to monitor {role} daemon '{name}': {source}")]
    Monitor {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The handle is not in a state that allows the operation.
    #[error("cannot {operation} {role} daemon '{name}' in state {state}")]
    InvalidState {
        /// Daemon name.
        name: String,
        /// Daemon role.
        role: Role,
        /// Current state.
        state: HandleState,
        /// Attempted operation.
        operation: &'static str,
    },
    /// Registry rejected the handle.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Dependency graph could not be ordered.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// One or more daemons failed to tear down.
    #[error(transparent)]
    Teardown(#[from] TeardownErrors),
    /// No SFTP subsystem binary exists at any known location.
    #[error("failed to find 'sftp-server'; searched: {}", display_paths(.searched))]
    SftpServerNotFound {
        /// Candidates checked, in order.
        searched: Vec<PathBuf>,
    },
    /// Looking up the current user failed.
    #[error("failed to look up user for uid {uid}: {source}")]
    CurrentUser {
        /// Effective uid.
        uid: u32,
        /// OS error.
        #[source]
        source: Errno,
    },
    /// The current uid has no passwd entry.
    #[error("no user entry for uid {uid}")]
    UnknownUser {
        /// Effective uid.
        uid: u32,
    },
    /// A scoped root directory could not be prepared.
    #[error("failed to prepare root directory {path:?}: {source}")]
    RootDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a roster or known-hosts document failed.
    #[error("failed to write {document}: {source}")]
    Document {
        /// Which document.
        document: &'static str,
        /// Underlying render error.
        #[source]
        source: ConfigRenderError,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
