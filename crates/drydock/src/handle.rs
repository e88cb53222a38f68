//! Ownership of one spawned daemon process.
//!
//! A [`ProcessHandle`] owns the child process, the reserved port and the
//! rendered configuration directory. Every path out of `Starting` or
//! `Running` ends with the port released and the directory removed (unless
//! the materializer retains directories for debugging).

mod output;
mod state;
mod terminate;

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

pub use self::output::OutputTail;
pub use self::state::HandleState;
use self::terminate::{TerminateError, Termination};
use crate::errors::{HarnessError, StopError};
use crate::materialize::{ConfigBundle, ConfigMaterializer};
use crate::ports::PortAllocator;
use crate::probe::{ProbeOutcome, ReadinessProbe};
use crate::role::Role;
use crate::spec::DaemonSpec;

const HANDLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handle");

/// Everything needed to launch and watch the process.
#[derive(Debug)]
pub(crate) struct LaunchPlan {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub working_dir: PathBuf,
    pub probe: Arc<dyn ReadinessProbe>,
    pub probe_interval: Duration,
    pub kill_grace: Duration,
}

/// Inputs assembled by the factory before a handle exists.
#[derive(Debug)]
pub(crate) struct HandleParts {
    pub name: String,
    pub spec: DaemonSpec,
    pub port: u16,
    pub bundle: ConfigBundle,
    pub plan: LaunchPlan,
    pub ports: Arc<PortAllocator>,
    pub materializer: Arc<ConfigMaterializer>,
}

#[derive(Debug)]
struct HandleInner {
    state: HandleState,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<SystemTime>,
    port_held: bool,
    cleaned: bool,
}

/// A daemon process and the resources reserved for it.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    spec: DaemonSpec,
    port: u16,
    bundle: ConfigBundle,
    plan: LaunchPlan,
    ports: Arc<PortAllocator>,
    materializer: Arc<ConfigMaterializer>,
    inner: Mutex<HandleInner>,
}

impl ProcessHandle {
    pub(crate) fn new(parts: HandleParts) -> Self {
        let HandleParts {
            name,
            spec,
            port,
            bundle,
            plan,
            ports,
            materializer,
        } = parts;
        Self {
            name,
            spec,
            port,
            bundle,
            plan,
            ports,
            materializer,
            inner: Mutex::new(HandleInner {
                state: HandleState::Created,
                child: None,
                pid: None,
                started_at: None,
                port_held: true,
                cleaned: false,
            }),
        }
    }

    /// Logical name, unique per role within a scope.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Daemon role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.spec.role()
    }

    /// Listening port; exclusive to this handle until it stops.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Identifier written into the configuration.
    #[must_use]
    pub fn id(&self) -> &str {
        self.spec.id().unwrap_or(&self.name)
    }

    /// Resolved spec the daemon was started from.
    #[must_use]
    pub const fn spec(&self) -> &DaemonSpec {
        &self.spec
    }

    /// Rendered configuration.
    #[must_use]
    pub const fn bundle(&self) -> &ConfigBundle {
        &self.bundle
    }

    /// Directory holding the rendered documents.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.bundle.config_dir()
    }

    /// File receiving the daemon's standard output.
    #[must_use]
    pub fn stdout_log(&self) -> PathBuf {
        self.bundle.logs_dir().join(format!("{}.stdout.log", self.name))
    }

    /// File receiving the daemon's standard error.
    #[must_use]
    pub fn stderr_log(&self) -> PathBuf {
        self.bundle.logs_dir().join(format!("{}.stderr.log", self.name))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.lock().state
    }

    /// Pid of the spawned process, once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// When the process was spawned.
    #[must_use]
    pub fn started_at(&self) -> Option<SystemTime> {
        self.lock().started_at
    }

    /// Whether the process exists and has not exited. Never changes state.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.lock()
            .child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Current tail of the captured output.
    #[must_use]
    pub fn output_tail(&self) -> OutputTail {
        OutputTail::capture(&self.stdout_log(), &self.stderr_log())
    }

    /// Public host keys (`*.pub`) found in the config directory, sorted by
    /// file name.
    ///
    /// # Errors
    ///
    /// Returns IO errors from listing or reading the directory.
    pub fn host_keys(&self) -> io::Result<Vec<String>> {
        let mut paths = fs::read_dir(self.config_dir())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "pub"))
            .collect::<Vec<_>>();
        paths.sort();
        paths
            .iter()
            .map(|path| fs::read_to_string(path).map(|key| key.trim().to_owned()))
            .collect()
    }

    /// Spawns the process and blocks until it is ready or `timeout` elapses.
    ///
    /// Starting an already running handle is a no-op. The handle lock is only
    /// held for short checks while waiting, so [`Self::is_alive`],
    /// [`Self::state`] and [`Self::stop`] stay responsive during startup.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Spawn`] when the binary cannot be launched.
    /// - [`HarnessError::DaemonExited`] when the process exits before ready.
    /// - [`HarnessError::DaemonStartTimeout`] when readiness is not reached.
    /// - [`HarnessError::StartInterrupted`] when `stop` ran during startup.
    /// - [`HarnessError::InvalidState`] when the handle already stopped.
    ///
    /// On any error no process is left running and the port and directory
    /// are released. The handle ends `Failed`, or `Stopped` when a concurrent
    /// `stop` interrupted the start.
    pub fn start(&self, timeout: Duration) -> Result<(), HarnessError> {
        self.launch()?;
        let result = self.await_ready(timeout);
        if let Err(error) = &result {
            let mut inner = self.lock();
            if inner.state == HandleState::Starting {
                self.fail(&mut inner, error);
            }
        }
        result
    }

    /// Terminates the process: SIGTERM, up to `timeout` to exit, then SIGKILL.
    ///
    /// Always leaves the handle `Stopped` with its port and directory
    /// released; stopping twice is a no-op. Stopping a handle that is still
    /// starting kills the child and makes the pending `start` return
    /// [`HarnessError::StartInterrupted`].
    ///
    /// # Errors
    ///
    /// Returns the first problem met; later steps still run.
    pub fn stop(&self, timeout: Duration) -> Result<(), StopError> {
        let mut inner = self.lock();
        if inner.state == HandleState::Stopped {
            return Ok(());
        }
        let previous = inner.state;
        inner.state = HandleState::Stopping;
        debug!(
            target: HANDLE_TARGET,
            name = %self.name,
            role = %self.role(),
            from = %previous,
            "stopping daemon"
        );
        let terminated = self.terminate(&mut inner, timeout);
        inner.state = HandleState::Stopped;
        let released = self.release(&mut inner);
        info!(target: HANDLE_TARGET, name = %self.name, role = %self.role(), "daemon stopped");
        terminated.and(released)
    }

    fn lock(&self) -> MutexGuard<'_, HandleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self) -> io::Result<Child> {
        let stdout = File::create(self.stdout_log())?;
        let stderr = File::create(self.stderr_log())?;
        let mut command = Command::new(&self.plan.program);
        command
            .args(&self.plan.args)
            .current_dir(&self.plan.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        for (key, value) in &self.plan.env {
            command.env(key, value);
        }
        command.spawn()
    }

    /// Moves `Created` to `Starting` and spawns the child.
    fn launch(&self) -> Result<(), HarnessError> {
        let mut inner = self.lock();
        match inner.state {
            HandleState::Created => {}
            HandleState::Running => return Ok(()),
            state => {
                return Err(HarnessError::InvalidState {
                    name: self.name.clone(),
                    role: self.role(),
                    state,
                    operation: "start",
                });
            }
        }
        inner.state = HandleState::Starting;
        info!(
            target: HANDLE_TARGET,
            name = %self.name,
            role = %self.role(),
            port = self.port,
            program = ?self.plan.program,
            "starting daemon"
        );
        match self.spawn() {
            Ok(child) => {
                inner.pid = Some(child.id());
                inner.started_at = Some(SystemTime::now());
                inner.child = Some(child);
                Ok(())
            }
            Err(source) => {
                let error = HarnessError::Spawn {
                    name: self.name.clone(),
                    role: self.role(),
                    program: self.plan.program.clone(),
                    source,
                };
                self.fail(&mut inner, &error);
                Err(error)
            }
        }
    }

    fn await_ready(&self, timeout: Duration) -> Result<(), HarnessError> {
        let began = Instant::now();
        let deadline = began + timeout;
        let mut last = String::from("no probe attempted");
        loop {
            self.check_starting()?;
            match self.plan.probe.check() {
                ProbeOutcome::Ready => return self.mark_running(began.elapsed()),
                ProbeOutcome::NotReady(reason) => last = reason,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::DaemonStartTimeout {
                    name: self.name.clone(),
                    role: self.role(),
                    timeout,
                    probe: format!("{}: {last}", self.plan.probe.describe()),
                    output: self.output_tail(),
                });
            }
            thread::sleep(self.plan.probe_interval.min(deadline - now));
        }
    }

    /// Fails unless the handle is still starting and its child still runs.
    fn check_starting(&self) -> Result<(), HarnessError> {
        let mut inner = self.lock();
        if inner.state != HandleState::Starting {
            return Err(self.interrupted(inner.state));
        }
        let Some(child) = inner.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(HarnessError::DaemonExited {
                name: self.name.clone(),
                role: self.role(),
                status: status.to_string(),
                output: self.output_tail(),
            }),
            Err(source) => Err(HarnessError::Monitor {
                name: self.name.clone(),
                role: self.role(),
                source,
            }),
        }
    }

    fn mark_running(&self, elapsed: Duration) -> Result<(), HarnessError> {
        let mut inner = self.lock();
        if inner.state != HandleState::Starting {
            return Err(self.interrupted(inner.state));
        }
        inner.state = HandleState::Running;
        info!(
            target: HANDLE_TARGET,
            name = %self.name,
            role = %self.role(),
            pid = ?inner.pid,
            elapsed = ?elapsed,
            "daemon ready"
        );
        Ok(())
    }

    fn interrupted(&self, state: HandleState) -> HarnessError {
        HarnessError::StartInterrupted {
            name: self.name.clone(),
            role: self.role(),
            state,
        }
    }

    /// Moves to `Failed`, kills whatever is left and releases resources.
    fn fail(&self, inner: &mut HandleInner, error: &HarnessError) {
        inner.state = HandleState::Failed;
        warn!(
            target: HANDLE_TARGET,
            name = %self.name,
            role = %self.role(),
            error = %error,
            "daemon failed to start"
        );
        if let Err(stop_error) = self.terminate(inner, self.plan.kill_grace) {
            warn!(target: HANDLE_TARGET, name = %self.name, error = %stop_error, "kill after failed start");
        }
        if let Err(stop_error) = self.release(inner) {
            warn!(target: HANDLE_TARGET, name = %self.name, error = %stop_error, "cleanup after failed start");
        }
    }

    fn terminate(&self, inner: &mut HandleInner, term_wait: Duration) -> Result<(), StopError> {
        let Some(child) = inner.child.as_mut() else {
            return Ok(());
        };
        let pid = child.id();
        let outcome = terminate::terminate(child, term_wait, self.plan.kill_grace);
        // A child that may have survived stays owned so `Drop` can retry.
        if outcome.is_ok() {
            inner.child = None;
        }
        match outcome {
            Ok(Termination::Graceful) => Ok(()),
            Ok(Termination::Killed) => {
                warn!(
                    target: HANDLE_TARGET,
                    name = %self.name,
                    role = %self.role(),
                    pid,
                    "daemon ignored SIGTERM; killed"
                );
                Ok(())
            }
            Err(error) => Err(self.stop_error(pid, error)),
        }
    }

    fn stop_error(&self, pid: u32, error: TerminateError) -> StopError {
        let name = self.name.clone();
        let role = self.role();
        match error {
            TerminateError::Signal(source) => StopError::Signal {
                name,
                role,
                pid,
                source,
            },
            TerminateError::Kill(source) => StopError::Kill {
                name,
                role,
                pid,
                source,
            },
            TerminateError::Wait(source) => StopError::Wait { name, role, source },
            TerminateError::StillAlive => StopError::StillAlive {
                name,
                role,
                pid,
                grace: self.plan.kill_grace,
            },
        }
    }

    fn release(&self, inner: &mut HandleInner) -> Result<(), StopError> {
        if inner.port_held {
            self.ports.release(self.port);
            inner.port_held = false;
        }
        if inner.cleaned || self.materializer.retains() {
            return Ok(());
        }
        inner.cleaned = true;
        self.materializer
            .cleanup(&self.bundle)
            .map_err(|source| StopError::Cleanup {
                name: self.name.clone(),
                role: self.role(),
                source,
            })
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut child) = inner.child.take() {
            warn!(
                target: HANDLE_TARGET,
                name = %self.name,
                pid = child.id(),
                "handle dropped with live daemon; killing"
            );
            terminate::kill_now(&mut child);
        }
        if inner.port_held {
            self.ports.release(self.port);
            inner.port_held = false;
        }
        if !inner.cleaned && !self.materializer.retains() {
            inner.cleaned = true;
            if let Err(error) = self.materializer.cleanup(&self.bundle) {
                warn!(
                    target: HANDLE_TARGET,
                    name = %self.name,
                    role = %self.role(),
                    error = %error,
                    "cleanup on drop failed"
                );
            }
        }
    }
}
