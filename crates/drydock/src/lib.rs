//! Ephemeral daemon orchestration for integration tests.
//!
//! Tests ask a [`Scope`] for a daemon by role; the harness allocates a free
//! loopback port, renders the role's configuration into a unique scratch
//! directory, spawns the binary and blocks until a readiness probe passes.
//! Handles are shared as [`Arc`](std::sync::Arc)s: asking again for the same
//! name in the same scope returns the same process.
//!
//! ```text
//! HarnessContext -> Orchestrator -> Scope -> DaemonFactory -> ProcessHandle
//!                        |                        |
//!                   PortAllocator           FactoryRegistry
//!                   ConfigMaterializer
//! ```
//!
//! Teardown runs in reverse start order when a scope is torn down or
//! dropped. Every handle is attempted even if an earlier one fails, and all
//! failures are reported together as [`TeardownErrors`].

mod config_map;
mod context;
mod errors;
mod factory;
mod graph;
mod handle;
mod materialize;
mod naming;
mod orchestrator;
mod ports;
mod probe;
pub mod protocol;
mod registry;
mod role;
pub mod roster;
pub mod sftp;
mod spec;
pub mod telemetry;
#[cfg(test)]
mod test_support;
mod user;

pub use config_map::{ConfigFormat, ConfigMap};
pub use context::{CommandVars, DaemonCommand, HarnessContext, INHERITED_ENV_VARS};
pub use errors::{
    ConfigRenderError, GraphError, HarnessError, RegistryError, StopError, TeardownErrors,
    TeardownFailure,
};
pub use factory::DaemonFactory;
pub use graph::{DaemonGraph, GraphNode};
pub use handle::{HandleState, OutputTail, ProcessHandle};
pub use materialize::{ConfigBundle, ConfigMaterializer, RenderRequest, RenderedFile};
pub use naming::random_name;
pub use orchestrator::{Orchestrator, Scope, ScopeKind};
pub use ports::PortAllocator;
pub use probe::{ProbeOutcome, ProbePolicy, ReadinessProbe, RpcHealthProbe, TcpConnectProbe};
pub use registry::FactoryRegistry;
pub use role::{LinkedDaemon, ProbeKind, Role, RoleDefaults};
pub use spec::DaemonSpec;
pub use user::current_user;

pub use drydock_config::{Config, LogFormat, Selection, TestSelection};
