use std::fmt;

/// Lifecycle state of a [`super::ProcessHandle`].
///
/// ```text
/// Created -> Starting -> Running -> Stopping -> Stopped
///                    \-> Failed  -/
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// Configuration rendered, port reserved, no process yet.
    Created,
    /// Process spawned, readiness not yet confirmed.
    Starting,
    /// Process alive and its readiness probe passed.
    Running,
    /// Termination in progress.
    Stopping,
    /// Process gone, port released, scratch directory removed.
    Stopped,
    /// Start failed; no process left running.
    Failed,
}

impl HandleState {
    /// Whether the handle can no longer reach `Running`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
