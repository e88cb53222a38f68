//! SIGTERM-then-SIGKILL termination of a child process.

use std::io;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a termination attempt ended.
#[derive(Debug)]
pub(super) enum Termination {
    /// Exited after SIGTERM.
    Graceful,
    /// Required SIGKILL.
    Killed,
}

/// Failure modes of [`terminate`]; the caller attaches daemon identity.
#[derive(Debug)]
pub(super) enum TerminateError {
    Signal(Errno),
    Kill(io::Error),
    Wait(io::Error),
    StillAlive,
}

/// Sends SIGTERM, waits up to `term_wait`, then SIGKILLs and waits up to
/// `kill_grace`. A failed SIGTERM still escalates to SIGKILL; the signal
/// error is reported only if the process also survives the kill.
pub(super) fn terminate(
    child: &mut Child,
    term_wait: Duration,
    kill_grace: Duration,
) -> Result<Termination, TerminateError> {
    if child.try_wait().map_err(TerminateError::Wait)?.is_some() {
        return Ok(Termination::Graceful);
    }
    let signal_error = send_sigterm(child.id()).err();
    if signal_error.is_none() && wait_for_exit(child, term_wait).map_err(TerminateError::Wait)? {
        return Ok(Termination::Graceful);
    }
    match child.kill() {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::InvalidInput => {
            return Ok(Termination::Graceful);
        }
        Err(error) => {
            return Err(signal_error.map_or(TerminateError::Kill(error), TerminateError::Signal));
        }
    }
    if wait_for_exit(child, kill_grace).map_err(TerminateError::Wait)? {
        Ok(Termination::Killed)
    } else {
        Err(TerminateError::StillAlive)
    }
}

/// Kills without a graceful phase; used from `Drop`.
pub(super) fn kill_now(child: &mut Child) {
    if matches!(child.try_wait(), Ok(None)) {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn send_sigterm(pid: u32) -> Result<(), Errno> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(Errno::EINVAL);
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno),
    }
}

/// Polls until the child exits or `timeout` elapses; returns whether it exited.
fn wait_for_exit(child: &mut Child, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn sleeping_child_exits_on_sigterm() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let outcome = terminate(&mut child, Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(outcome, Ok(Termination::Graceful)), "{outcome:?}");
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn sigterm_ignoring_child_is_killed() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 0.05; done"])
            .spawn()
            .expect("spawn shell");
        thread::sleep(Duration::from_millis(100));
        let outcome = terminate(
            &mut child,
            Duration::from_millis(200),
            Duration::from_secs(2),
        );
        assert!(matches!(outcome, Ok(Termination::Killed)), "{outcome:?}");
    }

    #[test]
    fn exited_child_is_reported_graceful() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        child.wait().expect("wait");
        let outcome = terminate(&mut child, Duration::from_millis(10), Duration::from_millis(10));
        assert!(matches!(outcome, Ok(Termination::Graceful)));
    }
}
