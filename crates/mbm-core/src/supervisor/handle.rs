//! Shared, idempotently terminable handle to a child process.

use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct ChildState {
    child: Child,
    exit_status: Option<ExitStatus>,
    terminated: bool,
    /// Termination finished without a status (the child could not be reaped).
    lost: bool,
}

impl ChildState {
    /// Reaps the child if it has exited. Returns `true` while it is still running.
    ///
    /// A failed status query counts as running so termination still signals it.
    fn poll_running(&mut self) -> bool {
        if self.exit_status.is_some() || self.lost {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.child.id(), %status, "child exited");
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = self.child.id(), error = %e, "failed to query child status");
                true
            }
        }
    }
}

/// Cloneable handle to a supervised child process.
#[derive(Clone)]
pub struct ProcessHandle {
    name: Arc<str>,
    pid: u32,
    state: Arc<Mutex<ChildState>>,
}

impl ProcessHandle {
    pub(crate) fn new(name: &str, child: Child) -> Self {
        Self {
            name: name.into(),
            pid: child.id(),
            state: Arc::new(Mutex::new(ChildState {
                child,
                exit_status: None,
                terminated: false,
                lost: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, ChildState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the child is still running. Reaps it once it has exited.
    pub fn is_alive(&self) -> bool {
        self.lock().poll_running()
    }

    /// Exit status, once the child has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.lock().exit_status
    }

    /// Stops the child: SIGTERM, then SIGKILL after a grace period.
    ///
    /// Only the first call has an effect. The child is always reaped.
    pub fn terminate(&self) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;

        if !state.poll_running() {
            return;
        }

        send_sigterm(&mut state.child);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if !state.poll_running() {
                info!(pid = self.pid, "{} terminated", self.name);
                return;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(pid = self.pid, "{} ignored SIGTERM, killing", self.name);
        if let Err(e) = state.child.kill() {
            warn!(pid = self.pid, error = %e, "failed to kill {}", self.name);
        }
        match state.child.wait() {
            Ok(status) => state.exit_status = Some(status),
            Err(e) => {
                warn!(pid = self.pid, error = %e, "failed to reap {}", self.name);
                state.lost = true;
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        warn!(pid = child.id(), error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(pid = child.id(), error = %e, "failed to stop child");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    fn spawn(script: &str) -> ProcessHandle {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        ProcessHandle::new("test", child)
    }

    #[test]
    fn test_terminate_stops_running_child() {
        let handle = spawn("sleep 30");
        assert!(handle.is_alive());
        handle.terminate();
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status().unwrap().signal(), Some(15));
    }

    #[test]
    fn test_terminate_twice_is_noop() {
        let handle = spawn("sleep 30");
        handle.terminate();
        let first = handle.exit_status();
        handle.terminate();
        assert_eq!(handle.exit_status(), first);
    }

    #[test]
    fn test_terminate_after_exit() {
        let handle = spawn("exit 3");
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.terminate();
        assert_eq!(handle.exit_status().unwrap().code(), Some(3));
    }

    #[test]
    fn test_terminate_kills_after_grace() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("trap '' TERM; echo ready; sleep 30")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        // Wait until the trap is installed.
        let mut ready = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut ready)
            .unwrap();
        assert_eq!(ready.trim_end(), "ready");
        let handle = ProcessHandle::new("test", child);

        let started = Instant::now();
        handle.terminate();

        assert!(started.elapsed() >= TERMINATE_GRACE);
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status().unwrap().signal(), Some(9));
    }

    #[test]
    fn test_status_query_failure_counts_as_running() {
        use nix::sys::wait::waitpid;
        use nix::unistd::Pid;

        let handle = spawn("exit 0");
        // Reap behind the handle's back so its own status queries fail.
        waitpid(Pid::from_raw(handle.pid() as i32), None).unwrap();
        assert!(handle.is_alive());

        handle.terminate();
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = spawn("sleep 30");
        let other = handle.clone();
        other.terminate();
        assert!(!handle.is_alive());
        assert_eq!(handle.pid(), other.pid());
    }
}
