//! Lifecycle of the long-running monitoring process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── SupervisedProcess ─────────────────────────┐
//! │                                                                        │
//! │   child stdout ──► reader thread ──┐                                   │
//! │                                    ├──► bounded queue ──► read_line()  │
//! │   child stderr ──► reader thread ──┘                                   │
//! │                                                                        │
//! │   ProcessHandle (Arc<Mutex<Child>>) ◄──── ShutdownCoordinator          │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both output streams feed one queue, so callers see a single merged line
//! stream. The [`ProcessHandle`] is shared with the [`ShutdownCoordinator`]
//! so a signal handler can stop the child while the collection loop owns
//! the stream.

mod handle;
mod reader;
mod shutdown;

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::LaunchError;

pub use handle::ProcessHandle;
pub use shutdown::{SHUTDOWN_EXIT_CODE, ShutdownCoordinator};

/// Maximum number of lines buffered between the reader threads and the loop.
const LINE_QUEUE_CAPACITY: usize = 1024;

/// Result of a single [`LineSource::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line, without its trailing newline.
    Line(String),
    /// No complete line within the timeout; the source is still alive.
    WouldBlock,
    /// The stream is closed and the producing process has exited.
    EndOfStream,
}

/// A stream of output lines that can be stopped.
pub trait LineSource {
    /// Waits up to `timeout` for the next line.
    fn read_line(&mut self, timeout: Duration) -> ReadOutcome;

    /// Stops the producer. Safe to call more than once.
    fn terminate(&mut self);
}

/// Program, arguments and environment overrides for the monitoring process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Applied on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Shell-like rendering: `KEY=value program arg ...`.
impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key.to_string_lossy(), value.to_string_lossy())?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Starts monitoring processes and registers them for shutdown.
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    coordinator: ShutdownCoordinator,
}

impl ProcessSupervisor {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Spawns `spec` with stdout and stderr merged into one line stream and
    /// registers it under `name` with the shutdown coordinator.
    pub fn start(&self, name: &str, spec: &LaunchSpec) -> Result<SupervisedProcess, LaunchError> {
        info!(command = %spec, "starting {}", name);

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => LaunchError::NotFound {
                    path: spec.program.clone(),
                },
                _ => LaunchError::Spawn {
                    path: spec.program.clone(),
                    source,
                },
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let handle = ProcessHandle::new(name, child);

        let (tx, rx) = mpsc::sync_channel(LINE_QUEUE_CAPACITY);
        if let Err(source) = spawn_output_readers(name, stdout, stderr, tx) {
            return Err(abort_launch(&handle, &spec.program, source));
        }

        debug!(pid = handle.pid(), "{} started", name);
        self.coordinator.register(name, handle.clone());

        Ok(SupervisedProcess { handle, lines: rx })
    }
}

fn spawn_output_readers(
    name: &str,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    tx: SyncSender<String>,
) -> io::Result<()> {
    if let Some(stdout) = stdout {
        reader::spawn_reader(format!("{}-stdout", name), stdout, tx.clone())?;
    }
    if let Some(stderr) = stderr {
        reader::spawn_reader(format!("{}-stderr", name), stderr, tx)?;
    }
    Ok(())
}

/// Stops a child whose output cannot be read and reports the launch as failed.
fn abort_launch(handle: &ProcessHandle, program: &Path, source: io::Error) -> LaunchError {
    warn!(pid = handle.pid(), error = %source, "failed to start output readers");
    handle.terminate();
    LaunchError::Spawn {
        path: program.to_path_buf(),
        source,
    }
}

/// A running monitoring process and its merged output stream.
///
/// The child is terminated when this value is dropped.
pub struct SupervisedProcess {
    handle: ProcessHandle,
    lines: Receiver<String>,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }
}

impl LineSource for SupervisedProcess {
    fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => ReadOutcome::Line(line),
            Err(RecvTimeoutError::Timeout) => ReadOutcome::WouldBlock,
            // Both pipes closed: only over once the child is gone too.
            Err(RecvTimeoutError::Disconnected) => {
                if self.handle.is_alive() {
                    ReadOutcome::WouldBlock
                } else {
                    ReadOutcome::EndOfStream
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.handle.terminate();
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.handle.terminate();
    }
}
