//! In-memory stand-ins for testing without lscpu, pqos or a Prometheus registry.
//!
//! `MockRunner` answers topology queries from canned output, `ScriptedSource`
//! replays a fixed sequence of read outcomes and `RecordingSink` keeps every
//! gauge value in a map that tests can inspect.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SinkError;
use crate::sink::MetricsSink;
use crate::supervisor::{LineSource, ReadOutcome};
use crate::traits::CommandRunner;

/// Command runner returning canned stdout per program name.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    outputs: HashMap<String, String>,
}

impl MockRunner {
    /// Creates a runner that knows no programs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the stdout returned when `program` is run.
    pub fn with_output(mut self, program: impl Into<String>, output: impl Into<String>) -> Self {
        self.outputs.insert(program.into(), output.into());
        self
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, _args: &[&str]) -> io::Result<String> {
        self.outputs.get(program).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("mock program not found: {program}"),
            )
        })
    }
}

/// Line source replaying a fixed script.
///
/// Once the script is exhausted every read reports end of stream.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<ReadOutcome>,
    terminations: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<ReadOutcome>) -> Self {
        Self {
            script: script.into(),
            terminations: Arc::default(),
        }
    }

    /// Script made of plain lines followed by end of stream.
    pub fn from_lines(lines: &[&str]) -> Self {
        Self::new(
            lines
                .iter()
                .map(|line| ReadOutcome::Line((*line).to_string()))
                .collect(),
        )
    }

    /// Counter of `terminate` calls, usable after the source is moved.
    pub fn termination_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.terminations)
    }

    /// Outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self, _timeout: Duration) -> ReadOutcome {
        self.script.pop_front().unwrap_or(ReadOutcome::EndOfStream)
    }

    fn terminate(&mut self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Recorded {
    families: Vec<(String, usize)>,
    values: HashMap<(usize, Vec<String>), f64>,
    set_calls: usize,
}

/// Sink recording registrations and values in memory.
///
/// Families are identified by their registration index. Registering the
/// same name twice fails, as it does with a Prometheus registry.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn family_count(&self) -> usize {
        self.lock().families.len()
    }

    /// Current value of the series `name{label_values}`, if it was ever set.
    pub fn value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let recorded = self.lock();
        let family = recorded.families.iter().position(|(n, _)| n == name)?;
        let key = (family, label_values.iter().map(|v| v.to_string()).collect());
        recorded.values.get(&key).copied()
    }

    /// Number of successful `set` calls so far.
    pub fn set_calls(&self) -> usize {
        self.lock().set_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl MetricsSink for RecordingSink {
    type Family = usize;

    fn register_gauge(
        &self,
        name: &str,
        _help: &str,
        label_names: &[&str],
    ) -> Result<usize, SinkError> {
        let mut recorded = self.lock();
        if recorded.families.iter().any(|(n, _)| n == name) {
            return Err(SinkError(format!(
                "duplicate metrics collector registration attempted: {name}"
            )));
        }
        recorded.families.push((name.to_string(), label_names.len()));
        Ok(recorded.families.len() - 1)
    }

    fn set(&self, family: &usize, label_values: &[&str], value: f64) -> Result<(), SinkError> {
        let mut recorded = self.lock();
        let arity = match recorded.families.get(*family) {
            Some((_, arity)) => *arity,
            None => return Err(SinkError(format!("unknown family {family}"))),
        };
        if arity != label_values.len() {
            return Err(SinkError(format!(
                "expected {arity} label values, got {}",
                label_values.len()
            )));
        }
        let key = (*family, label_values.iter().map(|v| v.to_string()).collect());
        recorded.values.insert(key, value);
        recorded.set_calls += 1;
        Ok(())
    }
}
