//! The collection state machine.
//!
//! ```text
//!  STARTING ──launch ok──► RUNNING ──end of stream──► DRAINING ──► STOPPED
//!     │                     │  ▲                                      ▲
//!     │                     └──┘ line / would-block                   │
//!     └──────────────launch error──────────────────────────────────────┘
//! ```
//!
//! While running, each line is parsed; data rows are written to every node
//! whose CPU-set key prefixes the row's key, everything else is skipped.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{LaunchError, Result};
use crate::parser::{self, VARIANT_COUNT};
use crate::registry::MetricRegistry;
use crate::sink::MetricsSink;
use crate::supervisor::{LineSource, ReadOutcome};
use crate::topology::TopologyEntry;

/// Lifecycle of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Timing knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Polling interval of the exporter (and the monitoring tool).
    pub interval: Duration,
    /// Lower bound of the sleep after an empty read.
    pub backoff_floor: Duration,
    /// How long a single read waits for a line.
    pub poll_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            backoff_floor: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl LoopConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Sleep after an empty read: a tenth of the interval, at least the floor.
    pub fn backoff(&self) -> Duration {
        (self.interval / 10).max(self.backoff_floor)
    }
}

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopReport {
    /// Lines read from the source.
    pub lines: u64,
    /// Lines parsed as data rows.
    pub samples: u64,
    /// Lines that were not data.
    pub skipped: u64,
    /// Individual series writes.
    pub updates: u64,
}

/// Reads the monitoring stream and keeps the registry current.
pub struct CollectionLoop<'a, S: MetricsSink> {
    topology: &'a [TopologyEntry],
    registry: &'a MetricRegistry<S>,
    config: LoopConfig,
    state: LoopState,
    report: LoopReport,
}

impl<'a, S: MetricsSink> CollectionLoop<'a, S> {
    pub fn new(
        topology: &'a [TopologyEntry],
        registry: &'a MetricRegistry<S>,
        config: LoopConfig,
    ) -> Self {
        Self {
            topology,
            registry,
            config,
            state: LoopState::Starting,
            report: LoopReport::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn report(&self) -> &LoopReport {
        &self.report
    }

    /// Launches the source with `start` and consumes it until end of stream.
    ///
    /// Launch failures and registry inconsistencies are returned as errors;
    /// end of stream is a normal return. The source is terminated before
    /// returning in every case past a successful launch.
    pub fn run<L, F>(&mut self, start: F) -> Result<LoopReport>
    where
        L: LineSource,
        F: FnOnce() -> std::result::Result<L, LaunchError>,
    {
        self.transition(LoopState::Starting);
        let mut source = match start() {
            Ok(source) => source,
            Err(e) => {
                self.transition(LoopState::Stopped);
                return Err(e.into());
            }
        };
        self.transition(LoopState::Running);

        let result = self.drive(&mut source);
        source.terminate();
        self.transition(LoopState::Stopped);

        result.map(|()| self.report.clone())
    }

    fn drive(&mut self, source: &mut impl LineSource) -> Result<()> {
        let backoff = self.config.backoff();
        loop {
            match source.read_line(self.config.poll_timeout) {
                ReadOutcome::Line(line) => self.handle_line(&line)?,
                ReadOutcome::WouldBlock => thread::sleep(backoff),
                ReadOutcome::EndOfStream => {
                    self.transition(LoopState::Draining);
                    return Ok(());
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        self.report.lines += 1;

        let Some(sample) = parser::parse_line(line, VARIANT_COUNT) else {
            self.report.skipped += 1;
            trace!(line, "not a data row");
            return Ok(());
        };

        let updated = self.registry.apply(self.topology, &sample)?;
        self.report.samples += 1;
        self.report.updates += updated as u64;

        if self.report.samples == 1 {
            info!(
                key = %sample.source_key,
                series = updated,
                "first sample received"
            );
        } else {
            trace!(key = %sample.source_key, series = updated, "sample applied");
        }
        Ok(())
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "collection state change");
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{RecordingSink, ScriptedSource};
    use crate::registry::{SeriesLayout, Variant};
    use std::path::PathBuf;

    fn fast_config() -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(10),
            backoff_floor: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(1),
        }
    }

    fn two_nodes() -> Vec<TopologyEntry> {
        vec![TopologyEntry::new(0, "0,2"), TopologyEntry::new(1, "1,3")]
    }

    fn registry(topology: &[TopologyEntry]) -> MetricRegistry<RecordingSink> {
        MetricRegistry::initialize(
            RecordingSink::new(),
            topology,
            &Variant::ALL,
            SeriesLayout::PerSeries,
        )
        .unwrap()
    }

    #[test]
    fn test_backoff() {
        let config = LoopConfig::with_interval(Duration::from_secs(30));
        assert_eq!(config.backoff(), Duration::from_secs(3));
        let config = LoopConfig::with_interval(Duration::from_secs(5));
        assert_eq!(config.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_header_noise_data_then_stop() {
        let topology = two_nodes();
        let registry = registry(&topology);
        let source = ScriptedSource::from_lines(&[
            "    CORE   LLC[KB]   MBL[MB/s]   MBR[MB/s]   MBT[MB/s]",
            "NOTE:  Mixed use of MSR and kernel interfaces",
            "0,2 2048.0 10.0 2.0 12.0",
        ]);
        let terminations = source.termination_counter();

        let mut collection = CollectionLoop::new(&topology, &registry, fast_config());
        let report = collection.run(|| Ok(source)).unwrap();

        assert_eq!(collection.state(), LoopState::Stopped);
        assert_eq!(
            report,
            LoopReport {
                lines: 3,
                samples: 1,
                skipped: 2,
                updates: 3
            }
        );
        let sink = registry.sink();
        assert_eq!(sink.value("mbm_mem_bw_rw_cpu0_local", &[]), Some(10.0));
        assert_eq!(sink.value("mbm_mem_bw_rw_cpu0_remote", &[]), Some(2.0));
        assert_eq!(sink.value("mbm_mem_bw_rw_cpu0_all", &[]), Some(12.0));
        assert_eq!(sink.value("mbm_mem_bw_rw_cpu1_local", &[]), Some(0.0));
        assert_eq!(terminations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_would_block_keeps_running() {
        let topology = two_nodes();
        let registry = registry(&topology);
        let source = ScriptedSource::new(vec![
            ReadOutcome::WouldBlock,
            ReadOutcome::Line("1,3 0 4.0 5.0 9.0".into()),
            ReadOutcome::WouldBlock,
            ReadOutcome::WouldBlock,
            ReadOutcome::Line("1,3 0 6.0 7.0 13.0".into()),
            ReadOutcome::EndOfStream,
        ]);

        let mut collection = CollectionLoop::new(&topology, &registry, fast_config());
        let report = collection.run(|| Ok(source)).unwrap();

        assert_eq!(report.samples, 2);
        assert_eq!(report.updates, 6);
        // Latest value wins.
        assert_eq!(
            registry.sink().value("mbm_mem_bw_rw_cpu1_all", &[]),
            Some(13.0)
        );
    }

    #[test]
    fn test_unmatched_sample_counts_no_updates() {
        let topology = two_nodes();
        let registry = registry(&topology);
        let source = ScriptedSource::from_lines(&["8-15 0 1.0 2.0 3.0"]);

        let mut collection = CollectionLoop::new(&topology, &registry, fast_config());
        let report = collection.run(|| Ok(source)).unwrap();

        assert_eq!(report.samples, 1);
        assert_eq!(report.updates, 0);
    }

    #[test]
    fn test_launch_error_stops_immediately() {
        let topology = two_nodes();
        let registry = registry(&topology);

        let mut collection = CollectionLoop::new(&topology, &registry, fast_config());
        let err = collection
            .run(|| -> std::result::Result<ScriptedSource, LaunchError> {
                Err(LaunchError::NotFound {
                    path: PathBuf::from("/opt/pqos"),
                })
            })
            .unwrap_err();

        assert!(matches!(err, Error::Launch(LaunchError::NotFound { .. })));
        assert_eq!(collection.state(), LoopState::Stopped);
        assert_eq!(collection.report(), &LoopReport::default());
    }

    #[test]
    fn test_unknown_series_is_fatal_and_terminates_source() {
        // Topology used for matching has a node the registry never saw.
        let registered = vec![TopologyEntry::new(0, "0,2")];
        let registry = registry(&registered);
        let matching = vec![TopologyEntry::new(5, "0,2")];
        let source = ScriptedSource::from_lines(&["0,2 0 1.0 2.0 3.0", "0,2 0 1.0 2.0 3.0"]);
        let terminations = source.termination_counter();

        let mut collection = CollectionLoop::new(&matching, &registry, fast_config());
        let err = collection.run(|| Ok(source)).unwrap_err();

        assert!(matches!(err, Error::UnknownSeries(_)));
        assert_eq!(collection.state(), LoopState::Stopped);
        assert_eq!(collection.report().lines, 1);
        assert_eq!(terminations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
