//! mbm-core - memory bandwidth monitoring pipeline for the mbm exporter.
//!
//! Provides:
//! - `topology`: NUMA node discovery from `lscpu`
//! - `supervisor`: child process lifecycle, line streaming, shutdown
//! - `pqos`: command line for the Intel RDT monitoring tool
//! - `parser`: data row recognition
//! - `registry`: per node × variant gauge series
//! - `sink`: metrics sink trait and Prometheus binding
//! - `collection`: the state machine tying it all together
//! - `mock`: in-memory runners, sources and sinks for tests

pub mod collection;
pub mod error;
pub mod mock;
pub mod parser;
pub mod pqos;
pub mod registry;
pub mod sink;
pub mod supervisor;
pub mod topology;
pub mod traits;

pub use collection::{CollectionLoop, LoopConfig, LoopReport, LoopState};
pub use error::{Error, Result};
pub use registry::{MetricRegistry, SeriesLayout, Variant};
pub use sink::{MetricsSink, PrometheusSink};
pub use supervisor::{
    LaunchSpec, LineSource, ProcessSupervisor, ReadOutcome, SHUTDOWN_EXIT_CODE,
    ShutdownCoordinator, SupervisedProcess,
};
pub use topology::TopologyEntry;
