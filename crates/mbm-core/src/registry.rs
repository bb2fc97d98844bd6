//! Stable mapping from (NUMA node, bandwidth variant) to exported series.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, UnknownSeriesError};
use crate::parser::Sample;
use crate::sink::MetricsSink;
use crate::topology::TopologyEntry;

/// Memory-bandwidth direction measured for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    Local,
    Remote,
    All,
}

impl Variant {
    /// Order in which the monitoring tool prints the values.
    pub const ALL: [Variant; 3] = [Variant::Local, Variant::Remote, Variant::All];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Local => "local",
            Variant::Remote => "remote",
            Variant::All => "all",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the exported series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesLayout {
    /// One unlabeled gauge per node and variant, e.g. `mbm_mem_bw_rw_cpu0_local`.
    #[default]
    PerSeries,
    /// A single gauge family labeled by `node` and `variant`.
    Labeled,
}

impl FromStr for SeriesLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per-series" => Ok(SeriesLayout::PerSeries),
            "labeled" => Ok(SeriesLayout::Labeled),
            other => Err(format!(
                "unknown layout '{}' (expected 'per-series' or 'labeled')",
                other
            )),
        }
    }
}

const SERIES_PREFIX: &str = "mbm_mem_bw_rw";
const LABELED_FAMILY: &str = "mbm_mem_bw_rw_mbps";
const LABELED_HELP: &str = "Mem BW from a NUMA node's CPUs to local, remote or all node(s) in MB/s";
const LABEL_NAMES: [&str; 2] = ["node", "variant"];

struct SeriesHandle<F> {
    family: F,
    label_values: Vec<String>,
}

/// Owns one series handle per (node, variant) pair, created up front.
pub struct MetricRegistry<S: MetricsSink> {
    sink: S,
    variants: Vec<Variant>,
    series: HashMap<(u32, Variant), SeriesHandle<S::Family>>,
}

impl<S: MetricsSink> MetricRegistry<S> {
    /// Registers every topology entry × variant with the sink.
    ///
    /// Each series starts at 0 so it is visible from the first scrape.
    pub fn initialize(
        sink: S,
        topology: &[TopologyEntry],
        variants: &[Variant],
        layout: SeriesLayout,
    ) -> Result<Self> {
        let mut series = HashMap::with_capacity(topology.len() * variants.len());

        let labeled = match layout {
            SeriesLayout::Labeled => {
                Some(sink.register_gauge(LABELED_FAMILY, LABELED_HELP, &LABEL_NAMES)?)
            }
            SeriesLayout::PerSeries => None,
        };

        for entry in topology {
            for &variant in variants {
                let handle = match &labeled {
                    Some(family) => SeriesHandle {
                        family: family.clone(),
                        label_values: vec![entry.node_index.to_string(), variant.to_string()],
                    },
                    None => {
                        let name = format!("{}_cpu{}_{}", SERIES_PREFIX, entry.node_index, variant);
                        let help = format!(
                            "Mem BW from CPU-{} to {} node(s) in MB/s",
                            entry.node_index, variant
                        );
                        SeriesHandle {
                            family: sink.register_gauge(&name, &help, &[])?,
                            label_values: Vec::new(),
                        }
                    }
                };
                let labels: Vec<&str> = handle.label_values.iter().map(String::as_str).collect();
                sink.set(&handle.family, &labels, 0.0)?;
                series.insert((entry.node_index, variant), handle);
            }
        }

        debug!(series = series.len(), ?layout, "metric registry initialized");

        Ok(Self {
            sink,
            variants: variants.to_vec(),
            series,
        })
    }

    /// Variants in the order values are expected in a sample.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Forwards `value` to the series registered for `(node_index, variant)`.
    pub fn update(&self, node_index: u32, variant: Variant, value: f64) -> Result<()> {
        let handle = self
            .series
            .get(&(node_index, variant))
            .ok_or(UnknownSeriesError {
                node_index,
                variant,
            })?;
        let labels: Vec<&str> = handle.label_values.iter().map(String::as_str).collect();
        self.sink.set(&handle.family, &labels, value)?;
        Ok(())
    }

    /// Writes `sample` into every node whose CPU-set key prefixes the
    /// sample's source key. Returns the number of series updated.
    pub fn apply(&self, topology: &[TopologyEntry], sample: &Sample) -> Result<usize> {
        let mut updated = 0;
        for entry in topology.iter().filter(|e| e.matches(&sample.source_key)) {
            for (&variant, &value) in self.variants.iter().zip(&sample.values) {
                self.update(entry.node_index, variant, value)?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}
