//! Metrics sink abstraction and its Prometheus binding.
//!
//! The registry only needs two operations from whatever serves the metrics:
//! registering a gauge family and setting one labeled value in it.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::error::SinkError;

/// Destination for exported gauge values.
pub trait MetricsSink {
    /// Opaque handle to a registered gauge family.
    type Family: Clone;

    /// Registers a gauge family with the given label names (possibly none).
    fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<Self::Family, SinkError>;

    /// Sets the value of the series identified by `label_values` in `family`.
    fn set(&self, family: &Self::Family, label_values: &[&str], value: f64)
    -> Result<(), SinkError>;
}

/// Sink backed by a `prometheus::Registry`.
///
/// Cloning is cheap and clones share the same registry, so one clone can
/// feed the collection loop while another renders scrapes.
#[derive(Clone, Default)]
pub struct PrometheusSink {
    registry: Registry,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered family in the text exposition format.
    pub fn render(&self) -> Result<String, SinkError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| SinkError(e.to_string()))
    }

    /// Content type matching [`PrometheusSink::render`].
    pub fn content_type() -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl MetricsSink for PrometheusSink {
    type Family = GaugeVec;

    fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<GaugeVec, SinkError> {
        let gauge = GaugeVec::new(Opts::new(name, help), label_names)?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    fn set(&self, family: &GaugeVec, label_values: &[&str], value: f64) -> Result<(), SinkError> {
        family.get_metric_with_label_values(label_values)?.set(value);
        Ok(())
    }
}
