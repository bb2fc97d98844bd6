//! Host NUMA topology discovery.
//!
//! Runs `lscpu` and extracts one [`TopologyEntry`] per NUMA node from lines
//! such as:
//!
//! ```text
//! NUMA node0 CPU(s):   0-15,32-47
//! NUMA node1 CPU(s):   16-31,48-63
//! ```

use tracing::debug;

use crate::error::DiscoveryError;
use crate::traits::CommandRunner;

/// Command used to inventory host CPUs.
pub const TOPOLOGY_COMMAND: &str = "lscpu";

const NODE_LINE_PREFIX: &str = "NUMA node";
const CPU_MARKER: &str = "CPU";
const NODE_FIELD_PREFIX: &str = "node";

/// One NUMA node and the CPU-set string that identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub node_index: u32,
    pub cpu_set_key: String,
}

impl TopologyEntry {
    pub fn new(node_index: u32, cpu_set_key: impl Into<String>) -> Self {
        Self {
            node_index,
            cpu_set_key: cpu_set_key.into(),
        }
    }

    /// Whether a sample reported for `source_key` belongs to this node.
    ///
    /// This is a string-prefix test, not equality: `"0,2"` matches a sample
    /// keyed `"0,2,4"`. Two nodes whose keys prefix one another can both match.
    pub fn matches(&self, source_key: &str) -> bool {
        source_key.starts_with(&self.cpu_set_key)
    }
}

/// Queries the host and returns NUMA nodes in discovery order.
///
/// Only fails if the query command cannot be executed; malformed output
/// lines are skipped.
pub fn discover(runner: &impl CommandRunner) -> Result<Vec<TopologyEntry>, DiscoveryError> {
    let output = runner
        .run(TOPOLOGY_COMMAND, &[])
        .map_err(|source| DiscoveryError {
            command: TOPOLOGY_COMMAND.to_string(),
            source,
        })?;
    let entries = parse_lscpu(&output);
    debug!(nodes = entries.len(), "topology discovered");
    Ok(entries)
}

/// Parses `lscpu` output into topology entries.
///
/// A repeated node index overwrites the CPU set of its first occurrence and
/// keeps that position.
pub fn parse_lscpu(output: &str) -> Vec<TopologyEntry> {
    let mut entries: Vec<TopologyEntry> = Vec::new();

    for line in output.lines() {
        let Some((node_index, cpu_set_key)) = parse_node_line(line) else {
            continue;
        };
        match entries.iter_mut().find(|e| e.node_index == node_index) {
            Some(existing) => existing.cpu_set_key = cpu_set_key.to_string(),
            None => entries.push(TopologyEntry::new(node_index, cpu_set_key)),
        }
    }

    entries
}

fn parse_node_line(line: &str) -> Option<(u32, &str)> {
    // util-linux >= 2.37 indents the NUMA section.
    let line = line.trim_start();
    if !line.starts_with(NODE_LINE_PREFIX) || !line.contains(CPU_MARKER) {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let digits = fields.get(1)?.strip_prefix(NODE_FIELD_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let node_index = digits.parse().ok()?;
    let cpu_set_key = fields.get(3)?;

    Some((node_index, cpu_set_key))
}
