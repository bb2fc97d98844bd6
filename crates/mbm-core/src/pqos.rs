//! Invocation of the Intel RDT monitoring tool (`pqos`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::LaunchSpec;
use crate::topology::TopologyEntry;

/// Name the monitoring process is registered under.
pub const PROCESS_NAME: &str = "pqos";

/// Bundle location relative to the installation root.
const BUNDLE_DIR: &str = "tools/intel-cmt-cat";
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Monitoring events requested for every CPU group: LLC occupancy and
/// total / local / remote memory bandwidth.
const MONITOR_EVENTS: [&str; 4] = ["llc", "mbt", "mbl", "mbr"];

/// Where pqos lives and how often it samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqosConfig {
    pub binary: PathBuf,
    pub lib_dir: PathBuf,
    pub interval: Duration,
}

impl PqosConfig {
    /// Uses the copy bundled under `<root>/tools/intel-cmt-cat`.
    pub fn from_root(root: &Path, interval: Duration) -> Self {
        let bundle = root.join(BUNDLE_DIR);
        Self {
            binary: bundle.join("pqos").join("pqos"),
            lib_dir: bundle.join("lib"),
            interval,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sampling interval in the tool's 100 ms ticks.
    pub fn interval_ticks(&self) -> u128 {
        (self.interval.as_millis() / 100).max(1)
    }

    /// Builds the command line monitoring every node's CPU set.
    pub fn launch_spec(&self, topology: &[TopologyEntry]) -> LaunchSpec {
        LaunchSpec::new(&self.binary)
            .env(LIBRARY_PATH_VAR, &self.lib_dir)
            .arg("-r")
            .arg("--disable-mon-ipc")
            .arg("--disable-mon-llc_miss")
            .arg("-i")
            .arg(self.interval_ticks().to_string())
            .arg("-m")
            .arg(monitor_term(topology))
    }
}

/// `llc:[0-3],[4-7];mbt:[0-3],[4-7];...` for the given nodes.
pub fn monitor_term(topology: &[TopologyEntry]) -> String {
    let groups = topology
        .iter()
        .map(|e| format!("[{}]", e.cpu_set_key))
        .collect::<Vec<_>>()
        .join(",");
    MONITOR_EVENTS
        .iter()
        .map(|event| format!("{}:{}", event, groups))
        .collect::<Vec<_>>()
        .join(";")
}

/// Installation root for an executable shipped as `<root>/bin/<exe>`.
pub fn default_root(exe: &Path) -> Option<PathBuf> {
    exe.parent()?.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn topology() -> Vec<TopologyEntry> {
        vec![
            TopologyEntry::new(0, "0-15,32-47"),
            TopologyEntry::new(1, "16-31,48-63"),
        ]
    }

    #[test]
    fn test_monitor_term() {
        assert_eq!(
            monitor_term(&[TopologyEntry::new(0, "0-3"), TopologyEntry::new(1, "4-7")]),
            "llc:[0-3],[4-7];mbt:[0-3],[4-7];mbl:[0-3],[4-7];mbr:[0-3],[4-7]"
        );
    }

    #[test]
    fn test_from_root_paths() {
        let config = PqosConfig::from_root(Path::new("/opt/mbm"), Duration::from_secs(10));
        assert_eq!(
            config.binary,
            PathBuf::from("/opt/mbm/tools/intel-cmt-cat/pqos/pqos")
        );
        assert_eq!(config.lib_dir, PathBuf::from("/opt/mbm/tools/intel-cmt-cat/lib"));
    }

    #[test]
    fn test_launch_spec() {
        let config = PqosConfig::from_root(Path::new("/opt/mbm"), Duration::from_secs(10));
        let spec = config.launch_spec(&topology());

        let args: Vec<OsString> = [
            "-r",
            "--disable-mon-ipc",
            "--disable-mon-llc_miss",
            "-i",
            "100",
            "-m",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(&spec.args[..6], &args[..]);
        assert!(
            spec.args[6]
                .to_string_lossy()
                .starts_with("llc:[0-15,32-47],[16-31,48-63];mbt:")
        );
        assert_eq!(
            spec.env,
            vec![(
                OsString::from("LD_LIBRARY_PATH"),
                OsString::from("/opt/mbm/tools/intel-cmt-cat/lib")
            )]
        );
    }

    #[test]
    fn test_binary_override() {
        let config = PqosConfig::from_root(Path::new("/opt/mbm"), Duration::from_secs(1))
            .with_binary("/usr/sbin/pqos");
        assert_eq!(config.launch_spec(&topology()).program(), Path::new("/usr/sbin/pqos"));
    }

    #[test]
    fn test_interval_ticks() {
        let ticks = |ms| PqosConfig::from_root(Path::new("/"), Duration::from_millis(ms)).interval_ticks();
        assert_eq!(ticks(1000), 10);
        assert_eq!(ticks(10_000), 100);
        assert_eq!(ticks(50), 1);
    }

    #[test]
    fn test_default_root() {
        assert_eq!(
            default_root(Path::new("/opt/mbm/bin/mbm-exporter")),
            Some(PathBuf::from("/opt/mbm"))
        );
        assert_eq!(default_root(Path::new("mbm-exporter")), None);
        assert_eq!(default_root(Path::new("/")), None);
    }
}
