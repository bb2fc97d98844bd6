//! mbm-exporter - Intel MBM memory bandwidth exporter.
//!
//! Discovers NUMA nodes, runs pqos over every node's CPU set and serves the
//! measured local / remote / total bandwidth as Prometheus gauges.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod server;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mbm_core::pqos::{self, PqosConfig};
use mbm_core::topology;
use mbm_core::traits::SystemRunner;
use mbm_core::{
    CollectionLoop, LoopConfig, MetricRegistry, PrometheusSink, ProcessSupervisor,
    SHUTDOWN_EXIT_CODE, SeriesLayout, ShutdownCoordinator, Variant,
};

/// Exit code for startup failures and an unexpected end of the pqos stream.
const FAILURE_EXIT_CODE: i32 = 1;

/// Intel MBM memory bandwidth exporter.
#[derive(Parser, Debug)]
#[command(
    name = "mbm-exporter",
    about = "Exports Intel MBM memory bandwidth per NUMA node",
    version
)]
struct Args {
    /// Polling interval in seconds.
    #[arg(
        short,
        long,
        env = "MBM_EXPORTER_INTERVAL",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// TCP port to serve metrics on.
    #[arg(short, long, env = "MBM_EXPORTER_PORT", default_value = "9798")]
    port: u16,

    /// Address to bind the metrics endpoint to.
    #[arg(long, env = "MBM_EXPORTER_LISTEN", default_value = "0.0.0.0")]
    listen: IpAddr,

    /// Installation root containing tools/intel-cmt-cat.
    /// Defaults to the parent of the directory holding this executable.
    #[arg(long, env = "MBM_EXPORTER_ROOT", value_name = "PATH")]
    root: Option<PathBuf>,

    /// Path to the pqos binary, overriding the bundled one.
    #[arg(long, env = "MBM_EXPORTER_PQOS", value_name = "PATH")]
    pqos: Option<PathBuf>,

    /// Exposition shape: "per-series" (one gauge per node and variant)
    /// or "labeled" (one gauge family with node/variant labels).
    #[arg(long, env = "MBM_EXPORTER_LAYOUT", default_value = "per-series")]
    layout: SeriesLayout,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` directives are applied
/// first, then our crates are pinned to the level chosen by -v / -q.
fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);

    let filter = ["mbm_exporter", "mbm_core"]
        .iter()
        .filter_map(|target| format!("{}={}", target, level).parse().ok())
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reading MBM counters needs MSR / resctrl access.
#[cfg(unix)]
fn check_privileges() -> Result<(), String> {
    let euid = nix::unistd::geteuid();
    if euid.is_root() {
        Ok(())
    } else {
        Err(format!(
            "must run as root to read MBM counters (effective uid {})",
            euid
        ))
    }
}

#[cfg(not(unix))]
fn check_privileges() -> Result<(), String> {
    Err("MBM monitoring is only supported on Linux".to_string())
}

fn resolve_root(explicit: Option<&Path>, exe: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(root) => Some(root.to_path_buf()),
        None => exe.and_then(pqos::default_root),
    }
}

/// Why the pqos stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// The signal handler stopped pqos.
    Shutdown,
    /// pqos exited on its own.
    Unexpected,
}

fn classify_stream_end(coordinator: &ShutdownCoordinator) -> StreamEnd {
    if coordinator.is_shutting_down() {
        StreamEnd::Shutdown
    } else {
        StreamEnd::Unexpected
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    error!("{}", message);
    process::exit(FAILURE_EXIT_CODE);
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("mbm-exporter {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, listen={}, layout={:?}",
        args.interval,
        args.listen_addr(),
        args.layout
    );

    if let Err(e) = check_privileges() {
        fail(e);
    }

    let exe = std::env::current_exe().ok();
    let Some(root) = resolve_root(args.root.as_deref(), exe.as_deref()) else {
        fail("cannot determine installation root, pass --root");
    };
    debug!(root = %root.display(), "installation root");

    let topology = match topology::discover(&SystemRunner::new()) {
        Ok(topology) => topology,
        Err(e) => fail(e),
    };
    if topology.is_empty() {
        fail("no NUMA nodes reported by lscpu, nothing to monitor");
    }
    for entry in &topology {
        info!(node = entry.node_index, cpus = %entry.cpu_set_key, "NUMA node");
    }

    let sink = PrometheusSink::new();
    let registry =
        match MetricRegistry::initialize(sink.clone(), &topology, &Variant::ALL, args.layout) {
            Ok(registry) => registry,
            Err(e) => fail(e),
        };
    info!("Registered {} series", registry.len());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("mbm-http")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => fail(format!("failed to start HTTP runtime: {}", e)),
    };
    let addr = args.listen_addr();
    let listener = match runtime.block_on(server::bind(addr)) {
        Ok(listener) => listener,
        Err(e) => fail(format!("failed to bind {}: {}", addr, e)),
    };
    runtime.spawn(server::serve(listener, sink));

    let supervisor = ProcessSupervisor::default();
    let coordinator = supervisor.coordinator().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        coordinator.shutdown_all();
        process::exit(SHUTDOWN_EXIT_CODE);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let mut pqos_config = PqosConfig::from_root(&root, args.interval());
    if let Some(binary) = &args.pqos {
        pqos_config = pqos_config.with_binary(binary);
    }
    let spec = pqos_config.launch_spec(&topology);

    let mut collection =
        CollectionLoop::new(&topology, &registry, LoopConfig::with_interval(args.interval()));
    match collection.run(|| supervisor.start(pqos::PROCESS_NAME, &spec)) {
        Ok(report) => match classify_stream_end(supervisor.coordinator()) {
            StreamEnd::Shutdown => {
                info!(lines = report.lines, "monitoring process stopped");
                process::exit(SHUTDOWN_EXIT_CODE);
            }
            StreamEnd::Unexpected => {
                error!(
                    lines = report.lines,
                    samples = report.samples,
                    "monitoring process exited"
                );
                process::exit(FAILURE_EXIT_CODE);
            }
        },
        Err(e) if supervisor.coordinator().is_shutting_down() => {
            debug!("collection ended during shutdown: {}", e);
            process::exit(SHUTDOWN_EXIT_CODE);
        }
        Err(e) => fail(e),
    }
}
