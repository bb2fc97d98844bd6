//! Error types for the exporter core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::Variant;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The host topology query could not be executed at all.
#[derive(Error, Debug)]
#[error("failed to run topology query `{command}`: {source}")]
pub struct DiscoveryError {
    pub command: String,
    #[source]
    pub source: io::Error,
}

/// The monitoring process could not be started.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("monitoring binary not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// No series was registered for the given (node, variant) pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no series registered for node {node_index} variant {variant}")]
pub struct UnknownSeriesError {
    pub node_index: u32,
    pub variant: Variant,
}

/// The metrics sink refused a registration or an update.
#[derive(Error, Debug)]
#[error("metrics sink error: {0}")]
pub struct SinkError(pub String);

impl From<prometheus::Error> for SinkError {
    fn from(e: prometheus::Error) -> Self {
        SinkError(e.to_string())
    }
}

/// Top-level error for the exporter core.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    UnknownSeries(#[from] UnknownSeriesError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
