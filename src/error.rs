use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the transform engine, wire protocol, and server.
///
/// Loader errors are fatal to the component that produced them (the scan
/// tables or image enter an uninitialized terminal state); per-frame and
/// per-client failures are handled by the caller without propagating here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid scan tables: {0}")]
    InvalidTables(&'static str),

    #[error("invalid format in {path:?}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("empty raster input")]
    EmptyInput,

    #[error("{what} {value} exceeds maximum {max}")]
    OutOfRange { what: &'static str, value: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, Error>;
