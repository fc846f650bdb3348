//! Server error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Cannot determine a data directory for this platform")]
    NoDataDir,
    #[error("{0}")]
    Format(#[from] skytrace_core::FormatError),
    #[error("Cannot parse JSON '{0}'")]
    ParseJson(String),
    #[error("TCP port {0} in use - please pick a different port")]
    PortInUse(u16),
    #[error("No telemetry source configured (use --replay or --telemetry-file)")]
    NoSource,
    #[error("No object recorded for key '{0}'")]
    UnknownObject(String),
    #[error("Handshake file is malformed: {0}")]
    BadReferenceFile(String),
    #[error("Shutdown")]
    Shutdown,
}
