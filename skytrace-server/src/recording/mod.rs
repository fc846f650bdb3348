//! Recording log management.
//!
//! One [`AcmiLog`] per session, plus one per remote peer. The log is the
//! system of record for its entries: writes here are append-only and a
//! failure is fatal to the owning session, unlike the best-effort stream
//! and broadcast sinks.

mod log;

pub use log::{session_filename, AcmiLog, LOCAL_KEY};
