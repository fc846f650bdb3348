//! # SkyTrace Core
//!
//! Platform-independent ACMI flight-recording format library.
//!
//! This crate contains pure formatting and reconciliation logic with **zero
//! I/O dependencies**. All file, socket, and broker handling lives in
//! `skytrace-server`; everything here is value-in, value-out so it can be
//! tested without a running game or network.
//!
//! ## Key Modules
//!
//! - [`entry`] - telemetry sample model and ACMI entry-line rendering
//! - [`header`] - file preamble and session header rendering
//! - [`ids`] - object identifier table and collision-free allocation
//! - [`clock`] - rebasing remote timestamps onto the local reference clock
//! - [`wire`] - the JSON payload exchanged between session peers
//! - [`device`] - fixed-layout frame encoding for auxiliary serial devices
//!
//! ## Example: Rendering an Entry
//!
//! ```rust
//! use skytrace_core::entry::{Entry, TelemetrySample};
//! use skytrace_core::ids::ObjectId;
//!
//! let sample = TelemetrySample {
//!     lon: 10.5,
//!     lat: 20.25,
//!     alt_m: 500.0,
//!     roll: 1.0,
//!     pitch: -2.0,
//!     heading: 90.0,
//!     throttle_pct: 100.0,
//!     ..TelemetrySample::default()
//! };
//! let entry = Entry::from_sample(&sample);
//! let line = entry.render(0.0, &ObjectId::from_index(1));
//! assert!(line.starts_with("#0.00\n"));
//! ```

pub mod clock;
pub mod device;
pub mod entry;
pub mod error;
pub mod header;
pub mod ids;
pub mod wire;

pub use error::FormatError;

/// ACMI file type declared in the preamble.
pub const ACMI_FILE_TYPE: &str = "text/acmi/tacview";

/// ACMI format version declared in the preamble.
pub const ACMI_VERSION: &str = "2.1";

/// Largest object identifier in the session namespace.
pub const MAX_OBJECT_ID: u32 = 0xFFFF;

/// Reference-clock timestamp format shared by the handshake file and the
/// peer broadcast payload (naive UTC, microsecond precision).
pub const REF_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
