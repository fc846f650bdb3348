//! Auxiliary device output.
//!
//! A configurable subset of each local sample is packed into a compact
//! binary frame and pushed to a byte sink, typically a serial character
//! device for a cockpit instrument panel. The sink is best-effort: a write
//! failure disables the output for the rest of the run without touching
//! the recording or streaming paths.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use skytrace_core::device::{encode_frame, DeviceField};
use skytrace_core::entry::TelemetrySample;

use crate::error::ServerError;

/// Anything that accepts raw device frames.
pub trait ByteSink: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), ServerError>;
}

/// Byte sink writing frames to a file path, e.g. `/dev/ttyUSB0`.
pub struct FileSink {
    file: std::fs::File,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        let file = OpenOptions::new().write(true).create(true).open(path)?;
        Ok(Self { file })
    }
}

impl ByteSink for FileSink {
    fn send(&mut self, frame: &[u8]) -> Result<(), ServerError> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Encodes samples into frames per the configured field order and forwards
/// them to the sink.
pub struct DeviceSink {
    fields: Vec<DeviceField>,
    sink: Box<dyn ByteSink>,
}

impl DeviceSink {
    pub fn new(fields: Vec<DeviceField>, sink: Box<dyn ByteSink>) -> Self {
        Self { fields, sink }
    }

    pub fn send(&mut self, sample: &TelemetrySample) -> Result<(), ServerError> {
        let frame = encode_frame(&self.fields, sample);
        self.sink.send(&frame)
    }
}
