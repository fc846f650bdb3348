//! Telemetry source seam.
//!
//! The vendor polling library is deliberately opaque to the engine: all it
//! has to do is produce a sample dictionary on demand, or report that no
//! player is currently flying. Two concrete sources ship with the server,
//! both useful without a running game: a synthetic orbit generator and a
//! JSON-lines file reader.

use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use skytrace_core::entry::TelemetrySample;

use crate::error::ServerError;

/// Result of one poll of the local telemetry source.
#[derive(Debug, Clone)]
pub enum SourcePoll {
    Sample(TelemetrySample),
    /// Not an error: drives the sampler's ALIVE/DEAD state machine.
    PlayerNotFound,
}

/// An opaque local telemetry source.
pub trait TelemetrySource: Send {
    fn poll(&mut self) -> Result<SourcePoll, ServerError>;
}

/// Synthetic source flying a gentle orbit, for development and testing.
pub struct ReplaySource {
    tick: u64,
}

impl ReplaySource {
    const CENTER_LON: f64 = 14.0;
    const CENTER_LAT: f64 = 50.0;

    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Default for ReplaySource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for ReplaySource {
    fn poll(&mut self) -> Result<SourcePoll, ServerError> {
        let t = self.tick as f64 * 0.1;
        self.tick += 1;

        let phase = (t * 2.0).to_radians();
        Ok(SourcePoll::Sample(TelemetrySample {
            lon: Self::CENTER_LON + 0.05 * phase.cos(),
            lat: Self::CENTER_LAT + 0.05 * phase.sin(),
            alt_m: 1500.0 + 200.0 * (t * 0.5).to_radians().sin(),
            roll: 15.0,
            pitch: 2.0,
            heading: (t * 2.0 + 90.0) % 360.0,
            throttle_pct: 90.0,
            ias_kmh: 380.0,
            tas_kmh: 410.0,
            fuel_kg: (500.0 - t * 0.1).max(0.0),
            fuel0_kg: 500.0,
            mach: 0.34,
            stick_aileron: Some(0.1),
            stick_elevator: Some(-0.05),
            pedals: None,
            aoa_deg: Some(3.2),
            gear_pct: Some(0.0),
            flaps_pct: Some(0.0),
            vehicle: Some("replay".to_string()),
            map_name: Some("Replay Orbit".to_string()),
            map_ref_lat: Some(Self::CENTER_LAT + 0.5),
            map_ref_lon: Some(Self::CENTER_LON - 0.5),
        }))
    }
}

/// Source replaying sample dictionaries from a JSON-lines file.
///
/// Each line is one serialized [`TelemetrySample`]; a literal `null` line
/// reads as "player not found", and so does end-of-file. Malformed lines
/// are logged and skipped.
pub struct JsonlSource {
    lines: Lines<BufReader<File>>,
    exhausted: bool,
}

impl JsonlSource {
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            exhausted: false,
        })
    }
}

impl TelemetrySource for JsonlSource {
    fn poll(&mut self) -> Result<SourcePoll, ServerError> {
        if self.exhausted {
            return Ok(SourcePoll::PlayerNotFound);
        }
        loop {
            match self.lines.next() {
                None => {
                    self.exhausted = true;
                    return Ok(SourcePoll::PlayerNotFound);
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "null" {
                        return Ok(SourcePoll::PlayerNotFound);
                    }
                    match serde_json::from_str::<TelemetrySample>(line) {
                        Ok(sample) => return Ok(SourcePoll::Sample(sample)),
                        Err(e) => {
                            warn!("Skipping malformed telemetry line: {}", e);
                            continue;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_replay_source_always_produces() {
        let mut source = ReplaySource::new();
        for _ in 0..10 {
            match source.poll().unwrap() {
                SourcePoll::Sample(s) => assert!(s.map_name.is_some()),
                SourcePoll::PlayerNotFound => panic!("replay source went dead"),
            }
        }
    }

    #[test]
    fn test_jsonl_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("samples.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"lon":1.0,"lat":2.0,"alt_m":3.0,"roll":0.0,"pitch":0.0,"heading":0.0,"throttle_pct":50.0}}"#).unwrap();
        writeln!(file, "null").unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file, r#"{{"lon":4.0,"lat":5.0,"alt_m":6.0,"roll":0.0,"pitch":0.0,"heading":0.0,"throttle_pct":60.0}}"#).unwrap();
        drop(file);

        let mut source = JsonlSource::open(&path).unwrap();
        assert!(matches!(source.poll().unwrap(), SourcePoll::Sample(s) if s.lon == 1.0));
        assert!(matches!(source.poll().unwrap(), SourcePoll::PlayerNotFound));
        // Malformed line skipped, next valid sample returned
        assert!(matches!(source.poll().unwrap(), SourcePoll::Sample(s) if s.lon == 4.0));
        // EOF reads as player-not-found forever
        assert!(matches!(source.poll().unwrap(), SourcePoll::PlayerNotFound));
        assert!(matches!(source.poll().unwrap(), SourcePoll::PlayerNotFound));
    }
}
