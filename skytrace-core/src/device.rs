//! Fixed-layout frame encoding for auxiliary serial devices.
//!
//! External cockpit hardware takes a subset of the telemetry as a compact
//! byte frame: no header, no length prefix, just the selected fields in the
//! caller's fixed order. The transport is handed the total byte count
//! separately.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::entry::TelemetrySample;

/// Fields a device frame can carry, each with a fixed encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceField {
    /// 4-byte LE f32, degrees
    Roll,
    /// 4-byte LE f32, degrees
    Pitch,
    /// 2-byte LE u16, degrees
    Heading,
    /// 2-byte LE u16, meters
    Altitude,
    /// 2-byte LE u16, km/h
    Airspeed,
    /// 4-byte LE f32, decimal degrees
    Latitude,
    /// 4-byte LE f32, decimal degrees
    Longitude,
    /// single byte, 1 when fully deployed
    FlapState,
    /// single byte, 1 when fully extended
    GearState,
}

impl FromStr for DeviceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roll" => Ok(Self::Roll),
            "pitch" => Ok(Self::Pitch),
            "heading" => Ok(Self::Heading),
            "altitude" => Ok(Self::Altitude),
            "airspeed" => Ok(Self::Airspeed),
            "latitude" | "lat" => Ok(Self::Latitude),
            "longitude" | "lon" => Ok(Self::Longitude),
            "flap-state" | "flaps" => Ok(Self::FlapState),
            "gear-state" | "gear" => Ok(Self::GearState),
            other => Err(format!("unknown device field: {}", other)),
        }
    }
}

/// Encode the selected fields of a sample into one device frame.
pub fn encode_frame(fields: &[DeviceField], sample: &TelemetrySample) -> Vec<u8> {
    let mut frame = Vec::with_capacity(fields.len() * 4);

    for field in fields {
        match field {
            DeviceField::Roll => frame.extend_from_slice(&(sample.roll as f32).to_le_bytes()),
            DeviceField::Pitch => frame.extend_from_slice(&(sample.pitch as f32).to_le_bytes()),
            DeviceField::Heading => {
                frame.extend_from_slice(&(sample.heading as u16).to_le_bytes())
            }
            DeviceField::Altitude => {
                frame.extend_from_slice(&(sample.alt_m.max(0.0) as u16).to_le_bytes())
            }
            DeviceField::Airspeed => {
                frame.extend_from_slice(&(sample.ias_kmh.max(0.0) as u16).to_le_bytes())
            }
            DeviceField::Latitude => frame.extend_from_slice(&(sample.lat as f32).to_le_bytes()),
            DeviceField::Longitude => frame.extend_from_slice(&(sample.lon as f32).to_le_bytes()),
            // Percent collapses to a boolean flag: only a fully deployed
            // surface reads as 1
            DeviceField::FlapState => {
                frame.push((sample.flaps_pct.unwrap_or(0.0) / 100.0) as u8)
            }
            DeviceField::GearState => {
                frame.push((sample.gear_pct.unwrap_or(100.0) / 100.0) as u8)
            }
        }
    }

    frame
}
