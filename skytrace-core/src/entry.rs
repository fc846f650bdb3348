//! Telemetry sample model and ACMI entry-line rendering.
//!
//! An [`Entry`] is one timestamped observation of one tracked object. Every
//! build is a fresh value; nothing here shares a mutable template between
//! calls, so the same entry can be rendered for the log, the live stream
//! and the peer broadcast without cross-talk.

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// One raw telemetry poll from the local source.
///
/// Mandatory fields are always present in a successful poll; the optional
/// ones are frequently absent depending on the airframe (no yaw pedals, no
/// AOA vane, fixed gear) and get documented defaults in
/// [`Entry::from_sample`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub lon: f64,
    pub lat: f64,
    pub alt_m: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heading: f64,
    pub throttle_pct: f64,
    #[serde(default)]
    pub ias_kmh: f64,
    #[serde(default)]
    pub tas_kmh: f64,
    #[serde(default)]
    pub fuel_kg: f64,
    #[serde(default)]
    pub fuel0_kg: f64,
    #[serde(default)]
    pub mach: f64,
    #[serde(default)]
    pub stick_aileron: Option<f64>,
    #[serde(default)]
    pub stick_elevator: Option<f64>,
    #[serde(default)]
    pub pedals: Option<f64>,
    #[serde(default)]
    pub aoa_deg: Option<f64>,
    #[serde(default)]
    pub gear_pct: Option<f64>,
    #[serde(default)]
    pub flaps_pct: Option<f64>,
    /// Vehicle type tag, e.g. `p-51d-5`.
    #[serde(default)]
    pub vehicle: Option<String>,
    /// Battle area name, when the source knows it.
    #[serde(default)]
    pub map_name: Option<String>,
    /// Upper-left corner of the battle area, decimal degrees.
    #[serde(default)]
    pub map_ref_lat: Option<f64>,
    #[serde(default)]
    pub map_ref_lon: Option<f64>,
}

/// One-time object metadata, attached only to an object's first entry in a
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    pub kind: String,
    pub color: String,
    pub coalition: String,
}

impl ObjectMeta {
    /// Build metadata for the local player from a sample and team choice.
    pub fn for_sample(sample: &TelemetrySample, blue_team: bool) -> Self {
        let (color, coalition) = if blue_team {
            ("Blue", "Blue_Team")
        } else {
            ("Red", "Red_Team")
        };
        Self {
            name: sample.vehicle.clone().unwrap_or_default(),
            kind: "Air+FixedWing".to_string(),
            color: color.to_string(),
            coalition: coalition.to_string(),
        }
    }
}

/// One timestamped observation of one tracked object.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub lon: f64,
    pub lat: f64,
    pub alt_m: f64,
    pub roll: f64,
    pub pitch: f64,
    pub heading: f64,
    /// 0..1
    pub throttle: f64,
    pub roll_input: f64,
    pub pitch_input: f64,
    pub yaw_input: f64,
    pub ias_kmh: f64,
    pub tas_kmh: f64,
    pub fuel_kg: f64,
    /// Remaining fuel fraction, 0..1.
    pub fuel_volume: f64,
    pub mach: f64,
    pub aoa_deg: f64,
    /// 0 = retracted, 1 = fully extended.
    pub landing_gear: f64,
    /// 0 = retracted, 1 = fully extended.
    pub flaps: f64,
    /// Present on the first entry per object per session only.
    pub meta: Option<ObjectMeta>,
}

impl Entry {
    /// Convert a raw sample into an entry.
    ///
    /// Missing optional fields never abort the sample. Defaults:
    /// control inputs and AOA are `0`, absent gear state means a fixed
    /// (fully extended) gear so it renders as `1`, absent flaps render
    /// as `0`.
    pub fn from_sample(sample: &TelemetrySample) -> Self {
        let fuel_volume = if sample.fuel0_kg > 0.0 {
            sample.fuel_kg / sample.fuel0_kg
        } else {
            0.0
        };
        Self {
            lon: sample.lon,
            lat: sample.lat,
            alt_m: sample.alt_m,
            roll: sample.roll,
            pitch: sample.pitch,
            heading: sample.heading,
            throttle: sample.throttle_pct / 100.0,
            roll_input: sample.stick_aileron.unwrap_or(0.0),
            pitch_input: sample.stick_elevator.unwrap_or(0.0),
            yaw_input: sample.pedals.unwrap_or(0.0),
            ias_kmh: sample.ias_kmh,
            tas_kmh: sample.tas_kmh,
            fuel_kg: sample.fuel_kg,
            fuel_volume,
            mach: sample.mach,
            aoa_deg: sample.aoa_deg.unwrap_or(0.0),
            landing_gear: sample.gear_pct.map(|g| g / 100.0).unwrap_or(1.0),
            flaps: sample.flaps_pct.map(|f| f / 100.0).unwrap_or(0.0),
            meta: None,
        }
    }

    /// Attach one-time object metadata to this entry.
    pub fn with_meta(mut self, meta: ObjectMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Render into the entry-line grammar:
    ///
    /// ```text
    /// #<timestamp>
    /// <id>,T=<lon>|<lat>|<alt>|<roll>|<pitch>|<heading>,<Attr>=<value>,...
    /// ```
    ///
    /// Longitude and latitude carry nine decimals, attitude angles one.
    /// Metadata fields are appended only when present on this value.
    pub fn render(&self, timestamp: f64, id: &ObjectId) -> String {
        let mut line = format!(
            "#{:.2}\n{},T={:.9}|{:.9}|{}|{:.1}|{:.1}|{:.1}",
            timestamp,
            id,
            self.lon,
            self.lat,
            fmt_trim(self.alt_m),
            self.roll,
            self.pitch,
            self.heading
        );
        line.push_str(&format!(
            ",Throttle={},RollControlInput={:.6},PitchControlInput={:.6},YawControlInput={:.6}",
            fmt_trim(self.throttle),
            self.roll_input,
            self.pitch_input,
            self.yaw_input
        ));
        line.push_str(&format!(
            ",IAS={:.6},TAS={},FuelWeight={},FuelVolume={},Mach={},AOA={},LandingGear={},Flaps={}",
            self.ias_kmh,
            fmt_trim(self.tas_kmh),
            fmt_trim(self.fuel_kg),
            fmt_trim(self.fuel_volume),
            fmt_trim(self.mach),
            fmt_trim(self.aoa_deg),
            fmt_trim(self.landing_gear),
            fmt_trim(self.flaps)
        ));
        if let Some(meta) = &self.meta {
            line.push_str(&format!(
                ",Name={},Type={},Color={},Coalition={}",
                meta.name, meta.kind, meta.color, meta.coalition
            ));
        }
        line.push('\n');
        line
    }
}

/// Format a float without trailing zero noise: whole values render as
/// integers, everything else keeps its natural precision.
fn fmt_trim(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            lon: 10.123456789,
            lat: 20.987654321,
            alt_m: 500.0,
            roll: 1.0,
            pitch: -2.0,
            heading: 90.0,
            throttle_pct: 100.0,
            ias_kmh: 320.5,
            tas_kmh: 350.0,
            fuel_kg: 200.0,
            fuel0_kg: 400.0,
            mach: 0.5,
            ..TelemetrySample::default()
        }
    }

    #[test]
    fn test_entry_line_grammar() {
        let entry = Entry::from_sample(&sample());
        let line = entry.render(0.0, &ObjectId::from_index(1));

        assert!(line.starts_with("#0.00\n1,"));
        assert!(line.contains("T=10.123456789|20.987654321|500|1.0|-2.0|90.0"));
        assert!(line.contains("Throttle=1"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_missing_optionals_get_defaults() {
        let entry = Entry::from_sample(&sample());

        assert_eq!(entry.roll_input, 0.0);
        assert_eq!(entry.pitch_input, 0.0);
        assert_eq!(entry.yaw_input, 0.0);
        assert_eq!(entry.aoa_deg, 0.0);
        // No gear state means fixed gear, always extended
        assert_eq!(entry.landing_gear, 1.0);
        assert_eq!(entry.flaps, 0.0);
    }

    #[test]
    fn test_fuel_volume_fraction() {
        let entry = Entry::from_sample(&sample());
        assert_eq!(entry.fuel_volume, 0.5);

        let mut empty = sample();
        empty.fuel0_kg = 0.0;
        assert_eq!(Entry::from_sample(&empty).fuel_volume, 0.0);
    }

    #[test]
    fn test_meta_rendered_only_when_present() {
        let s = TelemetrySample {
            vehicle: Some("p-51d-5".to_string()),
            ..sample()
        };
        let meta = ObjectMeta::for_sample(&s, true);
        let first = Entry::from_sample(&s).with_meta(meta).render(1.5, &ObjectId::from_index(1));
        let later = Entry::from_sample(&s).render(1.6, &ObjectId::from_index(1));

        assert!(first.contains("Name=p-51d-5"));
        assert!(first.contains("Type=Air+FixedWing"));
        assert!(first.contains("Color=Blue"));
        assert!(first.contains("Coalition=Blue_Team"));
        assert!(!later.contains("Name="));
        assert!(!later.contains("Coalition="));
    }

    #[test]
    fn test_red_team_meta() {
        let meta = ObjectMeta::for_sample(&sample(), false);
        assert_eq!(meta.color, "Red");
        assert_eq!(meta.coalition, "Red_Team");
    }

    #[test]
    fn test_fresh_value_per_call() {
        // Two conversions of the same sample must be independent values
        let s = sample();
        let a = Entry::from_sample(&s).with_meta(ObjectMeta::for_sample(&s, true));
        let b = Entry::from_sample(&s);
        assert!(a.meta.is_some());
        assert!(b.meta.is_none());
    }

    #[test]
    fn test_sample_json_roundtrip() {
        let json = r#"{"lon":1.0,"lat":2.0,"alt_m":3.0,"roll":0.0,"pitch":0.0,"heading":180.0,"throttle_pct":50.0,"gear_pct":100.0}"#;
        let s: TelemetrySample = serde_json::from_str(json).unwrap();
        assert_eq!(s.heading, 180.0);
        assert_eq!(s.gear_pct, Some(100.0));
        assert!(s.aoa_deg.is_none());
    }
}
