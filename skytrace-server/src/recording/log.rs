//! ACMI recording log writer (entity tracker).

use chrono::{NaiveDateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use skytrace_core::entry::Entry;
use skytrace_core::header::{format_preamble, SessionHeader};
use skytrace_core::ids::{IdTable, ObjectId};

use crate::error::ServerError;

/// Table key of the local player object.
pub const LOCAL_KEY: &str = "0";

/// Generate a session recording filename: `<timestamp>_<user>.acmi`.
pub fn session_filename(user: &str, now: NaiveDateTime) -> String {
    format!("{}_{}.acmi", now.format("%Y_%m_%d_%H_%M_%S"), user)
}

/// Append-only recording log for one session.
///
/// Creating the log pins the session's reference clock to "now" and writes
/// the format preamble. The session header is mutable singleton state: a
/// second `insert_header` replaces the previous block in place instead of
/// appending a duplicate. Entries are append-only and never rewritten.
pub struct AcmiLog {
    path: PathBuf,
    file: File,
    reference_time: NaiveDateTime,
    ids: IdTable,
    header_span: Option<Range<usize>>,
    preamble_len: usize,
    entries_written: u64,
    last_ts: HashMap<ObjectId, f64>,
}

impl AcmiLog {
    /// Open a new append target. The reference clock is "now" at call
    /// time; the local player object is registered immediately so its
    /// identifier is available before the first entry (the handshake file
    /// needs it).
    pub fn create(path: &Path) -> Result<Self, ServerError> {
        let reference_time = Utc::now().naive_utc();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let preamble = format_preamble(reference_time);
        file.write_all(preamble.as_bytes())?;
        file.flush()?;

        let mut ids = IdTable::new();
        ids.get_or_insert(LOCAL_KEY);

        info!("Created recording log {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            reference_time,
            ids,
            header_span: None,
            preamble_len: preamble.len(),
            entries_written: 0,
            last_ts: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reference_time(&self) -> NaiveDateTime {
        self.reference_time
    }

    /// Identifier of the local player object.
    pub fn local_id(&self) -> ObjectId {
        self.ids
            .get(LOCAL_KEY)
            .expect("local object registered at create")
    }

    /// Seconds elapsed since the reference clock.
    pub fn now_relative(&self) -> f64 {
        let delta = Utc::now().naive_utc() - self.reference_time;
        (delta.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0).max(0.0)
    }

    /// Write the one-time session metadata block.
    ///
    /// The first call appends the block right after the preamble; any
    /// later call splices the new block over the old one via an atomic
    /// full-file rewrite. Entries are never touched.
    pub fn insert_header(&mut self, header: &SessionHeader) -> Result<(), ServerError> {
        let rendered = header.render();

        match (&self.header_span, self.entries_written) {
            (None, 0) => {
                self.file.write_all(rendered.as_bytes())?;
                self.file.flush()?;
                self.header_span = Some(self.preamble_len..self.preamble_len + rendered.len());
            }
            _ => {
                debug!("Rewriting session header in {}", self.path.display());
                let contents = fs::read_to_string(&self.path)?;
                let span = self
                    .header_span
                    .clone()
                    .unwrap_or(self.preamble_len..self.preamble_len);
                let mut new_contents =
                    String::with_capacity(contents.len() + rendered.len());
                new_contents.push_str(&contents[..span.start]);
                new_contents.push_str(&rendered);
                new_contents.push_str(&contents[span.end..]);

                let tmp = self.path.with_extension("acmi.tmp");
                fs::write(&tmp, &new_contents)?;
                fs::rename(&tmp, &self.path)?;

                self.file = OpenOptions::new().append(true).open(&self.path)?;
                self.header_span =
                    Some(self.preamble_len..self.preamble_len + rendered.len());
            }
        }
        Ok(())
    }

    /// Append one entry for `key`, allocating the next identifier from the
    /// session table on first sight. Returns the relative timestamp used
    /// and the object identifier, so the same entry can be re-rendered for
    /// the stream and broadcast without touching log state again.
    pub fn insert_entry(&mut self, key: &str, entry: &Entry) -> Result<(f64, ObjectId), ServerError> {
        let (id, fresh) = self.ids.get_or_insert(key);
        if fresh {
            debug!("Allocated object id {} for key '{}'", id, key);
        }

        // Wall clock steps backwards (NTP) must not break per-object
        // timestamp monotonicity in the log
        let mut ts = self.now_relative();
        if let Some(prev) = self.last_ts.get(&id) {
            ts = ts.max(*prev);
        }

        let line = entry.render(ts, &id);
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;

        self.last_ts.insert(id, ts);
        self.entries_written += 1;
        Ok((ts, id))
    }

    /// Render an entry for an already-recorded object without mutating log
    /// state, for reuse by the relay and broadcast paths.
    pub fn format_entry(&self, key: &str, entry: &Entry, timestamp: f64) -> Result<String, ServerError> {
        let id = self
            .ids
            .get(key)
            .ok_or_else(|| ServerError::UnknownObject(key.to_string()))?;
        Ok(entry.render(timestamp, &id))
    }

    /// Append a pre-formatted entry line (reconciled remote data).
    pub fn append_raw(&mut self, line: &str) -> Result<(), ServerError> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.entries_written += 1;
        Ok(())
    }

    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn flush(&mut self) -> Result<(), ServerError> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skytrace_core::entry::TelemetrySample;
    use tempfile::TempDir;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            lon: 10.0,
            lat: 20.0,
            alt_m: 500.0,
            heading: 90.0,
            throttle_pct: 100.0,
            ..TelemetrySample::default()
        }
    }

    fn header() -> SessionHeader {
        SessionHeader {
            data_source: "War Thunder".to_string(),
            data_recorder: "SkyTrace".to_string(),
            author: "pilot1".to_string(),
            title: "Berlin".to_string(),
            comments: "test".to_string(),
            reference_longitude: 13.0,
            reference_latitude: 52.0,
        }
    }

    #[test]
    fn test_create_writes_preamble() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let log = AcmiLog::create(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("FileType=text/acmi/tacview\nFileVersion=2.1\n"));
        assert!(contents.contains("0,ReferenceTime="));
        assert_eq!(log.local_id(), ObjectId::from_index(1));
    }

    #[test]
    fn test_header_is_singleton() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let mut log = AcmiLog::create(&path).unwrap();

        log.insert_header(&header()).unwrap();
        let mut second = header();
        second.title = "Stalingrad".to_string();
        log.insert_header(&second).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("0,DataSource=").count(), 1);
        assert!(contents.contains("0,Title=Stalingrad"));
        assert!(!contents.contains("0,Title=Berlin"));
    }

    #[test]
    fn test_header_rewrite_preserves_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let mut log = AcmiLog::create(&path).unwrap();

        log.insert_header(&header()).unwrap();
        let entry = Entry::from_sample(&sample());
        log.insert_entry(LOCAL_KEY, &entry).unwrap();

        let mut second = header();
        second.title = "Stalingrad".to_string();
        log.insert_header(&second).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("0,Title=Stalingrad"));
        assert!(contents.contains("T=10.000000000|20.000000000|500"));
        // Header block still precedes the entry
        let header_pos = contents.find("0,Title=").unwrap();
        let entry_pos = contents.find("\n#").unwrap();
        assert!(header_pos < entry_pos);

        // Appends still work after the rewrite
        log.insert_entry(LOCAL_KEY, &entry).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("\n#").count(), 2);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let mut log = AcmiLog::create(&path).unwrap();

        let entry = Entry::from_sample(&sample());
        let mut prev = -1.0;
        for _ in 0..5 {
            let (ts, _) = log.insert_entry(LOCAL_KEY, &entry).unwrap();
            assert!(ts >= prev);
            prev = ts;
        }
    }

    #[test]
    fn test_format_entry_does_not_mutate() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let mut log = AcmiLog::create(&path).unwrap();

        let entry = Entry::from_sample(&sample());
        let (ts, id) = log.insert_entry(LOCAL_KEY, &entry).unwrap();
        let before = log.entries_written();

        let line = log.format_entry(LOCAL_KEY, &entry, ts).unwrap();
        assert!(line.starts_with(&format!("#{:.2}\n{},", ts, id)));
        assert_eq!(log.entries_written(), before);

        assert!(log.format_entry("nobody", &entry, ts).is_err());
    }

    #[test]
    fn test_sequential_ids_per_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.acmi");
        let mut log = AcmiLog::create(&path).unwrap();

        let entry = Entry::from_sample(&sample());
        let (_, local) = log.insert_entry(LOCAL_KEY, &entry).unwrap();
        let (_, other) = log.insert_entry("wingman", &entry).unwrap();
        let (_, local2) = log.insert_entry(LOCAL_KEY, &entry).unwrap();

        assert_eq!(local, ObjectId::from_index(1));
        assert_eq!(other, ObjectId::from_index(2));
        assert_eq!(local, local2);
    }

    #[test]
    fn test_session_filename() {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(session_filename("pilot1", now), "2024_01_02_03_04_05_pilot1.acmi");
    }

    #[test]
    fn test_create_fails_on_bad_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("test.acmi");
        assert!(AcmiLog::create(&path).is_err());
    }
}
