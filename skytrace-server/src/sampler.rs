//! Local telemetry sampler.
//!
//! Polls the local source at a fixed rate and drives everything downstream:
//! the session recording log, the handshake file for the remote merge, and
//! the distribution bus fan-out. One sampler owns the local session
//! lifecycle; a respawn after player-not-found rolls over to a fresh log
//! with a fresh reference clock.

use chrono::Local;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_graceful_shutdown::SubsystemHandle;

use skytrace_core::entry::{Entry, ObjectMeta, TelemetrySample};
use skytrace_core::header::SessionHeader;
use skytrace_core::ids::IdAllocator;
use skytrace_core::REF_TIME_FORMAT;

use crate::bus::DistributionBus;
use crate::error::ServerError;
use crate::recording::{session_filename, AcmiLog, LOCAL_KEY};
use crate::reference::ReferenceRecord;
use crate::source::{SourcePoll, TelemetrySource};

pub struct LocalSampler {
    source: Box<dyn TelemetrySource>,
    bus: DistributionBus,
    registry: Arc<Mutex<IdAllocator>>,
    log_dir: PathBuf,
    reference_file: PathBuf,
    callsign: String,
    blue_team: bool,
    period: Duration,
    log: Option<AcmiLog>,
    header_written: bool,
    meta_written: bool,
    player_dead: bool,
}

impl LocalSampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn TelemetrySource>,
        bus: DistributionBus,
        registry: Arc<Mutex<IdAllocator>>,
        log_dir: PathBuf,
        reference_file: PathBuf,
        callsign: String,
        blue_team: bool,
        rate_hz: f64,
    ) -> Self {
        let rate_hz = if rate_hz > 0.0 { rate_hz } else { 10.0 };
        Self {
            source,
            bus,
            registry,
            log_dir,
            reference_file,
            callsign,
            blue_team,
            period: Duration::from_secs_f64(1.0 / rate_hz),
            log: None,
            header_written: false,
            meta_written: false,
            player_dead: true,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        info!(
            "Local sampler starting at {:.1} Hz for '{}'",
            1.0 / self.period.as_secs_f64(),
            self.callsign
        );

        // The handshake file must exist before the first peer message
        // arrives, so the first session is established up front.
        self.new_session()?;

        // The baseline accumulates in whole periods instead of snapping to
        // "now" after each wakeup, so scheduling jitter does not drift the
        // sample clock.
        let mut baseline = Instant::now();
        loop {
            let due = baseline + self.period;
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                _ = tokio::time::sleep_until(due) => {}
            }
            baseline = due;

            self.tick()?;
        }

        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        info!("Local sampler stopped");
        Ok(())
    }

    fn tick(&mut self) -> Result<(), ServerError> {
        // The handshake file is re-created if an outside actor removed it;
        // the remote merge depends on it for every inbound message.
        if !self.reference_file.exists() {
            if let Some(log) = &self.log {
                warn!("Reference file disappeared, rewriting");
                ReferenceRecord::new(log.reference_time(), log.local_id())
                    .write(&self.reference_file)?;
            }
        }

        match self.source.poll()? {
            SourcePoll::PlayerNotFound => {
                if !self.player_dead {
                    info!("Player not found, waiting for respawn");
                    if let Some(log) = self.log.as_mut() {
                        log.flush()?;
                    }
                }
                self.player_dead = true;
                Ok(())
            }
            SourcePoll::Sample(sample) => {
                if self.player_dead {
                    // Respawn: fresh session, fresh reference clock
                    self.new_session()?;
                    self.player_dead = false;
                }
                self.record_sample(&sample)
            }
        }
    }

    /// Roll over to a new session recording. Establishment failures are
    /// fatal: without a log and handshake file nothing downstream works.
    fn new_session(&mut self) -> Result<(), ServerError> {
        let filename = session_filename(&self.callsign, Local::now().naive_local());
        let mut path = self.log_dir.join(&filename);
        // A respawn within the same wall-clock second must not truncate
        // the previous session's recording
        let stem = filename.trim_end_matches(".acmi");
        let mut attempt = 1;
        while path.exists() {
            path = self.log_dir.join(format!("{}_{}.acmi", stem, attempt));
            attempt += 1;
        }
        let log = AcmiLog::create(&path)?;

        {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| ServerError::Shutdown)?;
            registry.register(log.local_id());
        }
        ReferenceRecord::new(log.reference_time(), log.local_id()).write(&self.reference_file)?;

        self.log = Some(log);
        self.header_written = false;
        self.meta_written = false;
        Ok(())
    }

    fn record_sample(&mut self, sample: &TelemetrySample) -> Result<(), ServerError> {
        let Some(log) = self.log.as_mut() else {
            return Ok(());
        };

        // Header and first-entry metadata both wait until the source
        // reports the battle area; entries before that are not recorded
        // to keep the header block ahead of every entry in the file.
        if !self.header_written {
            match (&sample.map_name, sample.map_ref_lat, sample.map_ref_lon) {
                (Some(map_name), Some(ref_lat), Some(ref_lon)) => {
                    let header = SessionHeader {
                        data_source: "War Thunder".to_string(),
                        data_recorder: "SkyTrace".to_string(),
                        author: self.callsign.clone(),
                        title: map_name.clone(),
                        comments: format!("Local: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
                        reference_longitude: ref_lon,
                        reference_latitude: ref_lat,
                    };
                    log.insert_header(&header)?;
                    self.header_written = true;
                }
                _ => {
                    debug!("No battle area yet, sample not recorded");
                    return Ok(());
                }
            }
        }

        let mut entry = Entry::from_sample(sample);
        if !self.meta_written {
            entry = entry.with_meta(ObjectMeta::for_sample(sample, self.blue_team));
            self.meta_written = true;
        }

        let (ts, _id) = log.insert_entry(LOCAL_KEY, &entry)?;
        let line = log.format_entry(LOCAL_KEY, &entry, ts)?;
        let ref_time = log.reference_time().format(REF_TIME_FORMAT).to_string();

        self.bus.dispatch_local(&line, sample, &ref_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReplaySource;
    use skytrace_core::ids::ObjectId;
    use std::fs;
    use tempfile::TempDir;

    struct ScriptedSource {
        polls: Vec<SourcePoll>,
    }

    impl TelemetrySource for ScriptedSource {
        fn poll(&mut self) -> Result<SourcePoll, ServerError> {
            if self.polls.is_empty() {
                Ok(SourcePoll::PlayerNotFound)
            } else {
                Ok(self.polls.remove(0))
            }
        }
    }

    fn sampler(temp: &TempDir, source: Box<dyn TelemetrySource>) -> LocalSampler {
        let log_dir = temp.path().join("logs");
        fs::create_dir_all(&log_dir).unwrap();
        LocalSampler::new(
            source,
            DistributionBus::disconnected(),
            Arc::new(Mutex::new(IdAllocator::new())),
            log_dir,
            temp.path().join("reference.txt"),
            "pilot1".to_string(),
            true,
            10.0,
        )
    }

    fn orbit_sample() -> TelemetrySample {
        let mut source = ReplaySource::new();
        match source.poll().unwrap() {
            SourcePoll::Sample(s) => s,
            SourcePoll::PlayerNotFound => unreachable!(),
        }
    }

    #[test]
    fn test_first_session_writes_handshake_file() {
        let temp = TempDir::new().unwrap();
        let mut s = sampler(&temp, Box::new(ScriptedSource { polls: vec![] }));
        s.new_session().unwrap();

        let record = ReferenceRecord::read(&temp.path().join("reference.txt")).unwrap();
        assert_eq!(record.object_id, ObjectId::from_index(1));
    }

    #[test]
    fn test_respawn_rolls_over_session() {
        let temp = TempDir::new().unwrap();
        let sample = orbit_sample();
        let mut s = sampler(
            &temp,
            Box::new(ScriptedSource {
                polls: vec![
                    SourcePoll::Sample(sample.clone()),
                    SourcePoll::PlayerNotFound,
                    SourcePoll::PlayerNotFound,
                    SourcePoll::PlayerNotFound,
                    SourcePoll::Sample(sample),
                ],
            }),
        );
        s.new_session().unwrap();
        s.player_dead = false;
        let first_path = s.log.as_ref().unwrap().path().to_path_buf();

        s.tick().unwrap(); // sample into first session
        for _ in 0..3 {
            s.tick().unwrap(); // player lost
        }
        assert!(s.player_dead);
        s.tick().unwrap(); // respawn

        let second_path = s.log.as_ref().unwrap().path().to_path_buf();
        assert_ne!(first_path, second_path);
        assert!(!s.player_dead);
        // Fresh session restarts header and metadata emission
        let contents = fs::read_to_string(&second_path).unwrap();
        assert!(contents.contains("0,DataSource=War Thunder"));
        assert!(contents.contains("Coalition=Blue_Team"));
    }

    #[test]
    fn test_header_waits_for_battle_area() {
        let temp = TempDir::new().unwrap();
        let mut bare = orbit_sample();
        bare.map_name = None;
        let full = orbit_sample();
        let mut s = sampler(
            &temp,
            Box::new(ScriptedSource {
                polls: vec![SourcePoll::Sample(bare), SourcePoll::Sample(full)],
            }),
        );
        s.new_session().unwrap();
        s.player_dead = false;

        s.tick().unwrap();
        let path = s.log.as_ref().unwrap().path().to_path_buf();
        let contents = fs::read_to_string(&path).unwrap();
        // No header and no entry yet
        assert!(!contents.contains("0,DataSource="));
        assert!(!contents.contains("\n#"));

        s.tick().unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let header_pos = contents.find("0,DataSource=").unwrap();
        let entry_pos = contents.find("\n#").unwrap();
        assert!(header_pos < entry_pos);
    }

    #[test]
    fn test_metadata_only_on_first_entry() {
        let temp = TempDir::new().unwrap();
        let sample = orbit_sample();
        let mut s = sampler(
            &temp,
            Box::new(ScriptedSource {
                polls: vec![
                    SourcePoll::Sample(sample.clone()),
                    SourcePoll::Sample(sample),
                ],
            }),
        );
        s.new_session().unwrap();
        s.player_dead = false;

        s.tick().unwrap();
        s.tick().unwrap();

        let path = s.log.as_ref().unwrap().path().to_path_buf();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Coalition=").count(), 1);
        assert_eq!(contents.matches("\n#").count(), 2);
    }

    #[test]
    fn test_missing_reference_file_recreated() {
        let temp = TempDir::new().unwrap();
        let sample = orbit_sample();
        let mut s = sampler(
            &temp,
            Box::new(ScriptedSource {
                polls: vec![SourcePoll::Sample(sample)],
            }),
        );
        s.new_session().unwrap();
        s.player_dead = false;

        let ref_path = temp.path().join("reference.txt");
        fs::remove_file(&ref_path).unwrap();
        s.tick().unwrap();
        assert!(ref_path.exists());
    }
}
