//! Remote session merge.
//!
//! Subscribes to the shared session topic and folds peer telemetry into
//! the local picture: every inbound entry line is rebased onto the local
//! reference clock, given a locally unique object identifier, appended to
//! a per-peer recording log and pushed to the live stream. A malformed or
//! unreconcilable message is logged and dropped; the merge never stops
//! over one bad peer.

use chrono::Local;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_graceful_shutdown::SubsystemHandle;

use skytrace_core::clock::{parse_leading_timestamp, parse_ref_time, rebase, rewrite_timestamp};
use skytrace_core::ids::{rewrite_object_id, IdAllocator, ObjectId};
use skytrace_core::wire::PeerMessage;

use crate::buffer::StreamBuffer;
use crate::error::ServerError;
use crate::recording::{session_filename, AcmiLog};
use crate::reference::ReferenceRecord;

/// Wait before re-polling the broker after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

struct RemotePlayer {
    id: ObjectId,
    log: AcmiLog,
    /// Blocked peers are still recorded, only hidden from the stream.
    blocked: bool,
    /// Last timestamp appended to this peer's log. The broker gives no
    /// ordering guarantee, but per-log timestamps must not decrease.
    last_ts: Option<f64>,
}

pub struct RemoteMerge {
    callsign: String,
    topic: String,
    client: AsyncClient,
    /// Taken out of the struct when the run loop starts.
    eventloop: Option<EventLoop>,
    buffer: Option<Arc<StreamBuffer>>,
    registry: Arc<Mutex<IdAllocator>>,
    blocked: HashSet<String>,
    remote_dir: PathBuf,
    reference_file: PathBuf,
    players: HashMap<String, RemotePlayer>,
    rng: StdRng,
}

impl RemoteMerge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        callsign: String,
        topic: String,
        client: AsyncClient,
        eventloop: EventLoop,
        buffer: Option<Arc<StreamBuffer>>,
        registry: Arc<Mutex<IdAllocator>>,
        blocked: HashSet<String>,
        remote_dir: PathBuf,
        reference_file: PathBuf,
    ) -> Self {
        Self {
            callsign,
            topic,
            client,
            eventloop: Some(eventloop),
            buffer,
            registry,
            blocked,
            remote_dir,
            reference_file,
            players: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        info!("Remote merge joining session '{}'", self.topic);
        let mut eventloop = self.eventloop.take().ok_or(ServerError::Shutdown)?;
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to broker, subscribing to '{}'", self.topic);
                        if let Err(e) = self.client.subscribe(&self.topic, QoS::AtMostOnce).await {
                            warn!("Subscribe failed: {}", e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Err(e) = self.handle_message(&publish.payload) {
                            warn!("Dropping peer message: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Broker connection error: {}", e);
                        tokio::select! {
                            _ = subsys.on_shutdown_requested() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }

        for player in self.players.values_mut() {
            if let Err(e) = player.log.flush() {
                warn!("Failed to flush remote log: {}", e);
            }
        }
        info!("Remote merge stopped");
        Ok(())
    }

    /// Reconcile one inbound peer message against the local session.
    fn handle_message(&mut self, payload: &[u8]) -> Result<(), ServerError> {
        let msg = PeerMessage::from_json(payload)
            .map_err(|e| ServerError::ParseJson(e.to_string()))?;

        // Own broadcasts come back from the topic; the local entry is
        // already recorded and streamed.
        if msg.player == self.callsign {
            debug!("Ignoring own echo");
            return Ok(());
        }

        let local = ReferenceRecord::read(&self.reference_file)?;

        let remote_ref = parse_ref_time(&msg.ref_time)?;
        let relative = parse_leading_timestamp(&msg.entry)?;
        let reconciled = rebase(remote_ref, relative, local.ref_time);

        if !self.players.contains_key(&msg.player) {
            let player = self.admit_player(&msg.player, local.object_id)?;
            self.players.insert(msg.player.clone(), player);
        }
        let player = self
            .players
            .get_mut(&msg.player)
            .ok_or_else(|| ServerError::UnknownObject(msg.player.clone()))?;

        // Out-of-order delivery must not write decreasing timestamps
        // into the peer's log
        let mut ts = reconciled;
        if let Some(prev) = player.last_ts {
            ts = ts.max(prev);
        }

        let line = rewrite_timestamp(&msg.entry, ts)?;
        let line = rewrite_object_id(&line, player.id)?;
        player.log.append_raw(&line)?;
        player.last_ts = Some(ts);

        if let Some(buffer) = &self.buffer {
            if !player.blocked {
                buffer.push(line);
            }
        }
        Ok(())
    }

    /// First sight of a peer: allocate a collision-free identifier and
    /// open its recording log.
    fn admit_player(&mut self, name: &str, local_id: ObjectId) -> Result<RemotePlayer, ServerError> {
        let id = {
            let mut registry = self.registry.lock().map_err(|_| ServerError::Shutdown)?;
            registry.register(local_id);
            registry.allocate(&mut self.rng)?
        };

        let filename = session_filename(name, Local::now().naive_local());
        let log = AcmiLog::create(&self.remote_dir.join(filename))?;

        let blocked = self.blocked.contains(name);
        info!(
            "New remote player '{}' as object {}{}",
            name,
            id,
            if blocked { " (blocked from stream)" } else { "" }
        );
        Ok(RemotePlayer {
            id,
            log,
            blocked,
            last_ts: None,
        })
    }
}
