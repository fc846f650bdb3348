//! # SkyTrace Server
//!
//! Flight telemetry recorder and relay for War Thunder.
//!
//! The server polls local flight telemetry at a fixed rate and fans each
//! sample out to several consumers:
//! - An ACMI recording log on disk, one file per flight session
//! - A localhost TCP stream for live viewing in Tacview
//! - An MQTT session topic, merging multiple players into one picture
//! - An optional auxiliary device fed compact binary frames
//!
//! ## Architecture
//!
//! The server is built on top of [`skytrace_core`] for platform-independent
//! format handling, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    skytrace-server                       │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ LocalSampler│  │ RemoteMerge  │  │ StreamRelay     │  │
//! │  │ (source     │  │ (MQTT topic, │  │ (TCP viewers,   │  │
//! │  │  polling)   │  │  rumqttc)    │  │  lossy buffer)  │  │
//! │  └──────┬──────┘  └──────┬───────┘  └────────▲────────┘  │
//! │         │                │                   │           │
//! │         ▼                ▼                   │           │
//! │  ┌──────────────────────────────────────────────────────┐│
//! │  │  AcmiLog (per session / per peer) + StreamBuffer     ││
//! │  └──────────────────────────────────────────────────────┘│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Session`] - Main application state container
//! - [`sampler::LocalSampler`] - Fixed-rate local telemetry pipeline
//! - [`merge::RemoteMerge`] - Peer telemetry reconciliation
//! - [`relay::StreamRelay`] - Live stream TCP listener
//! - [`bus::DistributionBus`] - Best-effort per-sample fan-out
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use skytrace_server::{Cli, Session};
//! use tokio_graceful_shutdown::Toplevel;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["skytrace-server", "--replay"]);
//!
//!     Toplevel::new(|s| async move {
//!         match Session::new(&s, args).await {
//!             Ok(_session) => {}
//!             Err(e) => {
//!                 log::error!("Startup failed: {}", e);
//!                 s.request_shutdown();
//!             }
//!         }
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --port` - Live stream TCP port (default: 42674)
//! - `-r, --rate` - Sample rate in Hz (default: 10)
//! - `-s, --session-id` - Join a shared MQTT session
//! - `-v` - Increase verbosity (use multiple times)
//! - `--replay` - Synthetic telemetry for testing without the game

use clap::Parser;
use log::warn;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use skytrace_core::device::DeviceField;
use skytrace_core::entry::TelemetrySample;
use skytrace_core::ids::IdAllocator;

pub mod buffer;
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod merge;
pub mod recording;
pub mod reference;
pub mod relay;
pub mod sampler;
pub mod source;

use buffer::StreamBuffer;
use bus::{DistributionBus, MqttPublisher};
use device::{DeviceSink, FileSink};
use error::ServerError;
use merge::RemoteMerge;
use relay::StreamRelay;
use sampler::LocalSampler;
use source::{JsonlSource, ReplaySource, TelemetrySource};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Team {
    #[default]
    Blue,
    Red,
}

#[derive(Parser, Clone, Debug)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for the live telemetry stream
    #[arg(short, long, default_value_t = 42674)]
    pub port: u16,

    /// Telemetry sample rate in Hz
    #[arg(short, long, default_value_t = 10.0)]
    pub rate: f64,

    /// Pilot callsign; defaults to the OS username
    #[arg(short, long)]
    pub callsign: Option<String>,

    /// Shared session identifier (MQTT topic). No remote merge when absent
    #[arg(short, long)]
    pub session_id: Option<String>,

    /// MQTT broker host for shared sessions
    #[arg(long, default_value = "broker.hivemq.com")]
    pub broker: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub broker_port: u16,

    /// Disable the live telemetry stream
    #[arg(long, default_value_t = false)]
    pub no_stream: bool,

    /// Synthetic telemetry source, for testing without the game
    #[arg(long, default_value_t = false)]
    pub replay: bool,

    /// Replay telemetry samples from a JSON-lines file
    #[arg(long)]
    pub telemetry_file: Option<PathBuf>,

    /// Team for session object metadata
    #[arg(short, long, default_value_t, value_enum)]
    pub team: Team,

    /// Telemetry fields forwarded to the auxiliary device, in frame order
    #[arg(long, value_delimiter = ',')]
    pub device_fields: Vec<DeviceField>,

    /// Byte sink for auxiliary device frames, e.g. /dev/ttyUSB0
    #[arg(long)]
    pub device_out: Option<PathBuf>,

    /// Override the recording directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Hide a player's entries from the live stream (repeatable)
    #[arg(long)]
    pub block: Vec<String>,

    /// Line cap of the outgoing stream buffer
    #[arg(long, default_value_t = buffer::DEFAULT_BUFFER_CAP)]
    pub buffer_cap: usize,
}

pub struct SessionInner {
    pub args: Cli,
    pub callsign: String,
    pub registry: Arc<Mutex<IdAllocator>>,
    pub stream_buffer: Arc<StreamBuffer>,
    pub overlay: broadcast::Sender<TelemetrySample>,
}

#[derive(Clone)]
pub struct Session {
    pub inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, SessionInner>, PoisonError<RwLockReadGuard<'_, SessionInner>>>
    {
        self.inner.read()
    }

    pub fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, SessionInner>, PoisonError<RwLockWriteGuard<'_, SessionInner>>>
    {
        self.inner.write()
    }

    /// Subscribe to the in-process feed of local samples, e.g. for a map
    /// overlay or debug tap. Lagging receivers lose samples, not lines.
    pub fn overlay_feed(&self) -> broadcast::Receiver<TelemetrySample> {
        self.inner
            .read()
            .map(|inner| inner.overlay.subscribe())
            .unwrap_or_else(|poisoned| poisoned.into_inner().overlay.subscribe())
    }

    #[cfg(test)]
    pub fn new_fake() -> Self {
        // This does not actually start anything - only use for testing
        Self::new_base(Cli::parse_from(["skytrace-server", "--replay"]))
    }

    fn new_base(args: Cli) -> Self {
        let callsign = args
            .callsign
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "pilot".to_string());
        let stream_buffer = Arc::new(StreamBuffer::new(args.buffer_cap));
        let (overlay, _) = broadcast::channel(16);

        Session {
            inner: Arc::new(RwLock::new(SessionInner {
                args,
                callsign,
                registry: Arc::new(Mutex::new(IdAllocator::new())),
                stream_buffer,
                overlay,
            })),
        }
    }

    /// Wire up and start every configured subsystem.
    pub async fn new(subsystem: &SubsystemHandle, args: Cli) -> Result<Self, ServerError> {
        let session = Self::new_base(args);

        let (args, callsign, registry, buffer, overlay) = {
            let inner = session.read().map_err(|_| ServerError::Shutdown)?;
            (
                inner.args.clone(),
                inner.callsign.clone(),
                inner.registry.clone(),
                inner.stream_buffer.clone(),
                inner.overlay.clone(),
            )
        };

        let source: Box<dyn TelemetrySource> = if args.replay {
            Box::new(ReplaySource::new())
        } else if let Some(path) = &args.telemetry_file {
            Box::new(JsonlSource::open(path)?)
        } else {
            return Err(ServerError::NoSource);
        };

        // One MQTT client serves both directions: the publisher side of
        // the bus and the subscriber side of the merge.
        let mqtt = match &args.session_id {
            Some(topic) => {
                let client_id = format!("skytrace-{}-{:04x}", callsign, rand::random::<u16>());
                let mut options =
                    rumqttc::MqttOptions::new(client_id, &args.broker, args.broker_port);
                options.set_keep_alive(Duration::from_secs(30));
                let (client, eventloop) = rumqttc::AsyncClient::new(options, 64);
                Some((topic.clone(), client, eventloop))
            }
            None => None,
        };

        let device = if args.device_fields.is_empty() {
            None
        } else {
            match &args.device_out {
                Some(path) => Some(DeviceSink::new(
                    args.device_fields.clone(),
                    Box::new(FileSink::open(path)?),
                )),
                None => {
                    warn!("--device-fields given without --device-out, device output disabled");
                    None
                }
            }
        };

        let bus = DistributionBus::new(
            (!args.no_stream).then(|| buffer.clone()),
            mqtt.as_ref().map(|(topic, client, _)| {
                MqttPublisher::new(client.clone(), topic.clone(), callsign.clone())
            }),
            device,
            Some(overlay),
        );

        let sampler = LocalSampler::new(
            source,
            bus,
            registry.clone(),
            config::logs_dir(args.log_dir.as_deref())?,
            config::reference_file()?,
            callsign.clone(),
            args.team == Team::Blue,
            args.rate,
        );
        subsystem.start(SubsystemBuilder::new("Sampler", |subsys| sampler.run(subsys)));

        if !args.no_stream {
            let relay = StreamRelay::new(args.port, buffer.clone());
            subsystem.start(SubsystemBuilder::new("StreamRelay", |subsys| {
                relay.run(subsys)
            }));
        }

        if let Some((topic, client, eventloop)) = mqtt {
            let merge = RemoteMerge::new(
                callsign,
                topic,
                client,
                eventloop,
                (!args.no_stream).then(|| buffer.clone()),
                registry,
                args.block.iter().cloned().collect::<HashSet<_>>(),
                config::remote_players_dir()?,
                config::reference_file()?,
            );
            subsystem.start(SubsystemBuilder::new("RemoteMerge", |subsys| {
                merge.run(subsys)
            }));
        }

        Ok(session)
    }
}
