//! Distribution bus.
//!
//! Fans each recorded local entry out to the optional delivery sinks: the
//! live stream buffer, the peer broadcast, the auxiliary device and the
//! in-process overlay feed. Every sink is best-effort and isolated; a
//! failing sink logs, possibly disables itself, and never disturbs the
//! others or the recording path.

use log::{error, warn};
use rumqttc::{AsyncClient, QoS};
use std::sync::Arc;
use tokio::sync::broadcast;

use skytrace_core::entry::TelemetrySample;
use skytrace_core::wire::PeerMessage;

use crate::buffer::StreamBuffer;
use crate::device::DeviceSink;

/// Publish failures in a row before the peer broadcast gives up.
const MQTT_FAILURE_LIMIT: u32 = 10;

/// Best-effort peer broadcast over the session topic.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    callsign: String,
    consecutive_failures: u32,
    enabled: bool,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topic: String, callsign: String) -> Self {
        Self {
            client,
            topic,
            callsign,
            consecutive_failures: 0,
            enabled: true,
        }
    }

    fn publish(&mut self, entry: &str, ref_time: &str) {
        if !self.enabled {
            return;
        }
        let msg = PeerMessage {
            player: self.callsign.clone(),
            ref_time: ref_time.to_string(),
            entry: entry.to_string(),
        };
        let payload = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode peer message: {}", e);
                return;
            }
        };
        match self
            .client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload)
        {
            Ok(()) => self.consecutive_failures = 0,
            Err(e) => {
                warn!("Peer broadcast publish failed: {}", e);
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MQTT_FAILURE_LIMIT {
                    error!("Peer broadcast failing persistently, disabling");
                    self.enabled = false;
                }
            }
        }
    }
}

/// Per-sample fan-out for the local pipeline.
pub struct DistributionBus {
    stream: Option<Arc<StreamBuffer>>,
    mqtt: Option<MqttPublisher>,
    device: Option<DeviceSink>,
    overlay: Option<broadcast::Sender<TelemetrySample>>,
}

impl DistributionBus {
    pub fn new(
        stream: Option<Arc<StreamBuffer>>,
        mqtt: Option<MqttPublisher>,
        device: Option<DeviceSink>,
        overlay: Option<broadcast::Sender<TelemetrySample>>,
    ) -> Self {
        Self {
            stream,
            mqtt,
            device,
            overlay,
        }
    }

    /// A bus with every sink absent, for recording-only setups and tests.
    pub fn disconnected() -> Self {
        Self::new(None, None, None, None)
    }

    /// Fan one recorded local entry out to all configured sinks.
    pub fn dispatch_local(&mut self, line: &str, sample: &TelemetrySample, ref_time: &str) {
        if let Some(buffer) = &self.stream {
            buffer.push(line.to_string());
        }
        if let Some(publisher) = self.mqtt.as_mut() {
            publisher.publish(line, ref_time);
        }
        if let Some(device) = self.device.as_mut() {
            if let Err(e) = device.send(sample) {
                error!("Device write failed, disabling device output: {}", e);
                self.device = None;
            }
        }
        if let Some(overlay) = &self.overlay {
            // Lagging or absent receivers are not an error
            let _ = overlay.send(sample.clone());
        }
    }
}
