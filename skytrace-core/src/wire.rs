//! Peer broadcast payload.
//!
//! Every session participant publishes its formatted entry lines to a
//! shared topic. The payload is deliberately small: sender identity, the
//! sender's reference clock, and one pre-formatted entry line whose leading
//! token is the sender's relative timestamp.

use serde::{Deserialize, Serialize};

/// JSON payload published on the session topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Sender username.
    pub player: String,
    /// Sender's reference clock, ISO-8601.
    pub ref_time: String,
    /// One formatted entry line (`#<ts>\n<id>,T=...`).
    pub entry: String,
}

impl PeerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}
