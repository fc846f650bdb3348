//! Live telemetry stream relay.
//!
//! Listens on localhost for viewer connections, performs the low-level
//! protocol handshake and then drains the shared stream buffer to every
//! connected viewer. The relay is lossy by design: the buffer is cleared
//! when it overflows, and a slow or dead viewer only ends its own handler.

use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use skytrace_core::header::format_preamble;

use crate::buffer::StreamBuffer;
use crate::error::ServerError;

/// Low-level stream handshake sent before any telemetry.
pub const HANDSHAKE: &[u8] = b"XtraLib.Stream.0\nTacview.RealTimeTelemetry.0\nSkyTrace\n\x00";

/// Drain pass interval while a viewer is connected.
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

pub struct StreamRelay {
    port: u16,
    buffer: Arc<StreamBuffer>,
}

impl StreamRelay {
    pub fn new(port: u16, buffer: Arc<StreamBuffer>) -> Self {
        Self { port, buffer }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|_| ServerError::PortInUse(self.port))?;
        info!("Live telemetry stream listening on 127.0.0.1:{}", self.port);

        let mut handler_seq = 0u64;
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Viewer connected from {}", addr);
                        handler_seq += 1;
                        let buffer = Arc::clone(&self.buffer);
                        subsys.start(SubsystemBuilder::new(
                            format!("Viewer-{}", handler_seq),
                            move |s| handle_viewer(s, stream, buffer),
                        ));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                    }
                },
            }
        }
        info!("Stream relay stopped");
        Ok(())
    }
}

async fn handle_viewer(
    subsys: SubsystemHandle,
    mut stream: TcpStream,
    buffer: Arc<StreamBuffer>,
) -> Result<(), ServerError> {
    tokio::select! {
        _ = subsys.on_shutdown_requested() => {}
        result = serve_viewer(&mut stream, &buffer) => {
            if let Err(e) = result {
                info!("Viewer connection closed: {}", e);
            }
        }
    }
    Ok(())
}

/// Handshake, then drain the buffer to the viewer until it goes away.
async fn serve_viewer(stream: &mut TcpStream, buffer: &StreamBuffer) -> Result<(), ServerError> {
    stream.write_all(HANDSHAKE).await?;

    // The viewer answers with its own handshake blob; its content is
    // irrelevant here, it only has to be consumed.
    let mut scratch = [0u8; 1024];
    let n = stream.read(&mut scratch).await?;
    if n == 0 {
        return Ok(());
    }

    let preamble = format_preamble(Utc::now().naive_utc());
    stream.write_all(preamble.as_bytes()).await?;

    loop {
        if buffer.clear_if_over_cap() {
            warn!("Stream buffer overflowed, dropped pending lines");
        }
        while let Some(line) = buffer.pop_back() {
            stream.write_all(line.as_bytes()).await?;
        }
        tokio::time::sleep(DRAIN_INTERVAL).await;
    }
}
