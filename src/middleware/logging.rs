//! Logging middleware
//!
//! Session and transfer notifications. The server hands every event to an
//! `EventFanout`, which forwards it to each registered `EventSink` and logs
//! (rather than propagates) a sink that fails.

use log::{info, warn};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

pub type SinkResult = Result<(), Box<dyn Error + Send + Sync>>;

/// A completed upload or download.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub client: SocketAddr,
    pub user: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Receiver of server events.
pub trait EventSink: Send + Sync {
    fn upload_performed(&self, event: &TransferEvent) -> SinkResult;
    fn download_performed(&self, event: &TransferEvent) -> SinkResult;
    fn login(&self, client: SocketAddr, user: &str) -> SinkResult;
    fn session_opened(&self, client: SocketAddr) -> SinkResult;
    fn session_closed(&self, client: SocketAddr) -> SinkResult;
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn upload_performed(&self, event: &TransferEvent) -> SinkResult {
        info!(
            "Client {} ({}) uploaded {} ({} bytes)",
            event.client,
            event.user,
            event.path.display(),
            event.bytes
        );
        Ok(())
    }

    fn download_performed(&self, event: &TransferEvent) -> SinkResult {
        info!(
            "Client {} ({}) downloaded {} ({} bytes)",
            event.client,
            event.user,
            event.path.display(),
            event.bytes
        );
        Ok(())
    }

    fn login(&self, client: SocketAddr, user: &str) -> SinkResult {
        info!("Client {} logged in as {}", client, user);
        Ok(())
    }

    fn session_opened(&self, client: SocketAddr) -> SinkResult {
        info!("Client connected: {}", client);
        Ok(())
    }

    fn session_closed(&self, client: SocketAddr) -> SinkResult {
        info!("Client disconnected: {}", client);
        Ok(())
    }
}

/// Broadcasts events to several sinks; one failing sink does not stop the
/// others.
#[derive(Clone, Default)]
pub struct EventFanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn each<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn EventSink) -> SinkResult,
    {
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                warn!("Event sink failed handling {}: {}", event, e);
            }
        }
    }

    pub fn upload_performed(&self, event: &TransferEvent) {
        self.each("upload", |sink| sink.upload_performed(event));
    }

    pub fn download_performed(&self, event: &TransferEvent) {
        self.each("download", |sink| sink.download_performed(event));
    }

    pub fn login(&self, client: SocketAddr, user: &str) {
        self.each("login", |sink| sink.login(client, user));
    }

    pub fn session_opened(&self, client: SocketAddr) {
        self.each("session open", |sink| sink.session_opened(client));
    }

    pub fn session_closed(&self, client: SocketAddr) {
        self.each("session close", |sink| sink.session_closed(client));
    }
}

/// Log a client command
pub fn log_command(client_addr: &SocketAddr, command: &str) {
    info!("Client {} executed: {}", client_addr, command);
}
