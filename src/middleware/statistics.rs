//! In-memory server statistics, fed by the event fan-out.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::middleware::logging::{EventSink, SinkResult, TransferEvent};

#[derive(Debug, Default)]
pub struct ServerStatistics {
    uploads: AtomicU64,
    downloads: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    logins: AtomicU64,
    connections: AtomicU64,
    open_connections: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsSnapshot {
    pub uploads: u64,
    pub downloads: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub logins: u64,
    pub connections: u64,
    pub open_connections: u64,
}

impl ServerStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            open_connections: self.open_connections.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for ServerStatistics {
    fn upload_performed(&self, event: &TransferEvent) -> SinkResult {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(event.bytes, Ordering::Relaxed);
        Ok(())
    }

    fn download_performed(&self, event: &TransferEvent) -> SinkResult {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(event.bytes, Ordering::Relaxed);
        Ok(())
    }

    fn login(&self, _client: SocketAddr, _user: &str) -> SinkResult {
        self.logins.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn session_opened(&self, _client: SocketAddr) -> SinkResult {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.open_connections.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn session_closed(&self, _client: SocketAddr) -> SinkResult {
        let _ = self
            .open_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn counts_sessions_and_transfers() {
        let stats = ServerStatistics::new();
        let client: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        stats.session_opened(client).unwrap();
        stats.login(client, "bob").unwrap();
        stats
            .upload_performed(&TransferEvent {
                client,
                user: "bob".into(),
                path: PathBuf::from("/a"),
                bytes: 10,
            })
            .unwrap();
        stats.session_closed(client).unwrap();
        stats.session_closed(client).unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.uploads, 1);
        assert_eq!(snap.bytes_uploaded, 10);
        assert_eq!(snap.logins, 1);
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.open_connections, 0);
    }
}
