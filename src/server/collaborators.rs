//! Services injected into every session.

use std::sync::Arc;

use crate::middleware::{EventFanout, LoggingEventSink, ServerStatistics};
use crate::storage::{AccessPolicy, HomeDirectoryPolicy};
use crate::transfer::data_channel::SecureTransport;

#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessPolicy>,
    pub events: EventFanout,
    pub statistics: Arc<ServerStatistics>,
    pub transport: Option<Arc<dyn SecureTransport>>,
}

impl Collaborators {
    /// Home-directory access checks, log and statistics sinks, no TLS.
    pub fn standard() -> Self {
        let statistics = Arc::new(ServerStatistics::new());
        Self {
            access: Arc::new(HomeDirectoryPolicy),
            events: EventFanout::new()
                .with_sink(Arc::new(LoggingEventSink))
                .with_sink(statistics.clone()),
            statistics,
            transport: None,
        }
    }

    pub fn with_access_policy(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn SecureTransport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::standard()
    }
}
