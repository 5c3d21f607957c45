//! Server middleware
//!
//! Provides event logging, statistics, and transfer rate limiting.

pub mod logging;
pub mod rate_limit;
pub mod statistics;

pub use logging::{EventFanout, EventSink, LoggingEventSink, TransferEvent};
pub use rate_limit::TransferRateLimiter;
pub use statistics::ServerStatistics;
