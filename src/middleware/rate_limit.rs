//! Rate limiting middleware
//!
//! Throttles a single transfer to a ceiling in KB/s.

use std::thread;
use std::time::{Duration, Instant};

/// Ceiling value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Per-transfer throughput limiter.
///
/// Blocks the calling thread with a timed sleep whenever the transfer is
/// ahead of the rate it is allowed; never call it from the command reader.
#[derive(Debug)]
pub struct TransferRateLimiter {
    started: Instant,
    transferred: u64,
    max_kbps: i64,
}

impl TransferRateLimiter {
    pub fn new(max_kbps: i64) -> Self {
        Self {
            started: Instant::now(),
            transferred: 0,
            max_kbps,
        }
    }

    /// Restarts the clock and byte count for a new transfer.
    pub fn reset(&mut self, max_kbps: i64) {
        self.started = Instant::now();
        self.transferred = 0;
        self.max_kbps = max_kbps;
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_kbps <= 0
    }

    /// Accounts for `bytes` more and sleeps if the transfer is running fast.
    pub fn transferred(&mut self, bytes: usize) {
        self.transferred += bytes as u64;
        if let Some(wait) = self.required_delay() {
            thread::sleep(wait);
        }
    }

    /// How long the caller must wait to fall back under the ceiling.
    fn required_delay(&self) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }
        let bytes_per_second = self.max_kbps as f64 * 1024.0;
        let expected = Duration::from_secs_f64(self.transferred as f64 / bytes_per_second);
        expected.checked_sub(self.started.elapsed()).filter(|d| !d.is_zero())
    }

    /// Observed throughput in KB/s since the last reset.
    pub fn current_rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.transferred as f64 / 1024.0 / elapsed
    }

    pub fn total(&self) -> u64 {
        self.transferred
    }
}

impl Default for TransferRateLimiter {
    fn default() -> Self {
        Self::new(UNLIMITED)
    }
}
