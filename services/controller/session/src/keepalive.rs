//! Keepalive tracking with ECHO_REQUEST/ECHO_REPLY and RTT measurement.
//!
//! The session sends an echo probe on one timer and checks liveness on
//! another. The monitor only records timestamps; deciding to close is the
//! session's job.

use std::time::Duration;

use tokio::time::Instant;

/// Liveness state for one connection
#[derive(Debug, Clone)]
pub struct KeepaliveMonitor {
    timeout: Duration,
    last_reply: Instant,
    last_probe: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl KeepaliveMonitor {
    /// Start monitoring; the connection counts as healthy at `now`
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_reply: now,
            last_probe: None,
            last_rtt: None,
        }
    }

    /// Record a probe being sent
    pub fn record_probe(&mut self, now: Instant) {
        self.last_probe = Some(now);
    }

    /// Record a reply and return the RTT if a probe was outstanding
    pub fn record_reply(&mut self, now: Instant) -> Option<Duration> {
        self.last_reply = now;
        let rtt = self
            .last_probe
            .take()
            .map(|sent| now.saturating_duration_since(sent));
        if rtt.is_some() {
            self.last_rtt = rtt;
        }
        rtt
    }

    /// No reply for strictly longer than the timeout
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_reply) > self.timeout
    }

    /// Time since the last reply (or since monitoring started)
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_reply)
    }

    /// Most recent RTT measurement
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}
