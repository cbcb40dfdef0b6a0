//! Timing and retry configuration
//!
//! One `SyncConfig` is handed to the registry and shared by every connection
//! it creates. The defaults match a browser-facing deployment; tests shrink
//! the windows to keep runs fast.

use std::time::Duration;

/// Tunables for connection lifecycle and retry behavior.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// How long a connect attempt may stay half-open before it is abandoned.
    pub connect_timeout: Duration,

    /// Interval between keepalive pings while the channel is open.
    pub keepalive_interval: Duration,

    /// Base reconnect delay; doubles per failed attempt.
    pub reconnect_base: Duration,

    /// Upper bound on the reconnect delay.
    pub reconnect_cap: Duration,

    /// Total connect attempts before giving up with a terminal error.
    pub max_connect_attempts: u32,

    /// How long a connection survives after its last subscriber detaches.
    /// Absorbs rapid remounts during navigation.
    pub grace_delay: Duration,

    /// Delay before re-running a flush pass that left the queue non-empty.
    pub flush_retry_delay: Duration,

    /// How long a non-fatal error stays visible on a subscription.
    pub transient_error_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_connect_attempts: 5,
            grace_delay: Duration::from_secs(2),
            flush_retry_delay: Duration::from_millis(50),
            transient_error_ttl: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Backoff delay before reconnect attempt `attempts + 1`:
    /// `min(base * 2^attempts, cap)`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.reconnect_base
            .saturating_mul(factor)
            .min(self.reconnect_cap)
    }
}
