//! Connection Pool Statistics

/// Snapshot of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots holding a live connection
    pub slots: usize,
    /// Backend connect calls, fallbacks included
    pub connect_attempts: u64,
    pub connect_failures: u64,
    /// Connects that were retried against the fallback node
    pub fallbacks: u64,
    /// Private connections handed out by `checkout`
    pub checkouts: u64,
}

impl PoolStats {
    /// Calculate the error rate as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.connect_attempts > 0 {
            (self.connect_failures as f64 / self.connect_attempts as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        100.0 - self.error_rate()
    }
}
