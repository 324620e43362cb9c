//! Time utilities for game simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Duration of one simulation tick
pub fn tick_duration() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

/// True while `since` is set and less than `window` has passed before `now`.
///
/// Timestamps are `tokio::time::Instant` so the simulation follows paused
/// time in tests.
pub fn within(since: Option<tokio::time::Instant>, window: Duration, now: tokio::time::Instant) -> bool {
    since.is_some_and(|t| now.saturating_duration_since(t) < window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn tick_is_thirty_hertz() {
        assert_eq!(tick_duration(), Duration::from_micros(33_333));
    }

    #[test]
    fn within_window() {
        let t0 = Instant::now();
        let window = Duration::from_millis(500);
        assert!(!within(None, window, t0));
        assert!(within(Some(t0), window, t0 + Duration::from_millis(499)));
        assert!(!within(Some(t0), window, t0 + Duration::from_millis(500)));
    }
}
