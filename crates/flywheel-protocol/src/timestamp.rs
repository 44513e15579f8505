//! Timestamp helpers shared by the codec and the driver.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since the first call in this process.
///
/// Unaffected by wall-clock adjustments; safe to store in an `AtomicU64`.
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Wall-clock microseconds since the Unix epoch (0 if the clock is before the epoch).
pub fn system_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monotonic_micros_increases() {
        let a = monotonic_micros();
        thread::sleep(Duration::from_millis(2));
        let b = monotonic_micros();
        assert!(b > a);
    }

    #[test]
    fn test_system_micros_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(system_micros() > 1_577_836_800_000_000);
    }
}
