//! # Clock Injection
//!
//! Every stored message carries a `created_utc` timestamp. The engine never
//! reads the wall clock directly; it asks the [`Clock`] it was configured
//! with. Production uses [`SystemClock`]; tests substitute [`ManualClock`]
//! and get bit-for-bit deterministic timestamps.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of append timestamps, in milliseconds since the Unix epoch.
///
/// Implementations must be cheap and infallible; the writer thread calls
/// this once per append.
pub trait Clock: Send + Sync {
    /// Current UTC time in milliseconds since the Unix epoch.
    fn utc_now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A hand-cranked clock for deterministic tests.
///
/// Starts at a fixed instant and only moves when told to.
///
/// # Example
///
/// ```rust
/// use stratadb::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_700_000_000_000);
/// assert_eq!(clock.utc_now_ms(), 1_700_000_000_000);
/// clock.advance_ms(250);
/// assert_eq!(clock.utc_now_ms(), 1_700_000_000_250);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at the given instant.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Moves the clock forward.
    pub fn advance_ms(&self, delta: i64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn utc_now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_sane() {
        // Anything after 2020-01-01 and before 2100-01-01 counts as sane.
        let now = SystemClock.utc_now_ms();
        assert!(now > 1_577_836_800_000);
        assert!(now < 4_102_444_800_000);
    }

    #[test]
    fn test_manual_clock_is_deterministic() {
        let clock = ManualClock::new(42);
        assert_eq!(clock.utc_now_ms(), 42);
        assert_eq!(clock.utc_now_ms(), 42);

        clock.advance_ms(8);
        assert_eq!(clock.utc_now_ms(), 50);

        clock.set_ms(1_000);
        assert_eq!(clock.utc_now_ms(), 1_000);
    }
}
