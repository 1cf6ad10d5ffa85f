//! Time and delay abstraction for the sensor node
//!
//! The scheduler and the protocol driver never touch a hardware timer
//! directly. They consume two small traits:
//! - [`TimeSource`] for monotonic timestamps (snapshot stamps, staleness math)
//! - [`Delay`] for blocking waits (command settle times, conversion waits)
//!
//! Host builds get [`SystemClock`]/[`StdDelay`]; tests use [`FixedTime`] or
//! the shared [`MockTime`]/[`MockDelay`] pair, which lets a test "sleep"
//! without wall-clock time passing.

/// Timestamp in milliseconds since an arbitrary monotonic origin
pub type Timestamp = u64;

/// Source of monotonic time for the system
pub trait TimeSource {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// Blocking delay provider
pub trait Delay {
    /// Sleep the calling task for at least `ms` milliseconds
    fn delay_ms(&self, ms: u32);
}

/// Wall-clock backed time source (requires std)
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Thread-sleep backed delay (requires std)
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

#[cfg(feature = "std")]
impl Delay for StdDelay {
    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

/// Fixed time source for single-threaded tests
#[derive(Debug, Clone)]
pub struct FixedTime {
    timestamp: Timestamp,
}

impl FixedTime {
    /// Create a time source pinned at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }

    /// Pin the source at a new timestamp
    pub fn set(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    /// Move the source forward by `ms` milliseconds
    pub fn advance(&mut self, ms: u64) {
        self.timestamp += ms;
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        self.timestamp
    }
}

/// Shared mock time source for concurrent tests
///
/// Clones share the same underlying counter, so a [`MockDelay`] handed to the
/// scheduler advances the clock every consumer observes.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Default)]
pub struct MockTime {
    now_ms: std::sync::Arc<core::sync::atomic::AtomicU64>,
}

#[cfg(feature = "std")]
impl MockTime {
    /// Create a shared mock clock starting at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            now_ms: std::sync::Arc::new(core::sync::atomic::AtomicU64::new(timestamp)),
        }
    }

    /// Move all clones of this clock forward by `ms` milliseconds
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, core::sync::atomic::Ordering::SeqCst);
    }

    /// Pin all clones of this clock at a new timestamp
    pub fn set(&self, timestamp: Timestamp) {
        self.now_ms.store(timestamp, core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(feature = "std")]
impl TimeSource for MockTime {
    fn now(&self) -> Timestamp {
        self.now_ms.load(core::sync::atomic::Ordering::SeqCst)
    }
}

/// Delay that advances a [`MockTime`] instead of sleeping
///
/// Makes timing-sensitive scheduler tests instantaneous and deterministic.
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct MockDelay {
    clock: MockTime,
}

#[cfg(feature = "std")]
impl MockDelay {
    /// Create a delay bound to `clock`
    pub fn new(clock: MockTime) -> Self {
        Self { clock }
    }
}

#[cfg(feature = "std")]
impl Delay for MockDelay {
    fn delay_ms(&self, ms: u32) {
        self.clock.advance(ms as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_time_advances() {
        let mut time = FixedTime::new(1000);
        assert_eq!(time.now(), 1000);

        time.advance(500);
        assert_eq!(time.now(), 1500);
    }

    #[cfg(feature = "std")]
    #[test]
    fn mock_time_is_shared_across_clones() {
        let time = MockTime::new(0);
        let delay = MockDelay::new(time.clone());

        delay.delay_ms(750);
        assert_eq!(time.now(), 750);

        time.set(10_000);
        assert_eq!(time.now(), 10_000);
    }
}
