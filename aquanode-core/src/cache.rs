//! Published snapshot model and the mutex-protected snapshot cache
//!
//! ## Snapshot semantics
//!
//! A [`Snapshot`] is one fully-formed set of per-slot readings plus battery,
//! link quality and a single capture timestamp. It is immutable once
//! published: the scheduler replaces the whole structure under the cache
//! lock, so a reader either sees the previous snapshot or the new one, never
//! a mix of two polling cycles.
//!
//! ## Staleness
//!
//! Per-slot last-known-good readings may stand in for a failed fetch, but
//! only while they are younger than [`STALENESS_WINDOW_MS`]. At or beyond
//! that age the cache behaves as if the reading never existed - consumers get
//! "sensor unavailable" rather than stale data presented as fresh.
//!
//! ## Locking
//!
//! The cache mutex is only ever held for a copy or a pointer swap. All
//! acquisitions are bounded: rather than parking indefinitely, callers poll
//! the lock in small steps and give up with [`SensorError::Timeout`] after
//! [`CACHE_LOCK_TIMEOUT_MS`].

use crate::time::Timestamp;
use crate::types::{SensorType, MAX_SENSOR_VALUES};

#[cfg(feature = "std")]
use crate::errors::{SensorError, SensorResult};

/// Maximum number of sensor slots in one snapshot
pub use crate::registry::MAX_EZO_SENSORS as MAX_SNAPSHOT_SLOTS;

/// Maximum age at which a cached reading may still be used as a fallback
pub const STALENESS_WINDOW_MS: u64 = 300_000;

/// Bounded wait for the cache mutex
pub const CACHE_LOCK_TIMEOUT_MS: u32 = 100;

#[cfg(feature = "std")]
const LOCK_POLL_STEP_MS: u32 = 5;

/// One captured reading: up to four values and the time they were fetched
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Parsed values, in the order the device reported them
    pub values: heapless::Vec<f32, MAX_SENSOR_VALUES>,
    /// Capture timestamp (monotonic milliseconds)
    pub timestamp: Timestamp,
}

/// Per-slot last-known-good reading, superseded in place
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachedReading {
    /// The reading itself
    pub reading: Reading,
    /// Whether this slot has ever captured a reading
    pub valid: bool,
}

impl CachedReading {
    /// Whether this reading may still be used as a fallback at `now`
    ///
    /// Exactly at the window boundary the reading is already stale. A clock
    /// that moved backwards also invalidates it.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        if !self.valid {
            return false;
        }
        match now.checked_sub(self.reading.timestamp) {
            Some(age) => age < STALENESS_WINDOW_MS,
            None => false,
        }
    }

    /// Replace this slot's reading
    pub fn store(&mut self, reading: Reading) {
        self.reading = reading;
        self.valid = true;
    }
}

/// One sensor slot inside a published snapshot
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotReading {
    /// Type of the sensor occupying this slot
    pub sensor_type: SensorType,
    /// Values, in device-reported order (empty when invalid)
    pub values: heapless::Vec<f32, MAX_SENSOR_VALUES>,
    /// Whether the values are usable (fresh or within the staleness window)
    pub valid: bool,
}

/// One atomically-published set of sensor readings
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    /// Per-sensor slots, aligned to discovery order
    pub slots: heapless::Vec<SlotReading, MAX_SNAPSHOT_SLOTS>,
    /// Battery state of charge, when the gauge answered this cycle
    pub battery_percent: Option<f32>,
    /// Link quality as reported by the network collaborator
    pub rssi: Option<i8>,
    /// Capture timestamp for the whole snapshot
    pub timestamp: Timestamp,
}

/// Callback invoked synchronously with a copy of each published snapshot
///
/// Called outside the cache lock, so the callback may itself call
/// [`SnapshotCache::latest`].
#[cfg(feature = "std")]
pub type SnapshotListener = Box<dyn Fn(&Snapshot) + Send>;

/// Mutex-protected holder for the most recently published snapshot
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct SnapshotCache {
    inner: std::sync::Mutex<Option<Snapshot>>,
}

#[cfg(feature = "std")]
impl SnapshotCache {
    /// An empty cache (nothing published yet)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot
    ///
    /// The lock is bounded like every other acquisition; a publish that
    /// cannot get the lock within the window reports `Timeout` and leaves
    /// the previous snapshot in place.
    pub fn publish(&self, snapshot: Snapshot) -> SensorResult<()> {
        let mut guard = lock_bounded(&self.inner, CACHE_LOCK_TIMEOUT_MS)?;
        *guard = Some(snapshot);
        Ok(())
    }

    /// Deep copy of the last published snapshot
    ///
    /// Returns `NotFound` if no polling cycle has ever published.
    pub fn latest(&self) -> SensorResult<Snapshot> {
        let guard = lock_bounded(&self.inner, CACHE_LOCK_TIMEOUT_MS)?;
        guard.clone().ok_or(SensorError::NotFound)
    }
}

/// Acquire a mutex with a bounded cooperative wait
///
/// Polls `try_lock` in small sleep steps instead of parking, returning an
/// explicit `Timeout` once the budget is spent. A poisoned lock is recovered:
/// snapshot publication replaces the whole value, so no half-written state
/// can be observed.
#[cfg(feature = "std")]
pub(crate) fn lock_bounded<T>(
    mutex: &std::sync::Mutex<T>,
    timeout_ms: u32,
) -> SensorResult<std::sync::MutexGuard<'_, T>> {
    use std::sync::TryLockError;

    let mut waited_ms = 0u32;
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                if waited_ms >= timeout_ms {
                    return Err(SensorError::Timeout { waited_ms });
                }
                std::thread::sleep(std::time::Duration::from_millis(LOCK_POLL_STEP_MS as u64));
                waited_ms += LOCK_POLL_STEP_MS;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading_at(timestamp: Timestamp) -> CachedReading {
        let mut values = heapless::Vec::new();
        values.push(7.0).unwrap();
        CachedReading {
            reading: Reading { values, timestamp },
            valid: true,
        }
    }

    #[test]
    fn staleness_boundary_is_exclusive() {
        let cached = reading_at(1_000);

        assert!(cached.is_fresh(1_000));
        assert!(cached.is_fresh(1_000 + STALENESS_WINDOW_MS - 1));
        // Exactly at the window the cache must behave as if empty
        assert!(!cached.is_fresh(1_000 + STALENESS_WINDOW_MS));
        assert!(!cached.is_fresh(1_000 + STALENESS_WINDOW_MS + 1));
    }

    #[test]
    fn backwards_clock_invalidates_cache() {
        let cached = reading_at(5_000);
        assert!(!cached.is_fresh(4_999));
    }

    #[test]
    fn invalid_slot_is_never_fresh() {
        let cached = CachedReading::default();
        assert!(!cached.is_fresh(0));
        assert!(!cached.is_fresh(u64::MAX));
    }

    #[cfg(feature = "std")]
    #[test]
    fn cache_reports_not_found_before_first_publish() {
        let cache = SnapshotCache::new();
        assert_eq!(cache.latest(), Err(SensorError::NotFound));
    }

    #[cfg(feature = "std")]
    #[test]
    fn publish_then_latest_round_trips() {
        let cache = SnapshotCache::new();
        let mut snapshot = Snapshot::default();
        snapshot.timestamp = 42;
        cache.publish(snapshot.clone()).unwrap();
        assert_eq!(cache.latest().unwrap(), snapshot);
    }

    #[cfg(feature = "std")]
    #[test]
    fn bounded_lock_times_out_when_held() {
        use std::sync::{Arc, Mutex};

        let mutex = Arc::new(Mutex::new(0u32));
        let held = Arc::clone(&mutex);

        // Hold the lock on another thread past the caller's budget.
        let (tx, rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        rx.recv().unwrap();

        let result = lock_bounded(&mutex, 50);
        assert!(matches!(result, Err(SensorError::Timeout { .. })));

        holder.join().unwrap();
    }
}
