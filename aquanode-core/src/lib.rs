//! Sensor core for the aquanode water-quality monitor
//!
//! Talks to a bus of slow, asynchronously-converting EZO probe circuits plus
//! a battery fuel gauge, and keeps one atomically-published snapshot of all
//! readings that the rest of the node (telemetry, dashboard, calibration UI)
//! consumes without ever touching the bus.
//!
//! Key constraints:
//! - Drivers and data model are `no_std`-capable, heapless, allocation-free
//! - One background task owns the polling cycle; everything else reads the
//!   snapshot cache or goes through the pause/resume handshake
//! - Blocking calls only - no async runtime
//!
//! ```no_run
//! use aquanode_core::{BusPort, ManagerConfig, SensorManager, SensorResult};
//!
//! fn bring_up<B: BusPort + Send + 'static>(bus: B) -> SensorResult<()> {
//!     let mut sensors = SensorManager::new(bus, ManagerConfig::default());
//!     sensors.init()?;
//!     sensors.start_polling();
//!
//!     // Consumers only ever see whole snapshots
//!     if let Ok(snapshot) = sensors.get_cached_data() {
//!         for slot in &snapshot.slots {
//!             let _ = (slot.sensor_type, slot.valid);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod logging;

pub mod battery;
pub mod bus;
pub mod cache;
pub mod errors;
pub mod ezo;
pub mod registry;
pub mod time;
pub mod types;

#[cfg(feature = "std")]
pub mod manager;
#[cfg(feature = "std")]
pub mod scheduler;

// Public API
pub use bus::BusPort;
pub use errors::{SensorError, SensorResult};
pub use types::{Capabilities, SensorType, MAX_SENSOR_VALUES};

pub use battery::{BatteryGauge, BATTERY_GAUGE_ADDR};
pub use cache::{
    CachedReading, Reading, SlotReading, Snapshot, CACHE_LOCK_TIMEOUT_MS, MAX_SNAPSHOT_SLOTS,
    STALENESS_WINDOW_MS,
};
pub use ezo::{
    DoCalibration, EcCalibration, EzoDevice, EzoSensorState, OrpCalibration, PhCalibration,
    ReadingValues, RtdCalibration, TemperatureScale,
};
pub use registry::{Registry, EZO_CANDIDATE_ADDRESSES, MAX_EZO_SENSORS};
pub use time::{Delay, TimeSource, Timestamp};

#[cfg(feature = "std")]
pub use cache::SnapshotListener;
#[cfg(feature = "std")]
pub use manager::{ManagerConfig, SensorManager};
#[cfg(feature = "std")]
pub use scheduler::{CycleOutcome, PollControls, DEFAULT_READING_INTERVAL_SECS};
#[cfg(feature = "std")]
pub use time::{MockDelay, MockTime, StdDelay, SystemClock};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
