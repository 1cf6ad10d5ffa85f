//! Sensor manager - the owning context for the whole sensor subsystem
//!
//! One [`SensorManager`] value owns the bus, the registry, the battery gauge,
//! the snapshot cache and the background polling task. There is no ambient
//! module state: collaborators hold a reference to the manager (or a cloned
//! [`PollControls`]) and everything flows through it.
//!
//! ## Bus discipline
//!
//! The background task serializes all polling-cycle transactions. Foreground
//! mutators (calibration, rename, settings) go through a pause -> quiesce ->
//! operate -> resume handshake so they never collide with an in-flight
//! conversion. The handshake is nesting-safe: an operation that finds the
//! scheduler already paused leaves it paused when it finishes.
//!
//! Typed read-through accessors deliberately skip the handshake, matching
//! the documented race semantics of the bus boundary: a caller that wants
//! full isolation pauses first.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::battery::{BatteryGauge, BATTERY_GAUGE_ADDR};
use crate::bus::BusPort;
use crate::cache::{Reading, Snapshot, SnapshotCache, SnapshotListener};
use crate::errors::{SensorError, SensorResult};
use crate::ezo::{
    self, DoCalibration, EcCalibration, EzoDevice, EzoSensorState, OrpCalibration, PhCalibration,
    ReadingValues, RtdCalibration, TemperatureScale,
};
use crate::logging::{log_info, log_warn};
use crate::registry::{Registry, EZO_CANDIDATE_ADDRESSES};
use crate::scheduler::{
    self, lock_core, Core, CycleOutcome, PollControls, PollFlags, PollShared,
    DEFAULT_READING_INTERVAL_SECS, QUIESCE_STEP_MS, QUIESCE_TIMEOUT_MS,
};
use crate::time::{Delay, StdDelay, SystemClock, TimeSource};
use crate::types::SensorType;

/// Delay between per-sensor queries during a settings refresh
const REFRESH_GAP_MS: u32 = 50;

/// Static configuration for the sensor subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerConfig {
    /// Polling interval in seconds
    pub reading_interval_secs: u32,
    /// Candidate addresses probed during discovery
    pub candidate_addresses: heapless::Vec<u8, 8>,
    /// Address of the battery fuel gauge
    pub battery_address: u8,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let mut candidates = heapless::Vec::new();
        for addr in EZO_CANDIDATE_ADDRESSES {
            // Capacity 8 always holds the 4 defaults.
            let _ = candidates.push(addr);
        }
        Self {
            reading_interval_secs: DEFAULT_READING_INTERVAL_SECS,
            candidate_addresses: candidates,
            battery_address: BATTERY_GAUGE_ADDR,
        }
    }
}

/// Owning context for sensors, cache and the polling task
///
/// Generic over the bus port and, for tests, the clock and delay providers.
/// Production code uses the defaults:
///
/// ```no_run
/// # use aquanode_core::{SensorManager, ManagerConfig, BusPort, SensorResult};
/// # fn demo<B: BusPort + Send + 'static>(bus: B) -> SensorResult<()> {
/// let mut manager = SensorManager::new(bus, ManagerConfig::default());
/// manager.init()?;
/// manager.start_polling();
///
/// let snapshot = manager.get_cached_data()?;
/// # let _ = snapshot; Ok(())
/// # }
/// ```
pub struct SensorManager<B, C = SystemClock, D = StdDelay> {
    shared: Arc<PollShared<B, C, D>>,
    config: ManagerConfig,
    task: Option<JoinHandle<()>>,
}

impl<B> SensorManager<B>
where
    B: BusPort + Send + 'static,
{
    /// Create a manager on the host platform (system clock, thread sleeps)
    pub fn new(bus: B, config: ManagerConfig) -> Self {
        Self::with_platform(bus, SystemClock, StdDelay, config)
    }
}

impl<B, C, D> SensorManager<B, C, D>
where
    B: BusPort + Send + 'static,
    C: TimeSource + Send + Sync + 'static,
    D: Delay + Send + Sync + 'static,
{
    /// Create a manager with an explicit clock and delay provider
    pub fn with_platform(bus: B, clock: C, delay: D, config: ManagerConfig) -> Self {
        let shared = Arc::new(PollShared {
            core: Mutex::new(Core {
                bus,
                registry: Registry::new(),
                battery: None,
                last_good: Default::default(),
            }),
            cache: SnapshotCache::new(),
            listener: Mutex::new(None),
            flags: Arc::new(PollFlags::new(config.reading_interval_secs)),
            clock,
            delay,
        });
        Self {
            shared,
            config,
            task: None,
        }
    }

    // --- lifecycle ----------------------------------------------------------

    /// Discover and initialize all sensors
    ///
    /// Probes the battery gauge and every candidate EZO address. Per-device
    /// init failures are logged and skipped; init itself only reflects how
    /// discovery went, never a missing sensor. An initial settings refresh
    /// runs at the end (best-effort, errors logged).
    pub fn init(&mut self) -> SensorResult<()> {
        log_info!("initializing sensor manager");
        let mut core = self.lock_core();
        let Core { bus, registry, battery, last_good } = &mut *core;

        *battery = None;
        if bus.probe(self.config.battery_address) {
            log_info!("battery gauge detected at 0x{:02X}", self.config.battery_address);
            match BatteryGauge::init(bus, self.config.battery_address) {
                Ok(gauge) => {
                    if let (Ok(voltage), Ok(soc)) =
                        (gauge.read_voltage(&mut *bus), gauge.read_soc(&mut *bus))
                    {
                        log_info!("battery: {:.2} V, {:.1}%", voltage, soc);
                    }
                    *battery = Some(gauge);
                }
                Err(_) => log_warn!("failed to initialize battery gauge"),
            }
        }

        *registry = Registry::discover(bus, &self.shared.delay, &self.config.candidate_addresses);
        *last_good = Default::default();

        log_info!(
            "sensor manager initialized: battery={}, EZO sensors={}",
            battery.is_some(),
            registry.len()
        );

        if let Err(e) = refresh_all(registry, bus, &self.shared.delay) {
            log_warn!("initial settings refresh encountered errors: {}", e);
        }

        Ok(())
    }

    /// Tear everything down: stop the polling task and drop all devices
    ///
    /// The task is signalled and joined; an in-flight cycle is abandoned at
    /// its next phase boundary without publishing.
    pub fn deinit(&mut self) {
        self.stop_polling();
        let mut core = self.lock_core();
        core.registry.clear();
        core.battery = None;
        core.last_good = Default::default();
        log_info!("sensor manager deinitialized");
    }

    /// Full re-discovery after a sensor hot-swap
    ///
    /// Equivalent to `deinit` + `init`; the polling task is restarted
    /// afterwards if it was running before.
    pub fn rescan(&mut self) -> SensorResult<()> {
        log_info!("rescanning bus for sensors");
        let was_running = self.task.is_some();
        self.deinit();
        let result = self.init();
        if was_running {
            self.start_polling();
        }
        result
    }

    // --- polling task -------------------------------------------------------

    /// Spawn the background polling task
    ///
    /// A no-op if the task is already running. The first cycle runs
    /// immediately; later cycles wait out the configured interval.
    ///
    /// Panics only if the OS cannot spawn a thread at all.
    pub fn start_polling(&mut self) {
        if self.task.is_some() {
            log_warn!("polling task already running");
            return;
        }
        let flags = &self.shared.flags;
        flags.stop.store(false, Ordering::SeqCst);
        flags.task_running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("sensor-poll".into())
            .spawn(move || scheduler::run(shared))
            .expect("failed to spawn sensor polling task");
        self.task = Some(handle);
    }

    /// Stop the background polling task and wait for it to exit
    pub fn stop_polling(&mut self) {
        if let Some(handle) = self.task.take() {
            self.shared.flags.stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
            self.shared.flags.stop.store(false, Ordering::SeqCst);
            self.shared.flags.task_running.store(false, Ordering::SeqCst);
        }
    }

    /// Run a single polling cycle on the caller's task
    ///
    /// Useful for diagnostics and for nodes that want to own their own
    /// schedule instead of spawning the background task.
    pub fn poll_once(&self) -> SensorResult<CycleOutcome> {
        scheduler::poll_once(&self.shared)
    }

    /// Cloneable pause/resume/interval handle for collaborators
    pub fn controls(&self) -> PollControls {
        PollControls::new(Arc::clone(&self.shared.flags))
    }

    /// Request the scheduler to pause between steps (idempotent)
    pub fn pause_reading(&self) {
        self.controls().pause_reading();
    }

    /// Clear the pause request (a no-op when not paused)
    pub fn resume_reading(&self) {
        self.controls().resume_reading();
    }

    /// Whether a pause request is currently set
    pub fn is_reading_paused(&self) -> bool {
        self.controls().is_reading_paused()
    }

    /// Whether a polling cycle is currently mid-flight
    pub fn is_reading_in_progress(&self) -> bool {
        self.controls().is_reading_in_progress()
    }

    /// Change the polling interval (takes effect at the next idle phase)
    pub fn set_reading_interval(&self, interval_secs: u32) {
        self.controls().set_reading_interval(interval_secs);
    }

    /// Current polling interval in seconds
    pub fn reading_interval(&self) -> u32 {
        self.controls().reading_interval()
    }

    /// Feed the link quality the next snapshot should carry
    pub fn set_rssi(&self, rssi: Option<i8>) {
        self.controls().set_rssi(rssi);
    }

    // --- cache --------------------------------------------------------------

    /// Deep copy of the last published snapshot
    ///
    /// `NotFound` until the first polling cycle publishes.
    pub fn get_cached_data(&self) -> SensorResult<Snapshot> {
        self.shared.cache.latest()
    }

    /// Register the snapshot listener (replaces any previous one)
    ///
    /// Invoked synchronously after each publish, outside the cache lock,
    /// with a copy of the new snapshot.
    pub fn register_cache_listener<F>(&self, listener: F)
    where
        F: Fn(&Snapshot) + Send + 'static,
    {
        let mut slot = self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(listener) as SnapshotListener);
    }

    // --- queries ------------------------------------------------------------

    /// Number of discovered EZO sensors
    pub fn ezo_count(&self) -> usize {
        self.lock_core().registry.len()
    }

    /// Whether the battery gauge was discovered
    pub fn has_battery_monitor(&self) -> bool {
        self.lock_core().battery.is_some()
    }

    /// Copy of a device's cached state (settings, parameters, capabilities)
    pub fn sensor_state(&self, index: usize) -> SensorResult<EzoSensorState> {
        self.lock_core()
            .registry
            .get(index)
            .map(|device| device.state().clone())
            .ok_or(SensorError::NotFound)
    }

    // --- typed reads --------------------------------------------------------

    /// Read temperature from the RTD sensor
    pub fn read_temperature(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Rtd)
    }

    /// Read pH from the pH sensor
    pub fn read_ph(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Ph)
    }

    /// Read conductivity (µS/cm) from the EC sensor
    pub fn read_conductivity(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Ec)
    }

    /// Read dissolved oxygen (mg/L) from the DO sensor
    pub fn read_dissolved_oxygen(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Do)
    }

    /// Read oxidation-reduction potential (mV) from the ORP sensor
    pub fn read_orp(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Orp)
    }

    /// Read relative humidity from the HUM sensor
    pub fn read_humidity(&self) -> SensorResult<f32> {
        self.read_typed(SensorType::Hum)
    }

    fn read_typed(&self, ty: SensorType) -> SensorResult<f32> {
        let mut core = self.lock_core();
        let Core { bus, registry, .. } = &mut *core;
        let slot = registry.slot_for(ty).ok_or(SensorError::NotFound)?;
        let device = registry.get(slot).ok_or(SensorError::NotFound)?;
        device.read(bus, &self.shared.delay)
    }

    /// Read battery voltage in volts
    pub fn read_battery_voltage(&self) -> SensorResult<f32> {
        let mut core = self.lock_core();
        let gauge = core.battery.ok_or(SensorError::NotFound)?;
        gauge.read_voltage(&mut core.bus)
    }

    /// Read battery state of charge in percent
    pub fn read_battery_percentage(&self) -> SensorResult<f32> {
        let mut core = self.lock_core();
        let gauge = core.battery.ok_or(SensorError::NotFound)?;
        gauge.read_soc(&mut core.bus)
    }

    /// Read-through access to one sensor slot
    ///
    /// Attempts a fresh synchronous read; on failure falls back to that
    /// slot's last-known-good reading while it is inside the staleness
    /// window, otherwise propagates the failure.
    pub fn read_ezo_sensor(&self, index: usize) -> SensorResult<(SensorType, ReadingValues)> {
        let mut core = self.lock_core();
        let Core { bus, registry, last_good, .. } = &mut *core;
        let device = registry.get(index).ok_or(SensorError::NotFound)?;
        let ty = device.sensor_type();

        match device.read_all(bus, &self.shared.delay) {
            Ok(values) => {
                last_good[index].store(Reading {
                    values: values.clone(),
                    timestamp: self.shared.clock.now(),
                });
                Ok((ty, values))
            }
            Err(e) => {
                let now = self.shared.clock.now();
                if last_good[index].is_fresh(now) {
                    log_info!(
                        "sensor 0x{:02X} read failed ({}), serving cached reading",
                        device.address(),
                        e
                    );
                    Ok((ty, last_good[index].reading.values.clone()))
                } else {
                    Err(e)
                }
            }
        }
    }

    // --- settings and calibration -------------------------------------------

    /// Re-query calibration status, temp compensation and mode on every sensor
    ///
    /// Pauses the scheduler only if it was not already paused, waits for
    /// quiescence, and resumes only if this call was the one that paused -
    /// a pause held by someone else is never released. Individual query
    /// failures do not stop the sweep; the first error is returned.
    pub fn refresh_settings(&self) -> SensorResult<()> {
        if self.lock_core().registry.is_empty() {
            return Ok(());
        }
        self.with_exclusive_bus(|core, delay| {
            let Core { bus, registry, .. } = core;
            refresh_all(registry, bus, delay)
        })
    }

    /// Rename a sensor (1-16 chars of `[A-Za-z0-9_]`)
    ///
    /// Validation happens before the scheduler is touched, so an invalid
    /// name causes zero side effects.
    pub fn set_sensor_name(&self, index: usize, name: &str) -> SensorResult<()> {
        ezo::validate_name(name)?;
        self.with_device(index, |device, bus, delay| device.set_name(bus, delay, name))
    }

    /// Switch a sensor's indicator LED
    pub fn set_led(&self, index: usize, enabled: bool) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.set_led(bus, delay, enabled))
    }

    /// Engage or release a sensor's protocol lock
    pub fn set_protocol_lock(&self, index: usize, locked: bool) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_protocol_lock(bus, delay, locked)
        })
    }

    /// Set the RTD reporting scale
    pub fn set_rtd_scale(&self, index: usize, scale: TemperatureScale) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_rtd_scale(bus, delay, scale)
        })
    }

    /// Enable or disable the extended pH scale
    pub fn set_ph_extended_scale(&self, index: usize, enabled: bool) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_ph_extended_scale(bus, delay, enabled)
        })
    }

    /// Set the conductivity probe cell constant (K value)
    pub fn set_ec_probe_k(&self, index: usize, probe_k: f32) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_ec_probe_k(bus, delay, probe_k)
        })
    }

    /// Set the TDS conversion factor
    pub fn set_ec_tds_factor(&self, index: usize, factor: f32) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_ec_tds_factor(bus, delay, factor)
        })
    }

    /// Set the temperature compensation target (pH only)
    pub fn set_temp_compensation(&self, index: usize, temperature_c: f32) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_temp_compensation(bus, delay, temperature_c)
        })
    }

    /// Enable or disable continuous reading mode
    pub fn set_continuous_mode(&self, index: usize, enable: bool) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_continuous_mode(bus, delay, enable)
        })
    }

    /// Put a sensor to sleep
    pub fn sleep_sensor(&self, index: usize) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.sleep(bus, delay))
    }

    /// Wake a sensor from sleep
    pub fn wake_sensor(&self, index: usize) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.wake(bus, delay))
    }

    /// Enable or disable one of a sensor's output parameters
    pub fn set_output_parameter(
        &self,
        index: usize,
        param: &str,
        enabled: bool,
    ) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.set_output_parameter(bus, delay, param, enabled)
        })
    }

    /// Calibrate a pH probe
    pub fn calibrate_ph(&self, index: usize, point: PhCalibration) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.calibrate_ph(bus, delay, point))
    }

    /// Calibrate a temperature probe
    pub fn calibrate_rtd(&self, index: usize, point: RtdCalibration) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.calibrate_rtd(bus, delay, point))
    }

    /// Calibrate a conductivity probe
    pub fn calibrate_ec(&self, index: usize, point: EcCalibration) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.calibrate_ec(bus, delay, point))
    }

    /// Calibrate a dissolved-oxygen probe
    pub fn calibrate_do(&self, index: usize, point: DoCalibration) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.calibrate_do(bus, delay, point))
    }

    /// Calibrate an ORP probe
    pub fn calibrate_orp(&self, index: usize, point: OrpCalibration) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.calibrate_orp(bus, delay, point))
    }

    /// Factory reset a sensor
    pub fn factory_reset(&self, index: usize) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| device.factory_reset(bus, delay))
    }

    /// Change a sensor's I2C address (the device reboots; rescan afterwards)
    pub fn change_sensor_address(&self, index: usize, new_address: u8) -> SensorResult<()> {
        self.with_device(index, |device, bus, delay| {
            device.change_address(bus, delay, new_address)
        })
    }

    // --- internals ----------------------------------------------------------

    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core<B>> {
        lock_core(&self.shared.core)
    }

    /// Pause -> quiesce -> operate -> resume-if-we-paused
    fn with_exclusive_bus<R>(
        &self,
        op: impl FnOnce(&mut Core<B>, &D) -> SensorResult<R>,
    ) -> SensorResult<R> {
        let was_paused = self.shared.flags.paused.swap(true, Ordering::SeqCst);
        self.wait_quiescent();

        let result = {
            let mut core = self.lock_core();
            op(&mut core, &self.shared.delay)
        };

        if !was_paused {
            self.shared.flags.paused.store(false, Ordering::SeqCst);
        }
        result
    }

    fn with_device<R>(
        &self,
        index: usize,
        op: impl FnOnce(&mut EzoDevice, &mut B, &D) -> SensorResult<R>,
    ) -> SensorResult<R> {
        self.with_exclusive_bus(|core, delay| {
            let Core { bus, registry, .. } = core;
            let device = registry.get_mut(index).ok_or(SensorError::NotFound)?;
            op(device, bus, delay)
        })
    }

    /// Bounded wait for the scheduler to leave its cycle
    ///
    /// Proceeds anyway after the timeout with a logged warning; the caller
    /// holds the pause flag, so at worst it contends on the core lock.
    fn wait_quiescent(&self) {
        if !self.shared.flags.task_running.load(Ordering::SeqCst) {
            return;
        }
        let mut waited = 0u32;
        while self.shared.flags.in_progress.load(Ordering::SeqCst) {
            if waited >= QUIESCE_TIMEOUT_MS {
                log_warn!("timed out waiting for the polling cycle to quiesce, proceeding");
                break;
            }
            self.shared.delay.delay_ms(QUIESCE_STEP_MS);
            waited += QUIESCE_STEP_MS;
        }
    }
}

impl<B, C, D> Drop for SensorManager<B, C, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            self.shared.flags.stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}

/// Best-effort settings refresh over every registered sensor
fn refresh_all<B: BusPort, D: Delay>(
    registry: &mut Registry,
    bus: &mut B,
    delay: &D,
) -> SensorResult<()> {
    if registry.is_empty() {
        return Ok(());
    }
    log_info!("refreshing settings for {} EZO sensor(s)", registry.len());

    let mut first_err: SensorResult<()> = Ok(());
    for device in registry.iter_mut() {
        if let Err(e) = device.refresh_settings(bus, delay) {
            log_warn!(
                "failed to refresh settings for {} @ 0x{:02X}: {}",
                device.sensor_type().wire_name(),
                device.address(),
                e
            );
            if first_err.is_ok() {
                first_err = Err(e);
            }
        }
        delay.delay_ms(REFRESH_GAP_MS);
    }
    first_err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_hardware_layout() {
        let config = ManagerConfig::default();
        assert_eq!(config.reading_interval_secs, 10);
        assert_eq!(config.battery_address, 0x36);
        assert_eq!(config.candidate_addresses.as_slice(), &[0x16, 0x63, 0x64, 0x6F]);
        // The battery address is never probed as an EZO candidate
        assert!(!config.candidate_addresses.contains(&config.battery_address));
    }
}
