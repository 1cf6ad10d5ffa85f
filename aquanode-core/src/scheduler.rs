//! Background Polling Scheduler
//!
//! ## Cycle state machine
//!
//! One dedicated task owns the polling cycle:
//!
//! ```text
//! Idle -> Trigger -> Wait -> Fetch -> Publish -> Idle
//! ```
//!
//! - **Idle**: sleep until the next interval, in small steps so a pause or
//!   stop request can interrupt.
//! - **Trigger**: `start_read` on every sensor in discovery order, serialized
//!   with a small inter-device gap so transactions never overlap.
//! - **Wait**: sleep `max(longest conversion delay among triggered sensors,
//!   750 ms)`, again in small steps.
//! - **Fetch**: `fetch_all` per sensor; a `Pending` reply earns one extra
//!   delayed retry.
//! - **Publish**: assemble the whole [`Snapshot`] and replace the cache.
//!
//! ## Partial failure and interruption
//!
//! A failed fetch falls back to that slot's last-known-good reading while it
//! is inside the staleness window; otherwise the slot is published invalid.
//! A pause or stop request that lands mid-Trigger or mid-Fetch discards the
//! entire new snapshot - the previously published one stays visible, so a
//! partial snapshot is never observable.
//!
//! ## Pause/resume contract
//!
//! Pausing is cooperative, not preemptive: [`PollControls::pause_reading`]
//! sets a flag which the cycle checks between steps and phases. Foreground
//! callers needing exclusive bus access pause, then poll
//! [`PollControls::is_reading_in_progress`] until the scheduler quiesces.

use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::battery::BatteryGauge;
use crate::bus::BusPort;
use crate::cache::{CachedReading, Reading, SlotReading, Snapshot, SnapshotCache, SnapshotListener};
use crate::errors::SensorResult;
use crate::logging::{log_debug, log_info, log_warn};
use crate::registry::{Registry, MAX_EZO_SENSORS};
use crate::time::{Delay, TimeSource};

/// Default polling interval
pub const DEFAULT_READING_INTERVAL_SECS: u32 = 10;

/// Gap between consecutive bus transactions within a phase
const TRIGGER_GAP_MS: u32 = 20;
/// Step size for the interruptible conversion wait
const WAIT_STEP_MS: u32 = 50;
/// Floor for the conversion wait, regardless of sensor mix
const MIN_WAIT_MS: u32 = 750;
/// Extra settle before the single fetch retry after a `Pending` reply
const FETCH_RETRY_DELAY_MS: u32 = 200;
/// Sleep while paused, between pause-flag checks
const PAUSED_IDLE_MS: u32 = 500;
/// Step size for the interruptible idle sleep
const IDLE_STEP_MS: u32 = 500;

/// How long foreground callers wait for quiescence before proceeding anyway
pub(crate) const QUIESCE_TIMEOUT_MS: u32 = 2000;
pub(crate) const QUIESCE_STEP_MS: u32 = 50;

const RSSI_NONE: i16 = i16::MIN;

/// Outcome of one polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new snapshot was published
    Published,
    /// A pause or stop request interrupted the cycle; the snapshot was
    /// discarded and the previously published one remains visible
    Interrupted,
}

/// Shared scheduler flags (pause/stop/progress/interval/link quality)
#[derive(Debug)]
pub(crate) struct PollFlags {
    pub paused: AtomicBool,
    pub in_progress: AtomicBool,
    pub stop: AtomicBool,
    pub task_running: AtomicBool,
    pub interval_secs: AtomicU32,
    rssi: AtomicI16,
}

impl PollFlags {
    pub(crate) fn new(interval_secs: u32) -> Self {
        Self {
            paused: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            task_running: AtomicBool::new(false),
            interval_secs: AtomicU32::new(interval_secs),
            rssi: AtomicI16::new(RSSI_NONE),
        }
    }

    pub(crate) fn rssi(&self) -> Option<i8> {
        match self.rssi.load(Ordering::SeqCst) {
            RSSI_NONE => None,
            v => Some(v as i8),
        }
    }

    pub(crate) fn set_rssi(&self, rssi: Option<i8>) {
        self.rssi
            .store(rssi.map(i16::from).unwrap_or(RSSI_NONE), Ordering::SeqCst);
    }
}

/// Cheap cloneable handle to the scheduler's pause/resume surface
///
/// Collaborators that need exclusive bus access (calibration UI, rename
/// commands) hold one of these: pause, poll for quiescence, operate, resume.
#[derive(Debug, Clone)]
pub struct PollControls {
    flags: Arc<PollFlags>,
}

impl PollControls {
    pub(crate) fn new(flags: Arc<PollFlags>) -> Self {
        Self { flags }
    }

    /// Request the scheduler to pause between steps (idempotent)
    pub fn pause_reading(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
        log_info!("sensor reading paused");
    }

    /// Clear the pause request (a no-op when not paused)
    pub fn resume_reading(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
        log_info!("sensor reading resumed");
    }

    /// Whether a pause request is currently set
    pub fn is_reading_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    /// Whether a polling cycle is currently mid-flight
    pub fn is_reading_in_progress(&self) -> bool {
        self.flags.in_progress.load(Ordering::SeqCst)
    }

    /// Change the polling interval (takes effect at the next idle phase)
    pub fn set_reading_interval(&self, interval_secs: u32) {
        self.flags.interval_secs.store(interval_secs, Ordering::SeqCst);
        log_info!("reading interval updated to {} seconds", interval_secs);
    }

    /// Current polling interval in seconds
    pub fn reading_interval(&self) -> u32 {
        self.flags.interval_secs.load(Ordering::SeqCst)
    }

    /// Feed the link quality that the next snapshot should carry
    ///
    /// Called by the network collaborator; `None` clears it.
    pub fn set_rssi(&self, rssi: Option<i8>) {
        self.flags.set_rssi(rssi);
    }
}

/// Everything guarded by the core lock: the bus and all driver state
#[derive(Debug)]
pub(crate) struct Core<B> {
    pub bus: B,
    pub registry: Registry,
    pub battery: Option<BatteryGauge>,
    pub last_good: [CachedReading; MAX_EZO_SENSORS],
}

/// State shared between the manager and the polling task
pub(crate) struct PollShared<B, C, D> {
    pub core: Mutex<Core<B>>,
    pub cache: SnapshotCache,
    pub listener: Mutex<Option<SnapshotListener>>,
    pub flags: Arc<PollFlags>,
    pub clock: C,
    pub delay: D,
}

pub(crate) fn lock_core<B>(shared_core: &Mutex<Core<B>>) -> std::sync::MutexGuard<'_, Core<B>> {
    shared_core.lock().unwrap_or_else(PoisonError::into_inner)
}

fn interrupted(flags: &PollFlags) -> bool {
    flags.paused.load(Ordering::SeqCst) || flags.stop.load(Ordering::SeqCst)
}

/// Clears the in-progress flag on every exit path of a cycle
struct InProgressGuard<'a>(&'a PollFlags);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::SeqCst);
    }
}

/// Run one Trigger -> Wait -> Fetch -> Publish cycle
pub(crate) fn poll_once<B, C, D>(shared: &PollShared<B, C, D>) -> SensorResult<CycleOutcome>
where
    B: BusPort,
    C: TimeSource,
    D: Delay,
{
    let flags: &PollFlags = &shared.flags;
    let cycle_start = shared.clock.now();

    // Trigger phase: serialize start_read over all sensors in discovery order.
    let mut core = lock_core(&shared.core);
    flags.in_progress.store(true, Ordering::SeqCst);
    let _in_progress = InProgressGuard(flags);

    let battery = core.battery;
    let sensor_count = core.registry.len();
    let mut triggered = [false; MAX_EZO_SENSORS];
    let mut max_conversion_ms = 0u32;
    let mut any_triggered = false;

    {
        let Core { bus, registry, .. } = &mut *core;
        let battery_percent = match battery {
            Some(gauge) => gauge.read_soc(&mut *bus).ok(),
            None => None,
        };

        for slot in 0..sensor_count {
            if interrupted(flags) {
                log_info!("polling paused before trigger phase completed ({}/{})", slot, sensor_count);
                return Ok(CycleOutcome::Interrupted);
            }
            let Some(device) = registry.get(slot) else { break };
            match device.start_read(bus) {
                Ok(()) => {
                    triggered[slot] = true;
                    any_triggered = true;
                    max_conversion_ms =
                        max_conversion_ms.max(device.sensor_type().conversion_delay_ms());
                }
                Err(e) => {
                    log_warn!(
                        "failed to trigger {} @ 0x{:02X}: {}",
                        device.sensor_type().wire_name(),
                        device.address(),
                        e
                    );
                }
            }
            shared.delay.delay_ms(TRIGGER_GAP_MS);
        }

        // Wait phase runs with the core lock released.
        drop(core);

        if any_triggered {
            let budget = max_conversion_ms.max(MIN_WAIT_MS);
            let mut waited = 0u32;
            while waited < budget {
                if interrupted(flags) {
                    log_info!("polling paused while waiting for conversions");
                    return Ok(CycleOutcome::Interrupted);
                }
                let step = WAIT_STEP_MS.min(budget - waited);
                shared.delay.delay_ms(step);
                waited += step;
            }
            if interrupted(flags) {
                return Ok(CycleOutcome::Interrupted);
            }
        }

        // Fetch phase: collect every slot, falling back to last-known-good
        // readings that are still inside the staleness window.
        let mut core = lock_core(&shared.core);
        let Core { bus, registry, last_good, .. } = &mut *core;

        let mut slots: heapless::Vec<SlotReading, MAX_EZO_SENSORS> = heapless::Vec::new();
        let mut valid_slots = 0usize;

        for slot in 0..sensor_count {
            if interrupted(flags) {
                log_info!(
                    "polling paused mid-fetch ({}/{} processed), snapshot discarded",
                    slots.len(),
                    sensor_count
                );
                return Ok(CycleOutcome::Interrupted);
            }
            let Some(device) = registry.get(slot) else { break };

            let mut fetched = Err(crate::errors::SensorError::CommunicationFailure);
            if triggered[slot] {
                fetched = device.fetch_all(bus);
                if matches!(fetched, Err(crate::errors::SensorError::Pending)) {
                    shared.delay.delay_ms(FETCH_RETRY_DELAY_MS);
                    fetched = device.fetch_all(bus);
                }
            }

            let now = shared.clock.now();
            let entry = match fetched {
                Ok(values) => {
                    last_good[slot].store(Reading {
                        values: values.clone(),
                        timestamp: now,
                    });
                    valid_slots += 1;
                    SlotReading {
                        sensor_type: device.sensor_type(),
                        values,
                        valid: true,
                    }
                }
                Err(e) => {
                    if last_good[slot].is_fresh(now) {
                        log_debug!(
                            "sensor 0x{:02X} fetch failed ({}), using cached reading",
                            device.address(),
                            e
                        );
                        valid_slots += 1;
                        SlotReading {
                            sensor_type: device.sensor_type(),
                            values: last_good[slot].reading.values.clone(),
                            valid: true,
                        }
                    } else {
                        SlotReading {
                            sensor_type: device.sensor_type(),
                            values: heapless::Vec::new(),
                            valid: false,
                        }
                    }
                }
            };
            let _ = slots.push(entry);
            shared.delay.delay_ms(TRIGGER_GAP_MS);
        }

        drop(core);

        // Publish phase: swap the whole snapshot under the cache lock, then
        // notify the listener outside it.
        let snapshot = Snapshot {
            slots,
            battery_percent,
            rssi: flags.rssi(),
            timestamp: cycle_start,
        };
        shared.cache.publish(snapshot.clone())?;
        log_info!("snapshot published ({}/{} sensors valid)", valid_slots, sensor_count);

        let listener = shared.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = listener.as_ref() {
            callback(&snapshot);
        }
    }

    Ok(CycleOutcome::Published)
}

/// Polling task body: Idle in interruptible steps, then cycle
pub(crate) fn run<B, C, D>(shared: Arc<PollShared<B, C, D>>)
where
    B: BusPort,
    C: TimeSource,
    D: Delay,
{
    let flags = &shared.flags;
    log_info!(
        "sensor polling task started (interval: {} s)",
        flags.interval_secs.load(Ordering::SeqCst)
    );

    // First cycle runs immediately; later ones wait out the interval.
    let mut first = true;
    loop {
        if flags.stop.load(Ordering::SeqCst) {
            break;
        }
        if flags.paused.load(Ordering::SeqCst) {
            shared.delay.delay_ms(PAUSED_IDLE_MS);
            continue;
        }

        if !first {
            let interval_ms = flags.interval_secs.load(Ordering::SeqCst).saturating_mul(1000);
            let mut slept = 0u32;
            let mut idle_interrupted = false;
            while slept < interval_ms {
                if interrupted(flags) {
                    idle_interrupted = true;
                    break;
                }
                let step = IDLE_STEP_MS.min(interval_ms - slept);
                shared.delay.delay_ms(step);
                slept += step;
            }
            if idle_interrupted {
                continue;
            }
        }
        first = false;

        match poll_once(&shared) {
            Ok(CycleOutcome::Published) => {}
            Ok(CycleOutcome::Interrupted) => {
                log_info!("polling cycle interrupted, previous snapshot kept");
            }
            Err(e) => {
                log_warn!("polling cycle failed: {}", e);
            }
        }
    }

    flags.task_running.store(false, Ordering::SeqCst);
    log_info!("sensor polling task stopped");
}
