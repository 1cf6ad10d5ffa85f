//! Sensor registry and bus discovery
//!
//! Discovery probes a fixed candidate address list once per address,
//! constructs a driver instance for every device that answers, and maps each
//! sensor type to the slot of the *first* device of that type found. Slot
//! indices are stable until the next rescan, which is what lets snapshot
//! consumers address sensors positionally.

use crate::bus::BusPort;
use crate::ezo::EzoDevice;
use crate::logging::{log_info, log_warn};
use crate::time::Delay;
use crate::types::SensorType;

/// Maximum number of EZO sensors the registry tracks
///
/// Discovery silently stops once the registry is full.
pub const MAX_EZO_SENSORS: usize = 5;

/// Candidate addresses probed during discovery (battery gauge excluded)
pub const EZO_CANDIDATE_ADDRESSES: [u8; 4] = [0x16, 0x63, 0x64, 0x6F];

/// EZO probe types that can own a typed slot
const TYPED_SLOTS: usize = 6;

const fn typed_slot(ty: SensorType) -> Option<usize> {
    match ty {
        SensorType::Rtd => Some(0),
        SensorType::Ph => Some(1),
        SensorType::Ec => Some(2),
        SensorType::Do => Some(3),
        SensorType::Orp => Some(4),
        SensorType::Hum => Some(5),
        _ => None,
    }
}

/// Owns the discovered EZO driver instances and the type-to-slot map
#[derive(Debug, Default)]
pub struct Registry {
    sensors: heapless::Vec<EzoDevice, MAX_EZO_SENSORS>,
    by_type: [Option<u8>; TYPED_SLOTS],
}

impl Registry {
    /// An empty registry
    pub const fn new() -> Self {
        Self {
            sensors: heapless::Vec::new(),
            by_type: [None; TYPED_SLOTS],
        }
    }

    /// Probe `candidates` and initialize every responding device
    ///
    /// A device that answers the probe but fails init is logged and skipped;
    /// discovery never fails as a whole. A second device of an already-seen
    /// type is still tracked by address but does not take over the typed
    /// slot.
    pub fn discover<B: BusPort, D: Delay>(bus: &mut B, delay: &D, candidates: &[u8]) -> Self {
        let mut registry = Self::new();

        for &address in candidates {
            if registry.sensors.is_full() {
                break;
            }
            if !bus.probe(address) {
                continue;
            }
            log_info!("EZO sensor detected at 0x{:02X}", address);

            match EzoDevice::init(bus, delay, address) {
                Ok(device) => {
                    let slot = registry.sensors.len() as u8;
                    let ty = device.sensor_type();
                    if let Some(idx) = typed_slot(ty) {
                        // First discovered sensor of a type wins the slot.
                        if registry.by_type[idx].is_none() {
                            registry.by_type[idx] = Some(slot);
                            log_info!("  slot {}: {} sensor", slot, ty.wire_name());
                        }
                    }
                    // Capacity was checked above, push cannot fail here.
                    let _ = registry.sensors.push(device);
                }
                Err(_) => {
                    log_warn!("failed to initialize EZO sensor at 0x{:02X}", address);
                }
            }
        }

        log_info!("discovery complete: {} EZO sensor(s)", registry.sensors.len());
        registry
    }

    /// Number of discovered sensors
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether no sensors were discovered
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Device at `slot`, in discovery order
    pub fn get(&self, slot: usize) -> Option<&EzoDevice> {
        self.sensors.get(slot)
    }

    /// Mutable device at `slot`
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut EzoDevice> {
        self.sensors.get_mut(slot)
    }

    /// Slot owned by the first discovered sensor of `ty`
    pub fn slot_for(&self, ty: SensorType) -> Option<usize> {
        typed_slot(ty).and_then(|idx| self.by_type[idx]).map(usize::from)
    }

    /// Iterate devices in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &EzoDevice> {
        self.sensors.iter()
    }

    /// Iterate devices mutably in discovery order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EzoDevice> {
        self.sensors.iter_mut()
    }

    /// Drop all devices and typed slots (rescan support)
    pub fn clear(&mut self) {
        self.sensors.clear();
        self.by_type = [None; TYPED_SLOTS];
    }
}
