//! Battery fuel gauge driver (MAX17048-class)
//!
//! A fixed two-register protocol with no capability negotiation: cell voltage
//! in 78.125 µV steps and state-of-charge in 1/256 % steps. Any bus error is
//! a flat communication failure.

use crate::bus::BusPort;
use crate::errors::SensorResult;
use crate::logging::{log_info, log_warn};
use crate::time::Delay;

/// Default I2C address of the fuel gauge
pub const BATTERY_GAUGE_ADDR: u8 = 0x36;

const REG_VCELL: u8 = 0x02;
const REG_SOC: u8 = 0x04;
const REG_VERSION: u8 = 0x08;
const REG_COMMAND: u8 = 0xFE;

/// Power-on-reset command word
const CMD_RESET: u16 = 0x5400;
const RESET_SETTLE_MS: u32 = 100;

const IO_TIMEOUT_MS: u32 = 1000;

/// VCELL LSB is 78.125 µV
fn vcell_to_volts(raw: u16) -> f32 {
    raw as f32 * 78.125 / 1_000_000.0
}

/// SOC register is percent in 1/256 steps, clamped to a sane range
fn soc_to_percent(raw: u16) -> f32 {
    (raw as f32 / 256.0).clamp(0.0, 100.0)
}

/// Driver handle for the battery fuel gauge
#[derive(Debug, Clone, Copy)]
pub struct BatteryGauge {
    address: u8,
}

impl BatteryGauge {
    /// Initialize the gauge and verify communication via the version register
    ///
    /// A failed version read is logged but does not fail init; the gauge may
    /// still produce valid readings once the bus settles.
    pub fn init<B: BusPort>(bus: &mut B, address: u8) -> SensorResult<Self> {
        log_info!("initializing battery gauge at 0x{:02X}", address);
        let gauge = Self { address };

        match gauge.read_version(bus) {
            Ok(version) => log_info!("battery gauge chip version: 0x{:04X}", version),
            Err(_) => log_warn!("battery gauge at 0x{:02X}: version read failed", address),
        }

        Ok(gauge)
    }

    /// I2C address this gauge was initialized at
    pub fn address(&self) -> u8 {
        self.address
    }

    fn read_reg<B: BusPort>(&self, bus: &mut B, reg: u8) -> SensorResult<u16> {
        bus.transmit(self.address, &[reg], IO_TIMEOUT_MS)?;
        let mut data = [0u8; 2];
        bus.receive(self.address, &mut data, IO_TIMEOUT_MS)?;
        Ok(u16::from_be_bytes(data))
    }

    fn write_reg<B: BusPort>(&self, bus: &mut B, reg: u8, value: u16) -> SensorResult<()> {
        let [hi, lo] = value.to_be_bytes();
        bus.transmit(self.address, &[reg, hi, lo], IO_TIMEOUT_MS)
    }

    /// Read cell voltage in volts
    pub fn read_voltage<B: BusPort>(&self, bus: &mut B) -> SensorResult<f32> {
        let raw = self.read_reg(bus, REG_VCELL)?;
        Ok(vcell_to_volts(raw))
    }

    /// Read state of charge in percent (clamped to 0-100)
    pub fn read_soc<B: BusPort>(&self, bus: &mut B) -> SensorResult<f32> {
        let raw = self.read_reg(bus, REG_SOC)?;
        Ok(soc_to_percent(raw))
    }

    /// Read the chip version register
    pub fn read_version<B: BusPort>(&self, bus: &mut B) -> SensorResult<u16> {
        self.read_reg(bus, REG_VERSION)
    }

    /// Issue a power-on reset and wait for the chip to come back
    pub fn reset<B: BusPort, D: Delay>(&self, bus: &mut B, delay: &D) -> SensorResult<()> {
        log_warn!("resetting battery gauge at 0x{:02X}", self.address);
        self.write_reg(bus, REG_COMMAND, CMD_RESET)?;
        delay.delay_ms(RESET_SETTLE_MS);
        Ok(())
    }
}
