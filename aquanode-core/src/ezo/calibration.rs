//! Calibration operations
//!
//! Calibration points are closed enums per probe type, so an unsupported
//! point is unrepresentable and every argument problem is rejected before a
//! single byte reaches the bus. The wire commands these map to:
//!
//! ```text
//! pH   Cal,mid,7.00 / Cal,low,4.00 / Cal,high,10.00 / Cal,clear
//! RTD  Cal,<temp> / Cal,clear
//! EC   Cal,dry / Cal,low,<µS> / Cal,high,<µS> / Cal,clear
//! DO   Cal / Cal,0 / Cal,clear
//! ORP  Cal,<mV> / Cal,clear
//! ```

use crate::bus::BusPort;
use crate::errors::SensorResult;
use crate::time::Delay;
use crate::types::{Capabilities, SensorType};

use super::{copy_truncated, fmt_command, CommandBuf, EzoDevice};

const SHORT_WAIT_MS: u32 = super::SHORT_WAIT_MS;

/// pH calibration points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhCalibration {
    /// Mid-point calibration at the given pH (typically 7.00)
    Mid(f32),
    /// Low-point calibration at the given pH (typically 4.00)
    Low(f32),
    /// High-point calibration at the given pH (typically 10.00)
    High(f32),
    /// Erase all calibration data
    Clear,
}

impl PhCalibration {
    fn command(&self) -> SensorResult<CommandBuf> {
        match self {
            PhCalibration::Mid(v) => fmt_command(format_args!("Cal,mid,{:.2}", v)),
            PhCalibration::Low(v) => fmt_command(format_args!("Cal,low,{:.2}", v)),
            PhCalibration::High(v) => fmt_command(format_args!("Cal,high,{:.2}", v)),
            PhCalibration::Clear => fmt_command(format_args!("Cal,clear")),
        }
    }
}

/// RTD calibration points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtdCalibration {
    /// Single-point calibration at a known temperature
    Point(f32),
    /// Erase all calibration data
    Clear,
}

impl RtdCalibration {
    fn command(&self) -> SensorResult<CommandBuf> {
        match self {
            RtdCalibration::Point(t) => fmt_command(format_args!("Cal,{:.2}", t)),
            RtdCalibration::Clear => fmt_command(format_args!("Cal,clear")),
        }
    }
}

/// Conductivity calibration points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCalibration {
    /// Dry calibration (probe in air)
    Dry,
    /// Low-point calibration at the given conductivity in µS
    Low(u32),
    /// High-point calibration at the given conductivity in µS
    High(u32),
    /// Erase all calibration data
    Clear,
}

impl EcCalibration {
    fn command(&self) -> SensorResult<CommandBuf> {
        match self {
            EcCalibration::Dry => fmt_command(format_args!("Cal,dry")),
            EcCalibration::Low(us) => fmt_command(format_args!("Cal,low,{}", us)),
            EcCalibration::High(us) => fmt_command(format_args!("Cal,high,{}", us)),
            EcCalibration::Clear => fmt_command(format_args!("Cal,clear")),
        }
    }
}

/// Dissolved-oxygen calibration points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoCalibration {
    /// Calibrate against atmospheric oxygen
    Atmospheric,
    /// Zero-point calibration
    Zero,
    /// Erase all calibration data
    Clear,
}

impl DoCalibration {
    fn command(&self) -> SensorResult<CommandBuf> {
        match self {
            DoCalibration::Atmospheric => fmt_command(format_args!("Cal")),
            DoCalibration::Zero => fmt_command(format_args!("Cal,0")),
            DoCalibration::Clear => fmt_command(format_args!("Cal,clear")),
        }
    }
}

/// ORP calibration points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrpCalibration {
    /// Single-point calibration at a known potential in mV
    Point(f32),
    /// Erase all calibration data
    Clear,
}

impl OrpCalibration {
    fn command(&self) -> SensorResult<CommandBuf> {
        match self {
            OrpCalibration::Point(mv) => fmt_command(format_args!("Cal,{:.0}", mv)),
            OrpCalibration::Clear => fmt_command(format_args!("Cal,clear")),
        }
    }
}

impl EzoDevice {
    fn calibrate<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        expected: SensorType,
        reason: &'static str,
        cmd: SensorResult<CommandBuf>,
    ) -> SensorResult<()> {
        self.require_type(expected, reason)?;
        self.require_capability(Capabilities::CALIBRATION)?;
        let cmd = cmd?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)
    }

    /// Calibrate a pH probe
    pub fn calibrate_ph<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        point: PhCalibration,
    ) -> SensorResult<()> {
        self.calibrate(bus, delay, SensorType::Ph, "pH calibration requires a pH sensor", point.command())
    }

    /// Calibrate a temperature probe
    pub fn calibrate_rtd<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        point: RtdCalibration,
    ) -> SensorResult<()> {
        self.calibrate(
            bus,
            delay,
            SensorType::Rtd,
            "RTD calibration requires an RTD sensor",
            point.command(),
        )
    }

    /// Calibrate a conductivity probe
    pub fn calibrate_ec<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        point: EcCalibration,
    ) -> SensorResult<()> {
        self.calibrate(bus, delay, SensorType::Ec, "EC calibration requires an EC sensor", point.command())
    }

    /// Calibrate a dissolved-oxygen probe
    pub fn calibrate_do<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        point: DoCalibration,
    ) -> SensorResult<()> {
        self.calibrate(bus, delay, SensorType::Do, "DO calibration requires a DO sensor", point.command())
    }

    /// Calibrate an ORP probe
    pub fn calibrate_orp<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        point: OrpCalibration,
    ) -> SensorResult<()> {
        self.calibrate(
            bus,
            delay,
            SensorType::Orp,
            "ORP calibration requires an ORP sensor",
            point.command(),
        )
    }

    /// Query the device's calibration status reply (`"Cal,?"`), verbatim
    pub fn query_calibration_status<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<heapless::String<32>> {
        let payload = self.command(bus, delay, "Cal,?", SHORT_WAIT_MS)?;
        Ok(copy_truncated(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd_str(cmd: SensorResult<CommandBuf>) -> CommandBuf {
        cmd.expect("command formats")
    }

    #[test]
    fn ph_commands() {
        assert_eq!(cmd_str(PhCalibration::Mid(7.0).command()), "Cal,mid,7.00");
        assert_eq!(cmd_str(PhCalibration::Low(4.0).command()), "Cal,low,4.00");
        assert_eq!(cmd_str(PhCalibration::High(10.0).command()), "Cal,high,10.00");
        assert_eq!(cmd_str(PhCalibration::Clear.command()), "Cal,clear");
    }

    #[test]
    fn rtd_commands() {
        assert_eq!(cmd_str(RtdCalibration::Point(25.5).command()), "Cal,25.50");
        assert_eq!(cmd_str(RtdCalibration::Clear.command()), "Cal,clear");
    }

    #[test]
    fn ec_commands() {
        assert_eq!(cmd_str(EcCalibration::Dry.command()), "Cal,dry");
        assert_eq!(cmd_str(EcCalibration::Low(12_880).command()), "Cal,low,12880");
        assert_eq!(cmd_str(EcCalibration::High(80_000).command()), "Cal,high,80000");
        assert_eq!(cmd_str(EcCalibration::Clear.command()), "Cal,clear");
    }

    #[test]
    fn do_commands() {
        assert_eq!(cmd_str(DoCalibration::Atmospheric.command()), "Cal");
        assert_eq!(cmd_str(DoCalibration::Zero.command()), "Cal,0");
        assert_eq!(cmd_str(DoCalibration::Clear.command()), "Cal,clear");
    }

    #[test]
    fn orp_commands() {
        assert_eq!(cmd_str(OrpCalibration::Point(225.0).command()), "Cal,225");
        assert_eq!(cmd_str(OrpCalibration::Clear.command()), "Cal,clear");
    }
}
