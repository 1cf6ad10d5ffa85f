//! Cached per-device state and type-specific parameters
//!
//! Everything the node knows about a device between bus transactions lives
//! here: identity, capability flags, settings read back at discovery, and the
//! parameter block that only exists for certain probe types.

use crate::bus::BusPort;
use crate::errors::{SensorError, SensorResult};
use crate::logging::{log_info, log_warn};
use crate::time::Delay;
use crate::types::{Capabilities, SensorType, MAX_SENSOR_VALUES};

use super::{copy_truncated, fmt_command, reply_field, EzoDevice};

/// Maximum device name length the protocol accepts
pub const MAX_NAME_LEN: usize = 16;

const SHORT_WAIT_MS: u32 = super::SHORT_WAIT_MS;

/// Temperature scale an RTD circuit reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TemperatureScale {
    /// Degrees Celsius
    #[default]
    Celsius,
    /// Degrees Fahrenheit
    Fahrenheit,
    /// Kelvin
    Kelvin,
}

impl TemperatureScale {
    /// The single-character token used on the wire
    pub const fn to_wire(self) -> char {
        match self {
            TemperatureScale::Celsius => 'C',
            TemperatureScale::Fahrenheit => 'F',
            TemperatureScale::Kelvin => 'K',
        }
    }

    /// Parse the wire token; anything else is unrecognized
    pub const fn from_wire(c: char) -> Option<Self> {
        match c {
            'C' => Some(TemperatureScale::Celsius),
            'F' => Some(TemperatureScale::Fahrenheit),
            'K' => Some(TemperatureScale::Kelvin),
            _ => None,
        }
    }
}

/// Conductivity probe parameters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EcParams {
    /// Probe cell constant (K value)
    pub probe_k: f32,
    /// TDS conversion factor
    pub tds_factor: f32,
}

/// Temperature probe parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RtdParams {
    /// Reporting scale
    pub scale: TemperatureScale,
}

/// pH probe parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhParams {
    /// Extended pH scale enabled
    pub extended_scale: bool,
}

/// Humidity sensor output configuration
///
/// The device reports its enabled outputs in a specific order, and reading
/// responses carry values in that same order. Consumers must label positional
/// values by this list, not by an assumed canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HumParams {
    /// Output tokens in the order the device reports them
    pub outputs: heapless::Vec<heapless::String<8>, MAX_SENSOR_VALUES>,
    /// Relative humidity output enabled
    pub has_humidity: bool,
    /// Air temperature output enabled
    pub has_air_temp: bool,
    /// Dew point output enabled
    pub has_dew_point: bool,
}

/// Parameters that only exist for certain probe types
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeParams {
    /// No type-specific parameters
    #[default]
    None,
    /// RTD parameters
    Rtd(RtdParams),
    /// pH parameters
    Ph(PhParams),
    /// Conductivity parameters
    Ec(EcParams),
    /// Humidity parameters
    Hum(HumParams),
}

/// Cached state of one EZO device
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EzoSensorState {
    /// 7-bit I2C address
    pub address: u8,
    /// Resolved sensor type (Unknown if the info query never succeeded)
    pub sensor_type: SensorType,
    /// Capability flags fixed at discovery
    pub capabilities: Capabilities,
    /// Device name (may be empty)
    pub name: heapless::String<MAX_NAME_LEN>,
    /// Firmware version string
    pub firmware: heapless::String<16>,
    /// Indicator LED enabled
    pub led_enabled: bool,
    /// Protocol lock engaged
    pub protocol_locked: bool,
    /// Continuous reading mode enabled
    pub continuous_mode: bool,
    /// Last commanded sleep state (not queryable from the device)
    pub sleeping: bool,
    /// Cached temperature compensation target, if ever read or set
    pub temp_compensation: Option<f32>,
    /// Cached calibration status reply, if ever read
    pub calibration_status: Option<heapless::String<32>>,
    /// Type-specific parameter block
    pub params: TypeParams,
}

impl EzoSensorState {
    pub(crate) fn new(address: u8) -> Self {
        Self {
            address,
            sensor_type: SensorType::Unknown,
            capabilities: Capabilities::empty(),
            name: heapless::String::new(),
            firmware: heapless::String::new(),
            led_enabled: false,
            protocol_locked: false,
            continuous_mode: false,
            sleeping: false,
            temp_compensation: None,
            calibration_status: None,
            params: TypeParams::None,
        }
    }

    /// Conductivity parameters, if this is an EC device
    pub fn ec_params(&self) -> Option<&EcParams> {
        match &self.params {
            TypeParams::Ec(p) => Some(p),
            _ => None,
        }
    }

    fn ec_params_mut(&mut self) -> Option<&mut EcParams> {
        match &mut self.params {
            TypeParams::Ec(p) => Some(p),
            _ => None,
        }
    }

    /// RTD parameters, if this is a temperature device
    pub fn rtd_params(&self) -> Option<&RtdParams> {
        match &self.params {
            TypeParams::Rtd(p) => Some(p),
            _ => None,
        }
    }

    /// pH parameters, if this is a pH device
    pub fn ph_params(&self) -> Option<&PhParams> {
        match &self.params {
            TypeParams::Ph(p) => Some(p),
            _ => None,
        }
    }

    /// Humidity output configuration, if this is a humidity device
    pub fn hum_params(&self) -> Option<&HumParams> {
        match &self.params {
            TypeParams::Hum(p) => Some(p),
            _ => None,
        }
    }
}

/// Parse a `?O,...` output-configuration reply into humidity parameters,
/// preserving the device-reported order
pub(crate) fn parse_hum_outputs(payload: &str) -> HumParams {
    let mut params = HumParams::default();
    for (field, token) in payload.split(',').enumerate() {
        if field == 0 || params.outputs.is_full() {
            continue;
        }
        match token {
            "HUM" => params.has_humidity = true,
            "T" => params.has_air_temp = true,
            "Dew" => params.has_dew_point = true,
            _ => {}
        }
        let _ = params.outputs.push(copy_truncated(token));
    }
    params
}

impl EzoDevice {
    /// Read the type-specific parameter block at discovery time
    ///
    /// Individual query failures are logged and skipped; a sensor with a
    /// missing parameter is still usable.
    pub(crate) fn query_type_params<B: BusPort, D: Delay>(&mut self, bus: &mut B, delay: &D) {
        match self.state.sensor_type {
            SensorType::Rtd => {
                let mut params = RtdParams::default();
                match self.query_rtd_scale(bus, delay) {
                    Ok(scale) => params.scale = scale,
                    Err(_) => log_warn!(
                        "sensor 0x{:02X}: failed to read temperature scale",
                        self.state.address
                    ),
                }
                self.state.params = TypeParams::Rtd(params);
            }
            SensorType::Ph => {
                let mut params = PhParams::default();
                match self.query_ph_extended_scale(bus, delay) {
                    Ok(extended) => params.extended_scale = extended,
                    Err(_) => log_warn!(
                        "sensor 0x{:02X}: failed to read extended-scale flag",
                        self.state.address
                    ),
                }
                self.state.params = TypeParams::Ph(params);
            }
            SensorType::Ec => {
                let mut params = EcParams::default();
                match self.query_ec_probe_k(bus, delay) {
                    Ok(k) => params.probe_k = k,
                    Err(_) => {
                        log_warn!("sensor 0x{:02X}: failed to read probe K", self.state.address)
                    }
                }
                match self.query_ec_tds_factor(bus, delay) {
                    Ok(factor) => params.tds_factor = factor,
                    Err(_) => {
                        log_warn!("sensor 0x{:02X}: failed to read TDS factor", self.state.address)
                    }
                }
                self.state.params = TypeParams::Ec(params);
            }
            SensorType::Hum => match self.command(bus, delay, "O,?", SHORT_WAIT_MS) {
                Ok(payload) => {
                    let params = parse_hum_outputs(&payload);
                    log_info!(
                        "sensor 0x{:02X}: {} humidity output(s) enabled",
                        self.state.address,
                        params.outputs.len()
                    );
                    self.state.params = TypeParams::Hum(params);
                }
                Err(_) => {
                    log_warn!(
                        "sensor 0x{:02X}: failed to query humidity outputs",
                        self.state.address
                    );
                    self.state.params = TypeParams::Hum(HumParams::default());
                }
            },
            _ => {}
        }
    }

    fn query_rtd_scale<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<TemperatureScale> {
        let payload = self.command(bus, delay, "S,?", SHORT_WAIT_MS)?;
        reply_field(&payload, "?S")
            .and_then(|v| v.chars().next())
            .and_then(TemperatureScale::from_wire)
            .ok_or(SensorError::CommunicationFailure)
    }

    /// Set the RTD reporting scale
    pub fn set_rtd_scale<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        scale: TemperatureScale,
    ) -> SensorResult<()> {
        self.require_type(SensorType::Rtd, "temperature scale requires an RTD sensor")?;
        let cmd = fmt_command(format_args!("S,{}", scale.to_wire()))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)?;
        self.state.params = TypeParams::Rtd(RtdParams { scale });
        Ok(())
    }

    fn query_ph_extended_scale<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<bool> {
        let payload = self.command(bus, delay, "pHext,?", SHORT_WAIT_MS)?;
        super::reply_flag(&payload, "?pHext").ok_or(SensorError::CommunicationFailure)
    }

    /// Enable or disable the extended pH scale
    pub fn set_ph_extended_scale<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        enabled: bool,
    ) -> SensorResult<()> {
        self.require_type(SensorType::Ph, "extended scale requires a pH sensor")?;
        let cmd = fmt_command(format_args!("pHext,{}", u8::from(enabled)))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)?;
        self.state.params = TypeParams::Ph(PhParams { extended_scale: enabled });
        Ok(())
    }

    fn query_ec_probe_k<B: BusPort, D: Delay>(&self, bus: &mut B, delay: &D) -> SensorResult<f32> {
        let payload = self.command(bus, delay, "K,?", SHORT_WAIT_MS)?;
        reply_field(&payload, "?K")
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or(SensorError::CommunicationFailure)
    }

    /// Set the conductivity probe cell constant (K value)
    pub fn set_ec_probe_k<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        probe_k: f32,
    ) -> SensorResult<()> {
        self.require_type(SensorType::Ec, "probe K requires an EC sensor")?;
        let cmd = fmt_command(format_args!("K,{:.2}", probe_k))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)?;
        if let Some(params) = self.state.ec_params_mut() {
            params.probe_k = probe_k;
        }
        Ok(())
    }

    fn query_ec_tds_factor<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<f32> {
        let payload = self.command(bus, delay, "TDS,?", SHORT_WAIT_MS)?;
        reply_field(&payload, "?TDS")
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or(SensorError::CommunicationFailure)
    }

    /// Set the TDS conversion factor
    pub fn set_ec_tds_factor<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        factor: f32,
    ) -> SensorResult<()> {
        self.require_type(SensorType::Ec, "TDS factor requires an EC sensor")?;
        let cmd = fmt_command(format_args!("TDS,{:.2}", factor))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)?;
        if let Some(params) = self.state.ec_params_mut() {
            params.tds_factor = factor;
        }
        Ok(())
    }

    /// Enable or disable one of the device's output parameters
    ///
    /// `param` is the device's own token (`"TDS"`, `"Dew"`, ...); tokens are
    /// not interpreted here, only forwarded.
    pub fn set_output_parameter<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        param: &str,
        enabled: bool,
    ) -> SensorResult<()> {
        if param.is_empty() || param.contains(',') {
            return Err(SensorError::InvalidArgument {
                reason: "output parameter token must be a single field",
            });
        }
        let cmd = fmt_command(format_args!("O,{},{}", param, u8::from(enabled)))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)
    }

    /// Raw output-configuration reply (`"O,?"`)
    pub fn query_output_config<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<super::Payload> {
        self.command(bus, delay, "O,?", SHORT_WAIT_MS)
    }
}
