//! EZO ASCII Command/Response Protocol Driver
//!
//! ## Overview
//!
//! Atlas-Scientific-style EZO circuits speak a simple ASCII protocol over
//! I2C: the host writes a command string, waits a command-specific settle
//! time, then reads a fixed-size buffer whose first byte is a status code:
//!
//! ```text
//! 0x01  Success      - NUL-terminated string payload follows
//! 0x02  SyntaxError  - device rejected the command
//! 0xFE  NotReady     - still processing (also: nothing queued to read)
//! 0xFF  NoData       - device has nothing to report
//! other               - treated as a bus-level communication failure
//! ```
//!
//! Two protocol quirks shape this driver:
//!
//! - **Stale boot responses.** A device can carry an unread response across a
//!   host power cycle (humidity sensors are notably slow to finish one), so
//!   [`EzoDevice::init`] drains the buffer before the first real command.
//! - **The address-change reboot.** `"I2C,<n>"` reboots the device and never
//!   produces a response; the send path special-cases it.
//!
//! Readings come in two flavors: blocking ([`EzoDevice::read`],
//! [`EzoDevice::read_all`]) and split ([`EzoDevice::start_read`] +
//! [`EzoDevice::fetch_all`]), which lets a scheduler overlap the conversion
//! time of several devices within one polling cycle.

mod calibration;
mod state;

pub use calibration::{
    DoCalibration, EcCalibration, OrpCalibration, PhCalibration, RtdCalibration,
};
pub use state::{
    EcParams, EzoSensorState, HumParams, PhParams, RtdParams, TemperatureScale, TypeParams,
    MAX_NAME_LEN,
};

use core::fmt::Write as _;

use crate::bus::BusPort;
use crate::errors::{SensorError, SensorResult};
use crate::logging::{log_debug, log_error, log_info, log_warn};
use crate::time::Delay;
use crate::types::{Capabilities, SensorType, MAX_SENSOR_VALUES};

/// Fixed response buffer size (status byte + payload)
pub const RESPONSE_BUF_LEN: usize = 24;

/// Settle time for simple query/set commands
const SHORT_WAIT_MS: u32 = 300;
/// Settle time for slow commands (name writes and their verification reads)
const LONG_WAIT_MS: u32 = 5000;
/// Per-transaction I2C timeout
const IO_TIMEOUT_MS: u32 = 1000;

/// Wait before draining stale responses left over from a previous power cycle
const DRAIN_SETTLE_MS: u32 = 600;
/// Drain attempts before giving up and continuing best-effort
const DRAIN_ATTEMPTS: usize = 5;

/// Device-info query attempts for sensors that boot slowly
const INFO_ATTEMPTS: usize = 3;
const INFO_RETRY_DELAY_MS: u32 = 2000;

const RESP_SUCCESS: u8 = 0x01;
const RESP_SYNTAX_ERROR: u8 = 0x02;
const RESP_NOT_READY: u8 = 0xFE;
const RESP_NO_DATA: u8 = 0xFF;

/// Largest command this driver ever formats
const COMMAND_MAX: usize = 32;

pub(crate) type Payload = heapless::String<RESPONSE_BUF_LEN>;
pub(crate) type CommandBuf = heapless::String<COMMAND_MAX>;
/// Values parsed from one reading response
pub type ReadingValues = heapless::Vec<f32, MAX_SENSOR_VALUES>;

/// Map a response status byte to a protocol outcome
const fn decode_status(status: u8) -> SensorResult<()> {
    match status {
        RESP_SUCCESS => Ok(()),
        RESP_SYNTAX_ERROR => Err(SensorError::SyntaxError),
        RESP_NOT_READY => Err(SensorError::Pending),
        RESP_NO_DATA => Err(SensorError::NoData),
        _ => Err(SensorError::CommunicationFailure),
    }
}

/// Copy a token into a fixed-capacity string, truncating silently
pub(crate) fn copy_truncated<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Format a command into a bounded buffer
fn fmt_command(args: core::fmt::Arguments<'_>) -> SensorResult<CommandBuf> {
    let mut cmd = CommandBuf::new();
    cmd.write_fmt(args).map_err(|_| SensorError::InvalidArgument {
        reason: "command too long",
    })?;
    Ok(cmd)
}

/// Parse a comma-separated reading response
///
/// Some firmware echoes stray text tokens alongside the numbers; any token
/// that does not start with a digit, `-`, or `.` is skipped.
pub(crate) fn parse_values(payload: &str) -> ReadingValues {
    let mut values = ReadingValues::new();
    for token in payload.split(',') {
        if values.is_full() {
            break;
        }
        let numeric_start = token
            .as_bytes()
            .first()
            .is_some_and(|b| b.is_ascii_digit() || *b == b'-' || *b == b'.');
        if !numeric_start {
            continue;
        }
        if let Ok(value) = token.parse::<f32>() {
            let _ = values.push(value);
        }
    }
    values
}

/// Extract the value field from a `?KEY,<value>` query reply
fn reply_field<'a>(payload: &'a str, key: &str) -> Option<&'a str> {
    let mut fields = payload.split(',');
    if fields.next() != Some(key) {
        return None;
    }
    fields.next()
}

/// Parse a `?KEY,<0|1>` boolean query reply
fn reply_flag(payload: &str, key: &str) -> Option<bool> {
    reply_field(payload, key).and_then(|v| v.parse::<u8>().ok()).map(|v| v == 1)
}

/// Read one response buffer and decode it into a payload
fn receive_reply<B: BusPort>(bus: &mut B, address: u8) -> SensorResult<Payload> {
    let mut buf = [0u8; RESPONSE_BUF_LEN];
    bus.receive(address, &mut buf, IO_TIMEOUT_MS)?;

    if let Err(e) = decode_status(buf[0]) {
        if e == SensorError::CommunicationFailure {
            log_error!("sensor 0x{:02X}: unknown status byte 0x{:02X}", address, buf[0]);
        }
        return Err(e);
    }

    let mut payload = Payload::new();
    for &b in &buf[1..] {
        if b == 0 {
            break;
        }
        let _ = payload.push(b as char);
    }
    Ok(payload)
}

/// Driver instance for one EZO circuit
///
/// The device does not own the bus; every operation borrows it, which keeps
/// all transactions serialized through whoever owns the bus value.
#[derive(Debug, Clone)]
pub struct EzoDevice {
    state: EzoSensorState,
}

impl EzoDevice {
    /// Initialize a device at `address`
    ///
    /// Drains stale buffered responses from a previous power cycle, then
    /// resolves the device type via the info query (retrying while the device
    /// reports it is still busy), loads the capability table, and reads back
    /// name, LED, protocol-lock and type-specific parameters.
    ///
    /// An unresolved info query leaves the type as [`SensorType::Unknown`]
    /// instead of failing init; a sensor we cannot classify is still worth
    /// polling.
    pub fn init<B: BusPort, D: Delay>(bus: &mut B, delay: &D, address: u8) -> SensorResult<Self> {
        log_info!("initializing EZO sensor at 0x{:02X}", address);

        let mut device = Self {
            state: EzoSensorState::new(address),
        };

        device.drain_stale(bus, delay);

        let mut info_result: SensorResult<()> = Ok(());
        for attempt in 0..INFO_ATTEMPTS {
            info_result = device.query_device_info(bus, delay);
            match info_result {
                Ok(()) => break,
                Err(SensorError::Pending) if attempt + 1 < INFO_ATTEMPTS => {
                    log_warn!(
                        "sensor 0x{:02X} not ready, retrying in 2 s (attempt {}/{})",
                        address,
                        attempt + 1,
                        INFO_ATTEMPTS
                    );
                    delay.delay_ms(INFO_RETRY_DELAY_MS);
                }
                Err(_) => {}
            }
        }
        if info_result.is_err() {
            log_warn!(
                "sensor 0x{:02X}: device info unresolved after {} attempts, continuing",
                address,
                INFO_ATTEMPTS
            );
        }

        log_info!(
            "EZO sensor initialized: type={}, fw={}",
            device.state.sensor_type.wire_name(),
            device.state.firmware
        );

        Ok(device)
    }

    /// I2C address of this device
    pub fn address(&self) -> u8 {
        self.state.address
    }

    /// Resolved sensor type
    pub fn sensor_type(&self) -> SensorType {
        self.state.sensor_type
    }

    /// Cached device state (settings, parameters, capabilities)
    pub fn state(&self) -> &EzoSensorState {
        &self.state
    }

    // --- command engine -----------------------------------------------------

    fn transmit_cmd<B: BusPort>(&self, bus: &mut B, cmd: &str) -> SensorResult<bool> {
        log_debug!("sending to 0x{:02X}: {}", self.state.address, cmd);
        bus.transmit(self.state.address, cmd.as_bytes(), IO_TIMEOUT_MS)?;

        // Address change reboots the device; there will never be a response.
        if cmd.as_bytes().starts_with(b"I2C,") {
            log_warn!(
                "sensor 0x{:02X}: address change sent, device will reboot",
                self.state.address
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Send a command, wait, and read the response payload
    fn command<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
        cmd: &str,
        wait_ms: u32,
    ) -> SensorResult<Payload> {
        if !self.transmit_cmd(bus, cmd)? {
            return Ok(Payload::new());
        }
        if wait_ms > 0 {
            delay.delay_ms(wait_ms);
        }
        receive_reply(bus, self.state.address)
    }

    /// Send a command and wait, leaving any response unread
    fn command_no_reply<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
        cmd: &str,
        wait_ms: u32,
    ) -> SensorResult<()> {
        if self.transmit_cmd(bus, cmd)? && wait_ms > 0 {
            delay.delay_ms(wait_ms);
        }
        Ok(())
    }

    /// Drain stale responses left in the device buffer
    ///
    /// A `Pending` status means the buffer is empty. If five reads never see
    /// it the bus may be jammed; that is logged and tolerated rather than
    /// failing init.
    fn drain_stale<B: BusPort, D: Delay>(&self, bus: &mut B, delay: &D) {
        // Give slow devices time to finish a response from before our reboot.
        delay.delay_ms(DRAIN_SETTLE_MS);

        let mut cleared = 0usize;
        let mut settled = false;
        for _ in 0..DRAIN_ATTEMPTS {
            match receive_reply(bus, self.state.address) {
                Err(SensorError::Pending) => {
                    settled = true;
                    break;
                }
                Ok(stale) => {
                    cleared += 1;
                    log_warn!(
                        "cleared stale response #{} from 0x{:02X}: '{}'",
                        cleared,
                        self.state.address,
                        stale
                    );
                }
                Err(_) => {
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            log_info!("cleared {} stale response(s) from 0x{:02X}", cleared, self.state.address);
        }
        if !settled {
            log_warn!(
                "sensor 0x{:02X}: response buffer never settled after {} reads, continuing",
                self.state.address,
                DRAIN_ATTEMPTS
            );
        }
    }

    // --- discovery ----------------------------------------------------------

    /// Query `"i"` and populate type, firmware, capabilities and settings
    fn query_device_info<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<()> {
        let payload = self.command(bus, delay, "i", SHORT_WAIT_MS)?;
        log_info!("sensor 0x{:02X}: device info '{}'", self.state.address, payload);

        // Response format: ?I,<type>,<version>
        for (field, token) in payload.split(',').enumerate() {
            match field {
                1 => self.state.sensor_type = SensorType::from_wire(token),
                2 => self.state.firmware = copy_truncated(token),
                _ => {}
            }
        }
        self.state.capabilities = self.state.sensor_type.capabilities();

        match self.query_name(bus, delay) {
            Ok(name) => self.state.name = name,
            Err(_) => log_warn!("sensor 0x{:02X}: failed to read name", self.state.address),
        }
        match self.query_led(bus, delay) {
            Ok(enabled) => self.state.led_enabled = enabled,
            Err(_) => log_warn!("sensor 0x{:02X}: failed to read LED state", self.state.address),
        }
        match self.query_protocol_lock(bus, delay) {
            Ok(locked) => self.state.protocol_locked = locked,
            Err(_) => {
                log_warn!("sensor 0x{:02X}: failed to read protocol lock", self.state.address)
            }
        }

        self.query_type_params(bus, delay);

        Ok(())
    }

    // --- readings -----------------------------------------------------------

    /// Blocking single-value reading
    ///
    /// Waits out this device type's conversion delay before fetching.
    pub fn read<B: BusPort, D: Delay>(&self, bus: &mut B, delay: &D) -> SensorResult<f32> {
        let wait = self.state.sensor_type.conversion_delay_ms();
        let payload = self.command(bus, delay, "R", wait)?;
        parse_values(&payload).first().copied().ok_or(SensorError::NoData)
    }

    /// Blocking multi-value reading (humidity circuits report up to 4 values)
    pub fn read_all<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<ReadingValues> {
        let wait = self.state.sensor_type.conversion_delay_ms();
        let payload = self.command(bus, delay, "R", wait)?;
        Ok(parse_values(&payload))
    }

    /// Kick off a reading without waiting for the response
    ///
    /// Pair with [`EzoDevice::fetch_all`] after the conversion delay; this
    /// lets several devices convert concurrently.
    pub fn start_read<B: BusPort>(&self, bus: &mut B) -> SensorResult<()> {
        self.transmit_cmd(bus, "R").map(|_| ())
    }

    /// Fetch and parse the values from a previously started reading
    pub fn fetch_all<B: BusPort>(&self, bus: &mut B) -> SensorResult<ReadingValues> {
        let payload = receive_reply(bus, self.state.address)?;
        Ok(parse_values(&payload))
    }

    // --- name ---------------------------------------------------------------

    fn query_name<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<heapless::String<MAX_NAME_LEN>> {
        let payload = self.command(bus, delay, "Name,?", SHORT_WAIT_MS)?;
        log_debug!("sensor 0x{:02X}: name reply '{}'", self.state.address, payload);

        // "?NAME,<name>" when set (older firmware answers "?Name,"); a bare
        // "?NAME" or an empty payload means no name is stored.
        let name = reply_field(&payload, "?NAME")
            .or_else(|| reply_field(&payload, "?Name"))
            .unwrap_or("");
        Ok(copy_truncated(name))
    }

    /// Cached device name
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Rename the device
    ///
    /// The name is validated (1-16 chars of `[A-Za-z0-9_]`) before anything
    /// touches the bus. After the write the name is read back; some deployed
    /// firmware silently ignores renames, so a verification mismatch is
    /// logged and the local cached name is updated anyway - usability over
    /// strictness, on purpose.
    pub fn set_name<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        name: &str,
    ) -> SensorResult<()> {
        validate_name(name)?;

        // Flush anything stale so the verification read sees our reply.
        for _ in 0..3 {
            let _ = receive_reply(bus, self.state.address);
        }
        delay.delay_ms(100);

        let cmd = fmt_command(format_args!("Name,{}", name))?;
        log_info!("sensor 0x{:02X}: setting name '{}'", self.state.address, name);
        self.command(bus, delay, &cmd, LONG_WAIT_MS)?;

        delay.delay_ms(DRAIN_SETTLE_MS);
        for _ in 0..3 {
            let _ = receive_reply(bus, self.state.address);
        }
        delay.delay_ms(100);

        match self.query_name(bus, delay) {
            Ok(readback) if readback.as_str() == name => {
                log_info!("sensor 0x{:02X}: name verified '{}'", self.state.address, name);
            }
            readback => {
                log_warn!(
                    "sensor 0x{:02X}: name verification failed, set='{}' read={:?}",
                    self.state.address,
                    name,
                    readback
                );
            }
        }
        // Keep the local state in sync even when the device would not persist it.
        self.state.name = copy_truncated(name);
        Ok(())
    }

    // --- LED / protocol lock ------------------------------------------------

    fn query_led<B: BusPort, D: Delay>(&self, bus: &mut B, delay: &D) -> SensorResult<bool> {
        let payload = self.command(bus, delay, "L,?", SHORT_WAIT_MS)?;
        reply_flag(&payload, "?L").ok_or(SensorError::CommunicationFailure)
    }

    /// Switch the indicator LED on or off
    pub fn set_led<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        enabled: bool,
    ) -> SensorResult<()> {
        let cmd = if enabled { "L,1" } else { "L,0" };
        self.command_no_reply(bus, delay, cmd, SHORT_WAIT_MS)?;
        self.state.led_enabled = enabled;
        Ok(())
    }

    fn query_protocol_lock<B: BusPort, D: Delay>(
        &self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<bool> {
        let payload = self.command(bus, delay, "Plock,?", SHORT_WAIT_MS)?;
        reply_flag(&payload, "?Plock").ok_or(SensorError::CommunicationFailure)
    }

    /// Lock or unlock the device's communication protocol setting
    pub fn set_protocol_lock<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        locked: bool,
    ) -> SensorResult<()> {
        let cmd = if locked { "Plock,1" } else { "Plock,0" };
        self.command_no_reply(bus, delay, cmd, SHORT_WAIT_MS)?;
        self.state.protocol_locked = locked;
        Ok(())
    }

    // --- modes, sleep, compensation ----------------------------------------

    /// Enable or disable continuous reading mode
    pub fn set_continuous_mode<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        enable: bool,
    ) -> SensorResult<()> {
        self.require_capability(Capabilities::MODE)?;
        let cmd = if enable { "C" } else { "C,0" };
        self.command_no_reply(bus, delay, cmd, SHORT_WAIT_MS)?;
        self.state.continuous_mode = enable;
        Ok(())
    }

    /// Query continuous reading mode and refresh the cached flag
    pub fn query_continuous_mode<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<bool> {
        self.require_capability(Capabilities::MODE)?;
        let payload = self.command(bus, delay, "C,?", SHORT_WAIT_MS)?;
        let enabled = reply_flag(&payload, "?C").ok_or(SensorError::CommunicationFailure)?;
        self.state.continuous_mode = enabled;
        Ok(enabled)
    }

    /// Put the device to sleep
    pub fn sleep<B: BusPort, D: Delay>(&mut self, bus: &mut B, delay: &D) -> SensorResult<()> {
        self.require_capability(Capabilities::SLEEP)?;
        self.command_no_reply(bus, delay, "Sleep", SHORT_WAIT_MS)?;
        self.state.sleeping = true;
        Ok(())
    }

    /// Wake the device from sleep
    pub fn wake<B: BusPort, D: Delay>(&mut self, bus: &mut B, delay: &D) -> SensorResult<()> {
        self.require_capability(Capabilities::SLEEP)?;
        self.command_no_reply(bus, delay, "Wake", SHORT_WAIT_MS)?;
        self.state.sleeping = false;
        Ok(())
    }

    /// Query the temperature compensation target (pH only)
    pub fn query_temp_compensation<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<f32> {
        self.require_capability(Capabilities::TEMP_COMP)?;
        let payload = self.command(bus, delay, "T,?", SHORT_WAIT_MS)?;
        let temp = reply_field(&payload, "?T")
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or(SensorError::CommunicationFailure)?;
        self.state.temp_compensation = Some(temp);
        Ok(temp)
    }

    /// Set the temperature compensation target (pH only)
    pub fn set_temp_compensation<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        temperature_c: f32,
    ) -> SensorResult<()> {
        self.require_capability(Capabilities::TEMP_COMP)?;
        let cmd = fmt_command(format_args!("T,{:.2}", temperature_c))?;
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)?;
        self.state.temp_compensation = Some(temperature_c);
        Ok(())
    }

    // --- maintenance --------------------------------------------------------

    /// Factory reset the device
    pub fn factory_reset<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<()> {
        log_warn!("factory resetting sensor at 0x{:02X}", self.state.address);
        self.command_no_reply(bus, delay, "Factory", SHORT_WAIT_MS)
    }

    /// Change the device's I2C address; the device reboots and never replies
    pub fn change_address<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
        new_address: u8,
    ) -> SensorResult<()> {
        if new_address == 0 || new_address > 0x7F {
            return Err(SensorError::InvalidArgument {
                reason: "address must be a 7-bit value",
            });
        }
        let cmd = fmt_command(format_args!("I2C,{}", new_address))?;
        log_warn!(
            "changing sensor address 0x{:02X} -> 0x{:02X} (device will reboot)",
            self.state.address,
            new_address
        );
        self.command_no_reply(bus, delay, &cmd, SHORT_WAIT_MS)
    }

    /// Best-effort refresh of calibration status, temp compensation and mode
    ///
    /// Only queries capabilities the device actually has. Individual query
    /// failures do not stop the remaining queries; the first error seen is
    /// returned at the end.
    pub fn refresh_settings<B: BusPort, D: Delay>(
        &mut self,
        bus: &mut B,
        delay: &D,
    ) -> SensorResult<()> {

        let mut first_err: SensorResult<()> = Ok(());
        let caps = self.state.capabilities;

        if caps.contains(Capabilities::CALIBRATION) {
            match self.query_calibration_status(bus, delay) {
                Ok(status) => self.state.calibration_status = Some(status),
                Err(e) => {
                    self.state.calibration_status = None;
                    if first_err.is_ok() {
                        first_err = Err(e);
                    }
                }
            }
        }

        if caps.contains(Capabilities::TEMP_COMP) && self.state.sensor_type == SensorType::Ph {
            if let Err(e) = self.query_temp_compensation(bus, delay) {
                self.state.temp_compensation = None;
                if first_err.is_ok() {
                    first_err = Err(e);
                }
            }
        }

        if caps.contains(Capabilities::MODE) {
            if let Err(e) = self.query_continuous_mode(bus, delay) {
                if first_err.is_ok() {
                    first_err = Err(e);
                }
            }
        }

        // Sleep state cannot be queried; the cached flag only changes via sleep()/wake().

        first_err
    }

    fn require_capability(&self, cap: Capabilities) -> SensorResult<()> {
        if self.state.capabilities.contains(cap) {
            Ok(())
        } else {
            Err(SensorError::NotSupported)
        }
    }

    fn require_type(&self, expected: SensorType, reason: &'static str) -> SensorResult<()> {
        if self.state.sensor_type == expected {
            Ok(())
        } else {
            Err(SensorError::InvalidArgument { reason })
        }
    }
}

/// Validate a device name before any bus traffic: 1-16 chars of `[A-Za-z0-9_]`
pub fn validate_name(name: &str) -> SensorResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SensorError::InvalidArgument {
            reason: "name must be 1-16 characters",
        });
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(SensorError::InvalidArgument {
            reason: "name may only contain letters, digits and underscore",
        });
    }
    Ok(())
}
