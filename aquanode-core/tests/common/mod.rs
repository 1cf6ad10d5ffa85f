//! Shared test support: a scripted bus with simulated EZO devices
//!
//! `MockBus` implements `BusPort` over a map of simulated devices. Clones
//! share state, so a test can keep a handle to inspect or reconfigure the
//! simulation after the manager has taken ownership of the bus.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use aquanode_core::{BusPort, SensorError, SensorResult};

const STATUS_OK: u8 = 0x01;
const STATUS_SYNTAX: u8 = 0x02;
const STATUS_NOT_READY: u8 = 0xFE;
/// A status byte no firmware revision uses; decodes as a communication failure
const STATUS_GARBAGE: u8 = 0x42;

/// One simulated EZO circuit
pub struct EzoSim {
    pub type_token: &'static str,
    pub firmware: &'static str,
    pub name: String,
    /// When false the device ignores renames (older firmware behavior)
    pub persist_name: bool,
    pub led: bool,
    pub plock: bool,
    pub continuous: bool,
    pub temp_comp: f32,
    pub cal_status: String,
    pub scale: char,
    pub extended_scale: bool,
    pub probe_k: f32,
    pub tds_factor: f32,
    /// Raw payload returned for `O,?`
    pub output_config: String,
    /// Values reported for `R`, joined with commas
    pub reading: Vec<f32>,
    /// Number of NotReady replies queued before each reading's data
    pub notready_fetches: u32,
    /// Number of NotReady replies for the info query (`u32::MAX` = forever)
    pub info_notready: u32,
    /// Commands (exact match) answered with a garbage status byte
    pub fail_commands: Vec<&'static str>,
    replies: VecDeque<(u8, String)>,
}

impl EzoSim {
    fn base(type_token: &'static str, reading: Vec<f32>) -> Self {
        Self {
            type_token,
            firmware: "2.12",
            name: String::new(),
            persist_name: true,
            led: true,
            plock: false,
            continuous: false,
            temp_comp: 25.0,
            cal_status: "?Cal,2".into(),
            scale: 'C',
            extended_scale: false,
            probe_k: 1.0,
            tds_factor: 0.54,
            output_config: "?O".into(),
            reading,
            notready_fetches: 0,
            info_notready: 0,
            fail_commands: Vec::new(),
            replies: VecDeque::new(),
        }
    }

    pub fn ph() -> Self {
        Self::base("pH", vec![7.01])
    }

    pub fn rtd() -> Self {
        Self::base("RTD", vec![21.38])
    }

    pub fn ec() -> Self {
        Self::base("EC", vec![1413.0])
    }

    pub fn dissolved_oxygen() -> Self {
        Self::base("DO", vec![8.25])
    }

    pub fn orp() -> Self {
        Self::base("ORP", vec![225.0])
    }

    pub fn hum() -> Self {
        let mut sim = Self::base("HUM", vec![45.2, 23.1, 12.9]);
        sim.output_config = "?O,HUM,T,Dew".into();
        sim
    }

    pub fn with_reading(mut self, values: Vec<f32>) -> Self {
        self.reading = values;
        self
    }

    /// Prime stale responses that a previous power cycle left unread
    pub fn with_stale_boot_responses(mut self, stale: &[&str]) -> Self {
        for payload in stale {
            self.replies.push_back((STATUS_OK, (*payload).into()));
        }
        self
    }

    pub fn with_notready_fetches(mut self, count: u32) -> Self {
        self.notready_fetches = count;
        self
    }

    /// Make the info query report NotReady this many times (`u32::MAX` = forever)
    pub fn with_unresolved_info(mut self, count: u32) -> Self {
        self.info_notready = count;
        self
    }

    pub fn with_volatile_name(mut self) -> Self {
        self.persist_name = false;
        self
    }

    fn push(&mut self, status: u8, payload: impl Into<String>) {
        self.replies.push_back((status, payload.into()));
    }

    fn reading_payload(&self) -> String {
        self.reading
            .iter()
            .map(|v| format!("{v:.2}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// A new command replaces whatever response was pending
    fn handle_command(&mut self, cmd: &str) {
        self.replies.clear();

        if self.fail_commands.iter().any(|f| *f == cmd) {
            self.push(STATUS_GARBAGE, "");
            return;
        }

        if cmd == "i" {
            if self.info_notready > 0 {
                if self.info_notready != u32::MAX {
                    self.info_notready -= 1;
                }
                self.push(STATUS_NOT_READY, "");
            } else {
                self.push(STATUS_OK, format!("?I,{},{}", self.type_token, self.firmware));
            }
        } else if cmd == "R" {
            for _ in 0..self.notready_fetches {
                self.push(STATUS_NOT_READY, "");
            }
            let payload = self.reading_payload();
            self.push(STATUS_OK, payload);
        } else if cmd == "Name,?" {
            if self.name.is_empty() {
                self.push(STATUS_OK, "?NAME");
            } else {
                self.push(STATUS_OK, format!("?NAME,{}", self.name));
            }
        } else if let Some(name) = cmd.strip_prefix("Name,") {
            if self.persist_name {
                self.name = name.into();
            }
            self.push(STATUS_OK, "");
        } else if cmd == "L,?" {
            self.push(STATUS_OK, format!("?L,{}", u8::from(self.led)));
        } else if let Some(v) = cmd.strip_prefix("L,") {
            self.led = v == "1";
            self.push(STATUS_OK, "");
        } else if cmd == "Plock,?" {
            self.push(STATUS_OK, format!("?Plock,{}", u8::from(self.plock)));
        } else if let Some(v) = cmd.strip_prefix("Plock,") {
            self.plock = v == "1";
            self.push(STATUS_OK, "");
        } else if cmd == "pHext,?" {
            self.push(STATUS_OK, format!("?pHext,{}", u8::from(self.extended_scale)));
        } else if let Some(v) = cmd.strip_prefix("pHext,") {
            self.extended_scale = v == "1";
            self.push(STATUS_OK, "");
        } else if cmd == "S,?" {
            self.push(STATUS_OK, format!("?S,{}", self.scale));
        } else if let Some(v) = cmd.strip_prefix("S,") {
            self.scale = v.chars().next().unwrap_or('C');
            self.push(STATUS_OK, "");
        } else if cmd == "K,?" {
            self.push(STATUS_OK, format!("?K,{:.2}", self.probe_k));
        } else if let Some(v) = cmd.strip_prefix("K,") {
            self.probe_k = v.parse().unwrap_or(self.probe_k);
            self.push(STATUS_OK, "");
        } else if cmd == "TDS,?" {
            self.push(STATUS_OK, format!("?TDS,{:.2}", self.tds_factor));
        } else if let Some(v) = cmd.strip_prefix("TDS,") {
            self.tds_factor = v.parse().unwrap_or(self.tds_factor);
            self.push(STATUS_OK, "");
        } else if cmd == "T,?" {
            self.push(STATUS_OK, format!("?T,{:.2}", self.temp_comp));
        } else if let Some(v) = cmd.strip_prefix("T,") {
            self.temp_comp = v.parse().unwrap_or(self.temp_comp);
            self.push(STATUS_OK, "");
        } else if cmd == "Cal,?" {
            let status = self.cal_status.clone();
            self.push(STATUS_OK, status);
        } else if cmd.starts_with("Cal") {
            self.push(STATUS_OK, "");
        } else if cmd == "C,?" {
            self.push(STATUS_OK, format!("?C,{}", u8::from(self.continuous)));
        } else if cmd == "C" {
            self.continuous = true;
            self.push(STATUS_OK, "");
        } else if cmd == "C,0" {
            self.continuous = false;
            self.push(STATUS_OK, "");
        } else if cmd == "O,?" {
            let config = self.output_config.clone();
            self.push(STATUS_OK, config);
        } else if cmd.starts_with("O,") {
            self.push(STATUS_OK, "");
        } else if cmd == "Sleep" || cmd == "Wake" || cmd == "Factory" {
            self.push(STATUS_OK, "");
        } else if cmd.starts_with("I2C,") {
            // Device reboots; nothing will ever be readable.
        } else {
            self.push(STATUS_SYNTAX, "");
        }
    }

    /// Reading consumes the pending reply; an empty buffer reads as NotReady
    fn read_reply(&mut self) -> (u8, String) {
        self.replies
            .pop_front()
            .unwrap_or((STATUS_NOT_READY, String::new()))
    }
}

/// Simulated battery fuel gauge (fixed 16-bit registers)
pub struct BatterySim {
    pub voltage_raw: u16,
    pub soc_raw: u16,
    pub version: u16,
    selected_reg: u8,
}

impl Default for BatterySim {
    fn default() -> Self {
        Self {
            // ~4.0 V, 87.5 %
            voltage_raw: 51_200,
            soc_raw: 87 * 256 + 128,
            version: 0x0012,
            selected_reg: 0,
        }
    }
}

impl BatterySim {
    fn register(&self, reg: u8) -> u16 {
        match reg {
            0x02 => self.voltage_raw,
            0x04 => self.soc_raw,
            0x08 => self.version,
            _ => 0,
        }
    }
}

type TransmitHook = Box<dyn FnMut(u8, &str) + Send>;
type ReceiveHook = Box<dyn FnMut(u8) + Send>;

struct BusInner {
    devices: HashMap<u8, EzoSim>,
    battery: Option<(u8, BatterySim)>,
    transactions: usize,
    on_transmit: Option<TransmitHook>,
    on_receive: Option<ReceiveHook>,
}

/// Scripted bus; clones share the same simulation state
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                devices: HashMap::new(),
                battery: None,
                transactions: 0,
                on_transmit: None,
                on_receive: None,
            })),
        }
    }

    pub fn add_device(&self, address: u8, sim: EzoSim) -> &Self {
        self.inner.lock().unwrap().devices.insert(address, sim);
        self
    }

    pub fn add_battery(&self, address: u8, sim: BatterySim) -> &Self {
        self.inner.lock().unwrap().battery = Some((address, sim));
        self
    }

    /// Total transmit + receive transactions so far
    pub fn transaction_count(&self) -> usize {
        self.inner.lock().unwrap().transactions
    }

    /// Inspect or reconfigure a simulated device mid-test
    pub fn with_device<R>(&self, address: u8, f: impl FnOnce(&mut EzoSim) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let sim = inner.devices.get_mut(&address).expect("no sim at address");
        f(sim)
    }

    /// Hook invoked on every transmit, with the address and command string
    pub fn set_transmit_hook(&self, hook: impl FnMut(u8, &str) + Send + 'static) {
        self.inner.lock().unwrap().on_transmit = Some(Box::new(hook));
    }

    /// Hook invoked on every receive, with the address
    pub fn set_receive_hook(&self, hook: impl FnMut(u8) + Send + 'static) {
        self.inner.lock().unwrap().on_receive = Some(Box::new(hook));
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for MockBus {
    fn probe(&mut self, address: u8) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.devices.contains_key(&address)
            || inner.battery.as_ref().is_some_and(|(addr, _)| *addr == address)
    }

    fn transmit(&mut self, address: u8, bytes: &[u8], _timeout_ms: u32) -> SensorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.transactions += 1;

        let battery_addr = inner.battery.as_ref().map(|(addr, _)| *addr);
        if battery_addr == Some(address) {
            // Single-byte writes select a register; longer writes are register
            // writes the sim ignores.
            if bytes.len() == 1 {
                if let Some((_, batt)) = &mut inner.battery {
                    batt.selected_reg = bytes[0];
                }
            }
            return Ok(());
        }

        let cmd = core::str::from_utf8(bytes)
            .map_err(|_| SensorError::CommunicationFailure)?
            .to_string();
        if let Some(hook) = &mut inner.on_transmit {
            hook(address, &cmd);
        }
        match inner.devices.get_mut(&address) {
            Some(sim) => {
                sim.handle_command(&cmd);
                Ok(())
            }
            None => Err(SensorError::CommunicationFailure),
        }
    }

    fn receive(&mut self, address: u8, buf: &mut [u8], _timeout_ms: u32) -> SensorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.transactions += 1;

        if let Some(hook) = &mut inner.on_receive {
            hook(address);
        }

        if let Some((batt_addr, batt)) = &inner.battery {
            if *batt_addr == address {
                let value = batt.register(batt.selected_reg);
                let be = value.to_be_bytes();
                if buf.len() >= 2 {
                    buf[..2].copy_from_slice(&be);
                }
                return Ok(());
            }
        }

        let sim = inner
            .devices
            .get_mut(&address)
            .ok_or(SensorError::CommunicationFailure)?;
        let (status, payload) = sim.read_reply();

        buf.fill(0);
        buf[0] = status;
        for (slot, byte) in buf[1..].iter_mut().zip(payload.bytes()) {
            *slot = byte;
        }
        Ok(())
    }
}
