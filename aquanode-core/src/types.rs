//! Sensor type model and per-type capability table
//!
//! Sensor types are a closed enum. The ASCII tokens the devices report
//! (`"RTD"`, `"pH"`, ...) are parsed exactly once, at the protocol boundary
//! ([`SensorType::from_wire`]); everything inside the crate dispatches on the
//! enum. Capabilities are fixed per type at discovery time and gate every
//! settings/calibration operation before it reaches the bus.

/// Maximum number of values a single reading can carry (multi-output sensors)
pub const MAX_SENSOR_VALUES: usize = 4;

/// Kinds of sensor this node understands
///
/// The first six are EZO probe circuits; `Battery` is the fuel gauge,
/// `Unknown` is the fallback for devices whose info query never resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SensorType {
    /// Temperature probe (RTD)
    Rtd = 0,
    /// pH probe
    Ph = 1,
    /// Electrical conductivity probe
    Ec = 2,
    /// Dissolved oxygen probe
    Do = 3,
    /// Oxidation-reduction potential probe
    Orp = 4,
    /// Humidity sensor
    Hum = 5,
    /// Battery fuel gauge
    Battery = 6,
    /// Device responded but its type could not be resolved
    #[default]
    Unknown = 7,
}

impl SensorType {
    /// Parse the type token from a device info response
    ///
    /// This is the only place wire tokens become types; unknown tokens map to
    /// [`SensorType::Unknown`] rather than failing.
    pub fn from_wire(token: &str) -> Self {
        match token {
            "RTD" => SensorType::Rtd,
            "pH" => SensorType::Ph,
            "EC" => SensorType::Ec,
            "DO" => SensorType::Do,
            "ORP" => SensorType::Orp,
            "HUM" => SensorType::Hum,
            _ => SensorType::Unknown,
        }
    }

    /// The token this type uses on the wire (and in logs)
    pub const fn wire_name(&self) -> &'static str {
        match self {
            SensorType::Rtd => "RTD",
            SensorType::Ph => "pH",
            SensorType::Ec => "EC",
            SensorType::Do => "DO",
            SensorType::Orp => "ORP",
            SensorType::Hum => "HUM",
            SensorType::Battery => "BATTERY",
            SensorType::Unknown => "UNKNOWN",
        }
    }

    /// Unit of the primary value this type reports
    pub const fn unit(&self) -> &'static str {
        match self {
            SensorType::Rtd => "°C",
            SensorType::Ph => "",
            SensorType::Ec => "µS/cm",
            SensorType::Do => "mg/L",
            SensorType::Orp => "mV",
            SensorType::Hum => "%",
            SensorType::Battery => "%",
            SensorType::Unknown => "",
        }
    }

    /// Capabilities fixed for this type at discovery time
    pub const fn capabilities(&self) -> Capabilities {
        match self {
            SensorType::Ph => Capabilities::CALIBRATION
                .union(Capabilities::TEMP_COMP)
                .union(Capabilities::MODE)
                .union(Capabilities::SLEEP),
            SensorType::Orp => Capabilities::CALIBRATION
                .union(Capabilities::MODE)
                .union(Capabilities::SLEEP),
            SensorType::Ec => Capabilities::CALIBRATION.union(Capabilities::MODE),
            SensorType::Rtd => Capabilities::CALIBRATION,
            SensorType::Do => Capabilities::CALIBRATION.union(Capabilities::MODE),
            _ => Capabilities::empty(),
        }
    }

    /// Milliseconds a triggered reading needs before its value can be fetched
    ///
    /// Unresolved types get the conservative default.
    pub const fn conversion_delay_ms(&self) -> u32 {
        match self {
            SensorType::Ph | SensorType::Orp => 900,
            SensorType::Ec => 1000,
            SensorType::Do => 1300,
            SensorType::Rtd | SensorType::Hum => 600,
            _ => 1000,
        }
    }

    /// Whether this is one of the EZO probe types (not battery, not unknown)
    pub const fn is_ezo(&self) -> bool {
        matches!(
            self,
            SensorType::Rtd
                | SensorType::Ph
                | SensorType::Ec
                | SensorType::Do
                | SensorType::Orp
                | SensorType::Hum
        )
    }
}

/// Bit flags for per-type device capabilities
///
/// Settings and calibration operations check these before touching the bus,
/// so the UI can stay data-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capabilities(u8);

impl Capabilities {
    /// Device supports calibration commands
    pub const CALIBRATION: Self = Self(1 << 0);
    /// Device supports temperature compensation
    pub const TEMP_COMP: Self = Self(1 << 1);
    /// Device supports sleep/wake
    pub const SLEEP: Self = Self(1 << 2);
    /// Device supports continuous-mode switching
    pub const MODE: Self = Self(1 << 3);
    /// Device supports an output offset
    pub const OFFSET: Self = Self(1 << 4);

    /// No capabilities
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Union of two capability sets
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every flag in `other` is present
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Raw bit representation (for UIs and serialization)
    pub const fn bits(&self) -> u8 {
        self.0
    }
}
