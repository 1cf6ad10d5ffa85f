//! Error Types for Sensor Bus and Scheduler Failures
//!
//! ## Design Philosophy
//!
//! The error system follows the same rules as the rest of the crate:
//!
//! 1. **Small Size**: every variant is inline data only (no String, no heap),
//!    so errors can be returned from hot polling paths and stored in caches.
//!
//! 2. **Copy Semantics**: errors implement Copy so partial-failure bookkeeping
//!    (keeping the *first* error while continuing with the remaining queries)
//!    is free.
//!
//! 3. **Actionable Taxonomy**: a caller can decide retry-vs-fail from the
//!    variant alone. `Pending` is the only retryable protocol outcome;
//!    `SyntaxError` is a programmer error and must never be retried.
//!
//! ## Error Categories
//!
//! ### Protocol outcomes (mapped from the device status byte)
//! - `Pending`: command still processing, retry after a settle delay
//! - `NoData`: device has nothing queued to report
//! - `SyntaxError`: device rejected the command as malformed
//!
//! ### Bus and capacity failures
//! - `CommunicationFailure`: bus-level timeout or NAK
//! - `CapacityExceeded`: sensor registry is full
//!
//! ### Caller mistakes and absence
//! - `InvalidArgument`: rejected before any bus transaction
//! - `NotSupported`: operation gated by a capability the device lacks
//! - `NotFound`: sensor/type absent, or no snapshot published yet
//! - `Timeout`: a bounded cooperative wait expired

use thiserror_no_std::Error;

/// Result type for all sensor operations
pub type SensorResult<T> = Result<T, SensorError>;

/// Sensor errors - kept small and Copy for embedded use
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Bad input, rejected before any I/O was attempted
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input
        reason: &'static str,
    },

    /// Sensor or sensor type absent, or no cached snapshot exists yet
    #[error("sensor not found")]
    NotFound,

    /// Device is still processing the previous command (retryable)
    #[error("command still processing")]
    Pending,

    /// Device has no data queued to report
    #[error("device has no data")]
    NoData,

    /// Device flagged the command as malformed (programmer error, not retried)
    #[error("device rejected command syntax")]
    SyntaxError,

    /// Bus-level failure: timeout, NAK, or an unrecognized status byte
    #[error("bus communication failure")]
    CommunicationFailure,

    /// Sensor registry is at capacity
    #[error("sensor registry full")]
    CapacityExceeded,

    /// Operation requires a capability this device does not have
    #[error("operation not supported by this sensor")]
    NotSupported,

    /// A bounded cooperative wait expired before the resource became free
    #[error("timed out after {waited_ms} ms")]
    Timeout {
        /// How long the caller waited before giving up
        waited_ms: u32,
    },
}

impl SensorError {
    /// Whether a caller may retry the failed operation after a settle delay
    pub const fn is_retryable(&self) -> bool {
        matches!(self, SensorError::Pending)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SensorError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::InvalidArgument { reason } => defmt::write!(fmt, "invalid argument: {}", reason),
            Self::NotFound => defmt::write!(fmt, "sensor not found"),
            Self::Pending => defmt::write!(fmt, "command still processing"),
            Self::NoData => defmt::write!(fmt, "device has no data"),
            Self::SyntaxError => defmt::write!(fmt, "syntax error"),
            Self::CommunicationFailure => defmt::write!(fmt, "bus communication failure"),
            Self::CapacityExceeded => defmt::write!(fmt, "registry full"),
            Self::NotSupported => defmt::write!(fmt, "not supported"),
            Self::Timeout { waited_ms } => defmt::write!(fmt, "timed out after {} ms", waited_ms),
        }
    }
}
