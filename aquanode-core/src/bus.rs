//! Bus access port - the boundary to the I2C controller
//!
//! The crate never owns a bus controller implementation. It consumes this
//! trait, which a platform layer implements on top of whatever I2C master
//! driver the target provides. Tests implement it with a scripted device
//! simulator.
//!
//! The bus is a mutually-exclusive shared resource: one transaction at a
//! time. The crate serializes its own calls through a single owner; foreground
//! callers that bypass the scheduler's pause/resume handshake can still
//! interleave transactions with an in-flight polling cycle (there is no
//! hardware-level lock at this boundary).

use crate::errors::SensorResult;

/// Abstract I2C master access used by all drivers
pub trait BusPort {
    /// Check whether a device acknowledges at `address` (7-bit)
    fn probe(&mut self, address: u8) -> bool;

    /// Write `bytes` to the device at `address`, failing after `timeout_ms`
    fn transmit(&mut self, address: u8, bytes: &[u8], timeout_ms: u32) -> SensorResult<()>;

    /// Read `buf.len()` bytes from the device at `address`, failing after `timeout_ms`
    fn receive(&mut self, address: u8, buf: &mut [u8], timeout_ms: u32) -> SensorResult<()>;
}

impl<T: BusPort + ?Sized> BusPort for &mut T {
    fn probe(&mut self, address: u8) -> bool {
        (**self).probe(address)
    }

    fn transmit(&mut self, address: u8, bytes: &[u8], timeout_ms: u32) -> SensorResult<()> {
        (**self).transmit(address, bytes, timeout_ms)
    }

    fn receive(&mut self, address: u8, buf: &mut [u8], timeout_ms: u32) -> SensorResult<()> {
        (**self).receive(address, buf, timeout_ms)
    }
}
