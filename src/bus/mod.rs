//! Bus sink abstraction: wherever frames actually go.
//!
//! The engine only ever calls `send`; a hardware adapter binding, a socket
//! transport or the in-memory [`virtual_bus::VirtualBus`] all satisfy the
//! same one-capability contract.

pub mod virtual_bus;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::message::frame::CanFrame;

/// Send-side bus faults. None are assumed recoverable by the sink itself;
/// the transmission task decides what is fatal (see the engine's reject
/// policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus not connected")]
    NotConnected,
    #[error("send timed out")]
    Timeout,
    #[error("frame rejected by bus")]
    Rejected,
}

/// One required capability: put a frame on the bus.
///
/// Implementations must be callable from multiple transmission tasks
/// concurrently. Sinks that wrap a handle without that guarantee should be
/// driven through [`SendGate`], which the engine applies by default.
pub trait BusSink: Send + Sync {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError>;
}

/// Serializes all sends through one exclusive gate.
///
/// Uncontrolled concurrent writes are undefined behavior for most bus APIs;
/// the gate trades a little send-timestamp jitter for that safety, which is
/// the right default for a simulator. The lock is held only for the duration
/// of the inner `send`.
pub struct SendGate {
    inner: Arc<dyn BusSink>,
    gate: Mutex<()>,
}

impl SendGate {
    pub fn new(inner: Arc<dyn BusSink>) -> Self {
        SendGate {
            inner,
            gate: Mutex::new(()),
        }
    }
}

impl BusSink for SendGate {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        let _exclusive = self.gate.lock();
        self.inner.send(frame)
    }
}
