//! virtual_bus.rs
//! Software-only bus sink: records every frame into a bounded lock-free
//! queue instead of touching hardware. Used by the demo binary and as the
//! reference sink in tests.
//!
//! - Non-blocking recording: senders never wait on an observer; on overflow
//!   the frame is still "sent", only the recording is dropped (counted).
//! - `disconnect()` flips the sink into a failing state for fault injection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use log::debug;

use crate::bus::{BusError, BusSink};
use crate::message::frame::CanFrame;

/// One recorded transmission.
#[derive(Debug, Clone, Copy)]
pub struct SentFrame {
    pub frame: CanFrame,
    pub at: Instant,
}

pub struct VirtualBus {
    recorded: ArrayQueue<SentFrame>,
    connected: AtomicBool,
    sent: AtomicU64,
    overflowed: AtomicU64,
}

impl VirtualBus {
    /// `capacity` bounds the recording queue, not the bus itself.
    pub fn new(capacity: usize) -> Self {
        VirtualBus {
            recorded: ArrayQueue::new(capacity),
            connected: AtomicBool::new(true),
            sent: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Simulates pulling the transceiver: subsequent sends fail with
    /// `NotConnected` until `connect()` is called.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Total frames accepted since creation.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Recordings lost to a full queue.
    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Drains and returns everything recorded so far, oldest first.
    pub fn drain(&self) -> Vec<SentFrame> {
        let mut out = Vec::with_capacity(self.recorded.len());
        while let Some(rec) = self.recorded.pop() {
            out.push(rec);
        }
        out
    }
}

impl BusSink for VirtualBus {
    fn send(&self, frame: &CanFrame) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            "[VirtualBus] sent id={} data={:02X?}",
            frame.id,
            frame.payload()
        );

        let rec = SentFrame {
            frame: *frame,
            at: Instant::now(),
        };
        if self.recorded.push(rec).is_err() {
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
