//! task.rs
//! Per-message transmission worker: one dedicated thread cycling
//! generate → send → report → wait, against an absolute schedule.
//!
//! - Absolute deadlines (`next_deadline += period`): generation and send
//!   latency never accumulate into drift over a long run.
//! - First frame at t=0 ("send now, then wait"), so a front end sees
//!   immediate feedback on start.
//! - Cooperative stop with bounded wake latency: the wait blocks on the stop
//!   channel up to a spin window before the deadline, then spin-sleeps the
//!   residual for sub-millisecond release precision.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use dashmap::DashMap;
use log::{debug, error, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::bus::{BusError, BusSink};
use crate::engine::status::{StatusEvent, StatusKind, TaskState, TaskStatusSnapshot};
use crate::message::descriptor::{MessageDescriptor, MessageKey};
use crate::message::frame::CanFrame;

// Final stretch of each wait handled by the spin sleeper; also the bound on
// how long a stop request can go unnoticed.
const SPIN_WINDOW: Duration = Duration::from_millis(1);
const SPIN_NATIVE_ACCURACY_NS: u32 = 100_000;

enum WaitOutcome {
    Deadline,
    Stop,
}

pub(crate) struct TxTask {
    pub key: MessageKey,
    pub descriptor: Arc<MessageDescriptor>,
    pub sink: Arc<dyn BusSink>,
    pub stop_rx: Receiver<()>,
    pub events: Sender<StatusEvent>,
    pub snapshots: Arc<DashMap<MessageKey, TaskStatusSnapshot>>,
    pub fatal_rejects: bool,
}

impl TxTask {
    /// Runs the periodic cycle until stopped or failed. The engine has
    /// already published the `Running` state before spawning us.
    pub fn run(self) {
        let sleeper = SpinSleeper::new(SPIN_NATIVE_ACCURACY_NS)
            .with_spin_strategy(SpinStrategy::YieldThread);
        let period = self.descriptor.period;
        let mut next_deadline = Instant::now();

        loop {
            match self.wait_until(next_deadline, &sleeper) {
                WaitOutcome::Stop => {
                    self.set_state(TaskState::Stopped);
                    debug!("[{}] stopped", self.key);
                    return;
                }
                WaitOutcome::Deadline => {}
            }

            let (data, len) = self.descriptor.payload.generate();
            let frame = CanFrame {
                id: self.descriptor.id,
                data,
                len,
            };

            match self.sink.send(&frame) {
                Ok(()) => {
                    self.record_send();
                    self.emit(StatusKind::Sent);
                }
                Err(BusError::Rejected) if !self.fatal_rejects => {
                    // Arbitration loss is transient; keep demonstrating
                    // traffic, but the front end still hears about it.
                    warn!("[{}] frame rejected, continuing", self.key);
                    self.record_error(BusError::Rejected);
                    self.emit(StatusKind::Failed(BusError::Rejected));
                }
                Err(err) => {
                    error!("[{}] send failed: {err}", self.key);
                    self.record_error(err);
                    self.emit(StatusKind::Failed(err));
                    self.set_state(TaskState::Failed(err));
                    return;
                }
            }

            next_deadline += period;
        }
    }

    /// Suspends until `deadline`, waking immediately on a stop request.
    ///
    /// A stop can arrive at any point of the sleep and is honored within
    /// `SPIN_WINDOW`; it is never honored mid-send — a send in flight
    /// completes or fails on its own terms.
    fn wait_until(&self, deadline: Instant, sleeper: &SpinSleeper) -> WaitOutcome {
        let coarse_until = deadline.checked_sub(SPIN_WINDOW).unwrap_or(deadline);
        match self.stop_rx.recv_deadline(coarse_until) {
            Ok(()) => return WaitOutcome::Stop,
            // Engine side gone: treat as stop rather than sending into the void.
            Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Stop,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now < deadline {
            sleeper.sleep(deadline - now);
        }

        // A stop may have landed during the spin residual.
        match self.stop_rx.try_recv() {
            Ok(()) => WaitOutcome::Stop,
            Err(TryRecvError::Disconnected) => WaitOutcome::Stop,
            Err(TryRecvError::Empty) => WaitOutcome::Deadline,
        }
    }

    fn record_send(&self) {
        if let Some(mut snap) = self.snapshots.get_mut(&self.key) {
            snap.last_send = Some(Instant::now());
            snap.frames_sent += 1;
        }
    }

    fn record_error(&self, err: BusError) {
        if let Some(mut snap) = self.snapshots.get_mut(&self.key) {
            snap.last_error = Some(err);
        }
    }

    fn set_state(&self, state: TaskState) {
        if let Some(mut snap) = self.snapshots.get_mut(&self.key) {
            snap.state = state.clone();
        }
        self.emit(StatusKind::StateChanged(state));
    }

    fn emit(&self, kind: StatusKind) {
        // Non-blocking: a slow dispatcher must never stall the schedule.
        if self.events.try_send(StatusEvent::now(self.key, kind)).is_err() {
            debug!("[{}] status event dropped (dispatcher backlog)", self.key);
        }
    }
}

/// Spawns the worker at elevated priority, named after its key.
pub(crate) fn spawn_task(task: TxTask) -> JoinHandle<()> {
    let name = format!("tx-{}", task.key);
    thread::Builder::new()
        .name(name)
        .spawn_with_priority(ThreadPriority::Max, move |_| task.run())
        .expect("Failed to spawn transmission task thread")
}
