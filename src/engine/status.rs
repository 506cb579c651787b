//! status.rs
//! Task lifecycle states, non-blocking status snapshots, and the event
//! stream pushed to subscribers (the UI collaborator's ground truth).

use std::time::Instant;

use crate::bus::BusError;
use crate::message::descriptor::MessageKey;

/// Transmission task lifecycle.
///
/// `Failed` and `Stopped` are terminal until `start()` re-enters `Running`
/// with a fresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Failed(BusError),
}

impl TaskState {
    /// True while a worker thread may still be sending for this key.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Stopping)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Stopped => "stopped",
            TaskState::Failed(_) => "failed",
        }
    }
}

/// What happened, pushed once per send attempt or state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    /// One frame accepted by the bus sink.
    Sent,
    /// A send attempt failed. Not necessarily a state change: rejected
    /// frames are reported here while the task keeps running.
    Failed(BusError),
    StateChanged(TaskState),
}

/// One entry of the status stream. Events for the same key are delivered in
/// order; no ordering is guaranteed across keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: MessageKey,
    pub timestamp: Instant,
    pub kind: StatusKind,
}

impl StatusEvent {
    pub fn now(key: MessageKey, kind: StatusKind) -> Self {
        StatusEvent {
            key,
            timestamp: Instant::now(),
            kind,
        }
    }
}

/// Non-blocking read of one task's current state, kept current by the task
/// itself and by the engine's start/stop paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusSnapshot {
    pub state: TaskState,
    pub last_send: Option<Instant>,
    pub last_error: Option<BusError>,
    pub frames_sent: u64,
}

impl TaskStatusSnapshot {
    pub fn idle() -> Self {
        TaskStatusSnapshot {
            state: TaskState::Idle,
            last_send: None,
            last_error: None,
            frames_sent: 0,
        }
    }
}
