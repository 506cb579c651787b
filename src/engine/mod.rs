//! Transmission engine: owns the set of per-message transmission tasks,
//! drives their lifecycle, and fans status events out to subscribers.
//!
//! Ownership model:
//! - The registry is the single serialization point for all mutations
//!   (register/unregister/start/stop); tasks never touch it.
//! - Status snapshots live in a concurrent map so `status()` reads never
//!   block behind a lifecycle operation.
//! - Every task gets its own stop channel and worker thread; one task's
//!   failure or latency cannot delay a sibling.

pub mod status;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::bus::{BusSink, SendGate};
use crate::engine::status::{StatusEvent, StatusKind, TaskState, TaskStatusSnapshot};
use crate::engine::task::{TxTask, spawn_task};
use crate::message::descriptor::{ConfigError, MessageDescriptor, MessageKey};

/// Synchronous engine faults. Bus faults never show up here — they reach the
/// caller through status events, scoped to the failing task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("message key {0} already registered")]
    DuplicateKey(MessageKey),
    #[error("message key {0} not registered")]
    NotFound(MessageKey),
    #[error("message key {0} is disabled")]
    Disabled(MessageKey),
    #[error("message key {0} is still running; stop it before updating")]
    StillRunning(MessageKey),
    #[error("descriptor identifier does not match key {0}")]
    IdentifierMismatch(MessageKey),
}

/// Engine-wide policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Route every send through one exclusive gate. Safe default: most bus
    /// handles are not specified for concurrent writers.
    pub serialize_sends: bool,
    /// Treat `BusError::Rejected` as fatal to the task instead of
    /// logged-and-continue.
    pub fatal_rejects: bool,
    /// Capacity of the internal event channel and of each subscriber
    /// channel. Producers never block; overflow drops the event.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            serialize_sends: true,
            fatal_rejects: false,
            event_capacity: 1024,
        }
    }
}

struct TaskEntry {
    descriptor: Arc<MessageDescriptor>,
    enabled: bool,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

pub struct TransmissionEngine {
    sink: Arc<dyn BusSink>,
    config: EngineConfig,
    registry: Mutex<HashMap<MessageKey, TaskEntry>>,
    snapshots: Arc<DashMap<MessageKey, TaskStatusSnapshot>>,
    events_tx: Sender<StatusEvent>,
    subscribers: Arc<Mutex<Vec<Sender<StatusEvent>>>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TransmissionEngine {
    pub fn new(sink: Arc<dyn BusSink>, config: EngineConfig) -> Self {
        let sink: Arc<dyn BusSink> = if config.serialize_sends {
            Arc::new(SendGate::new(sink))
        } else {
            sink
        };

        let (events_tx, events_rx) = bounded(config.event_capacity);
        let subscribers: Arc<Mutex<Vec<Sender<StatusEvent>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let dispatcher = {
            let subs = subscribers.clone();
            thread::Builder::new()
                .name("status-dispatch".into())
                .spawn(move || dispatch_loop(events_rx, subs))
                .expect("Failed to spawn status dispatcher thread")
        };

        TransmissionEngine {
            sink,
            config,
            registry: Mutex::new(HashMap::new()),
            snapshots: Arc::new(DashMap::new()),
            events_tx,
            subscribers,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn with_defaults(sink: Arc<dyn BusSink>) -> Self {
        Self::new(sink, EngineConfig::default())
    }

    // ========================================================================
    // Registry operations
    // ========================================================================

    /// Adds a managed message. Configuration faults are rejected here, before
    /// a task ever exists; no partial registration.
    pub fn register(&self, descriptor: MessageDescriptor) -> Result<MessageKey, EngineError> {
        descriptor.validate()?;
        let key = descriptor.key();

        let mut registry = self.registry.lock();
        if registry.contains_key(&key) {
            return Err(EngineError::DuplicateKey(key));
        }
        self.snapshots.insert(key, TaskStatusSnapshot::idle());
        registry.insert(
            key,
            TaskEntry {
                enabled: descriptor.enabled,
                descriptor: Arc::new(descriptor),
                stop_tx: None,
                handle: None,
            },
        );
        info!("[engine] registered {key}");
        Ok(key)
    }

    /// Removes a managed message, stopping its task first if running. After
    /// return the key is gone from `status()` and emits no further events.
    pub fn unregister(&self, key: MessageKey) -> Result<(), EngineError> {
        let mut registry = self.registry.lock();
        let mut entry = registry.remove(&key).ok_or(EngineError::NotFound(key))?;
        self.halt_entry(key, &mut entry);
        self.snapshots.remove(&key);
        info!("[engine] unregistered {key}");
        Ok(())
    }

    /// Replaces a stopped message's configuration. Mutation while the task is
    /// running is refused: the running task keeps an immutable descriptor
    /// snapshot for its whole run.
    pub fn update(&self, key: MessageKey, descriptor: MessageDescriptor) -> Result<(), EngineError> {
        descriptor.validate()?;
        if descriptor.key() != key {
            return Err(EngineError::IdentifierMismatch(key));
        }

        let mut registry = self.registry.lock();
        let entry = registry.get_mut(&key).ok_or(EngineError::NotFound(key))?;
        if self.state_of(key).is_some_and(|s| s.is_active()) {
            return Err(EngineError::StillRunning(key));
        }
        if let Some(handle) = entry.handle.take() {
            let _ = handle.join();
        }
        entry.enabled = descriptor.enabled;
        entry.descriptor = Arc::new(descriptor);
        info!("[engine] updated {key}");
        Ok(())
    }

    /// Suspends or resumes eligibility without touching the descriptor.
    /// Disabling a running message stops its task; enabling does not start
    /// one — that stays an explicit `start`/`start_all`.
    pub fn set_enabled(&self, key: MessageKey, enabled: bool) -> Result<(), EngineError> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(&key).ok_or(EngineError::NotFound(key))?;
        entry.enabled = enabled;
        if !enabled {
            self.halt_entry(key, entry);
        }
        Ok(())
    }

    // ========================================================================
    // Task lifecycle
    // ========================================================================

    /// Starts the message's periodic cycle; the first frame goes out
    /// immediately, not after one period. No-op if already running.
    pub fn start(&self, key: MessageKey) -> Result<(), EngineError> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(&key).ok_or(EngineError::NotFound(key))?;
        if !entry.enabled {
            return Err(EngineError::Disabled(key));
        }
        if self.state_of(key).is_some_and(|s| s.is_active()) {
            debug!("[engine] start {key}: already running");
            return Ok(());
        }
        // Reap the worker of a previous run; its state is terminal so the
        // join returns promptly.
        if let Some(handle) = entry.handle.take() {
            let _ = handle.join();
        }

        let (stop_tx, stop_rx) = bounded(1);
        // Publish Running before spawning: the registry lock plus this
        // snapshot are what guarantee at most one worker per key.
        self.update_state(key, TaskState::Running);
        let task = TxTask {
            key,
            descriptor: entry.descriptor.clone(),
            sink: self.sink.clone(),
            stop_rx,
            events: self.events_tx.clone(),
            snapshots: self.snapshots.clone(),
            fatal_rejects: self.config.fatal_rejects,
        };
        entry.stop_tx = Some(stop_tx);
        entry.handle = Some(spawn_task(task));
        info!("[engine] started {key}");
        Ok(())
    }

    /// Cooperatively stops the message's task. A sleeping task wakes
    /// immediately; an in-flight send completes on its own terms, so the
    /// caller blocks for at most one send plus a small constant.
    pub fn stop(&self, key: MessageKey) -> Result<(), EngineError> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(&key).ok_or(EngineError::NotFound(key))?;
        self.halt_entry(key, entry);
        Ok(())
    }

    /// Starts every enabled, not-yet-running message. Tasks are independent:
    /// one message's fault never aborts the others. Returns how many were
    /// started.
    pub fn start_all(&self) -> usize {
        let keys: Vec<MessageKey> = self.registry.lock().keys().copied().collect();
        let mut started = 0;
        for key in keys {
            match self.start(key) {
                Ok(()) => started += 1,
                Err(EngineError::Disabled(_)) => {
                    debug!("[engine] start_all: skipping disabled {key}");
                }
                Err(err) => warn!("[engine] start_all: {key}: {err}"),
            }
        }
        started
    }

    /// Stops every running task. All tasks are signalled before any is
    /// joined, so they wind down concurrently rather than one period at a
    /// time.
    pub fn stop_all(&self) {
        let mut registry = self.registry.lock();
        for (key, entry) in registry.iter_mut() {
            if entry.handle.is_some() {
                if self.state_of(*key) == Some(TaskState::Running) {
                    self.update_state(*key, TaskState::Stopping);
                }
                if let Some(stop_tx) = entry.stop_tx.take() {
                    let _ = stop_tx.try_send(());
                }
            }
        }
        for (key, entry) in registry.iter_mut() {
            if let Some(handle) = entry.handle.take() {
                if handle.join().is_err() {
                    error!("[engine] task thread for {key} panicked");
                }
                if self.state_of(*key) == Some(TaskState::Stopping) {
                    self.update_state(*key, TaskState::Stopped);
                }
            }
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Non-blocking read of one task's current status.
    pub fn status(&self, key: MessageKey) -> Result<TaskStatusSnapshot, EngineError> {
        self.snapshots
            .get(&key)
            .map(|snap| snap.value().clone())
            .ok_or(EngineError::NotFound(key))
    }

    /// Currently registered keys, in no particular order.
    pub fn keys(&self) -> Vec<MessageKey> {
        self.registry.lock().keys().copied().collect()
    }

    /// Current configuration of one registered message.
    pub fn descriptor(&self, key: MessageKey) -> Result<MessageDescriptor, EngineError> {
        self.registry
            .lock()
            .get(&key)
            .map(|entry| (*entry.descriptor).clone())
            .ok_or(EngineError::NotFound(key))
    }

    /// Opens an owned status stream. Events for one key arrive in order;
    /// across keys no order is guaranteed. A subscriber that stops reading
    /// loses events (bounded channel) but never stalls the engine; a dropped
    /// receiver is pruned automatically.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = bounded(self.config.event_capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn state_of(&self, key: MessageKey) -> Option<TaskState> {
        self.snapshots.get(&key).map(|snap| snap.value().state.clone())
    }

    fn update_state(&self, key: MessageKey, state: TaskState) {
        if let Some(mut snap) = self.snapshots.get_mut(&key) {
            snap.state = state.clone();
        }
        self.publish(StatusEvent::now(key, StatusKind::StateChanged(state)));
    }

    fn publish(&self, event: StatusEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("[engine] status event dropped (event channel full)");
        }
    }

    /// Stops one entry's worker if present: publish `Stopping`, wake the
    /// task, join it. Caller holds the registry lock.
    fn halt_entry(&self, key: MessageKey, entry: &mut TaskEntry) {
        if entry.handle.is_none() {
            return;
        }
        if self.state_of(key) == Some(TaskState::Running) {
            self.update_state(key, TaskState::Stopping);
        }
        if let Some(stop_tx) = entry.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = entry.handle.take() {
            if handle.join().is_err() {
                error!("[engine] task thread for {key} panicked");
            }
            // The worker normally publishes Stopped itself; reconcile if it
            // exited through a path that could not (panic, failure race).
            if self.state_of(key) == Some(TaskState::Stopping) {
                self.update_state(key, TaskState::Stopped);
            }
        }
    }
}

impl Drop for TransmissionEngine {
    fn drop(&mut self) {
        self.stop_all();
        // Disconnect the event channel so the dispatcher drains and exits;
        // all task-side clones are gone once stop_all has joined the workers.
        let (detached, _) = bounded(0);
        drop(std::mem::replace(&mut self.events_tx, detached));
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

/// Fan-out loop: one receiver in, every subscriber out. A single forwarding
/// thread keeps per-key event order intact; disconnected subscribers are
/// pruned, lagging ones lose events rather than blocking the stream.
fn dispatch_loop(
    events: Receiver<StatusEvent>,
    subscribers: Arc<Mutex<Vec<Sender<StatusEvent>>>>,
) {
    let mut dropped: u64 = 0;
    while let Ok(event) = events.recv() {
        let mut subs = subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
    debug!("[status-dispatch] exiting ({dropped} events dropped on lagging subscribers)");
}
