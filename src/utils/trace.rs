//! trace.rs
//! CSV export of a status stream: a background consumer drains one engine
//! subscription into a file, one row per event.
//!
//! Writes are batched and flushed periodically to keep syscall jitter away
//! from the transmitting threads; the consumer performs a final drain when
//! the stream disconnects (engine shut down).

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use csv::Writer;
use log::{debug, error};
use serde::Serialize;

use crate::engine::status::{StatusEvent, StatusKind};

const POLL: Duration = Duration::from_millis(50);
// Rows between flushes; bounds both data loss on crash and flush frequency.
const FLUSH_EVERY: u64 = 64;

#[derive(Debug, Serialize)]
struct TraceRow {
    seq: u64,
    ts_epoch_us: u64,
    age_us: u64,
    key: String,
    event: String,
    detail: String,
}

fn to_row(seq: u64, event: &StatusEvent) -> TraceRow {
    let ts_epoch_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let age_us = event.timestamp.elapsed().as_micros() as u64;
    let (label, detail) = match &event.kind {
        StatusKind::Sent => ("sent", String::new()),
        StatusKind::Failed(err) => ("failed", err.to_string()),
        StatusKind::StateChanged(state) => ("state", state.name().to_string()),
    };
    TraceRow {
        seq,
        ts_epoch_us,
        age_us,
        key: event.key.to_string(),
        event: label.to_string(),
        detail,
    }
}

/// Spawns the consumer thread. It exits when the subscription disconnects,
/// i.e. when the engine that produced it is dropped.
pub fn spawn_trace_writer(events: Receiver<StatusEvent>, output_csv: PathBuf) -> JoinHandle<()> {
    thread::Builder::new()
        .name("status-trace".into())
        .spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("[trace] failed to create {output_csv:?}: {e}");
                    return;
                }
            };
            let mut wtr = Writer::from_writer(BufWriter::new(file));
            let mut seq: u64 = 1;

            loop {
                match events.recv_timeout(POLL) {
                    Ok(event) => {
                        if wtr.serialize(to_row(seq, &event)).is_err() {
                            error!("[trace] write failed, stopping trace");
                            return;
                        }
                        if seq % FLUSH_EVERY == 0 {
                            wtr.flush().ok();
                        }
                        seq += 1;
                    }
                    // Idle: push what we have to disk.
                    Err(RecvTimeoutError::Timeout) => {
                        wtr.flush().ok();
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            wtr.flush().ok();
            debug!("[trace] exiting after {} rows", seq - 1);
        })
        .expect("Failed to spawn status trace thread")
}
