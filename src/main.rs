//! # CAN Message Simulator Entry Point
//! Interactive demo driving the transmission engine against a virtual bus.
//!
//! ## Modes
//! - **Preset run:** four message rows (0x100, 0x110, 0x120, 0x130) with
//!   mixed fixed/random payloads and independent periods.
//! - **Stress run:** 16 random-payload messages at fast periods.
//!
//! ## Outputs
//! - `data/logs/can_trace.csv` — status trace (sends, failures, transitions).
//! - Live log lines per state change; per-frame noise behind `RUST_LOG=debug`.

use std::fs::create_dir_all;
use std::io::{Write, stdin, stdout};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use can_sim::bus::virtual_bus::VirtualBus;
use can_sim::engine::TransmissionEngine;
use can_sim::engine::status::StatusKind;
use can_sim::message::descriptor::MessageDescriptor;
use can_sim::message::frame::CanId;
use can_sim::message::payload::PayloadMode;
use can_sim::utils::trace::spawn_trace_writer;

const DEFAULT_RUN_SECS: u64 = 10;
const STRESS_MESSAGES: u32 = 16;
const RECORD_CAPACITY: usize = 8192;

fn main() {
    env_logger::init();
    info!("=== CAN MESSAGE SIMULATOR START ===");

    loop {
        let choice = prompt_menu();
        match choice.as_str() {
            "1" | "" => {
                let secs = prompt_secs();
                run_preset(secs);
                println!("\n Run completed. Returning to menu...\n");
            }
            "2" => {
                let secs = prompt_secs();
                run_stress(secs);
                println!("\n Stress run completed. Returning to menu...\n");
            }
            "3" => {
                println!("Exiting. Goodbye!");
                info!("=== CAN MESSAGE SIMULATOR FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT SIMULATION MODE                  │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Preset message rows (default)           │");
    println!("│  2) Stress run ({} fast messages)           │", STRESS_MESSAGES);
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_secs() -> u64 {
    print!("Run duration in seconds [default: {}]: ", DEFAULT_RUN_SECS);
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().parse::<u64>().unwrap_or(DEFAULT_RUN_SECS)
}

/// The original tool's four rows: arbitration ids from 0x100 stepping 0x10,
/// random payloads on by default. Periods are spread so the head-of-line
/// independence is visible in the trace.
fn preset_rows() -> Vec<MessageDescriptor> {
    vec![
        MessageDescriptor {
            id: CanId::Standard(0x100),
            payload: PayloadMode::Fixed(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]),
            period: Duration::from_millis(250),
            enabled: true,
        },
        MessageDescriptor {
            id: CanId::Standard(0x110),
            payload: PayloadMode::Random { len: 8 },
            period: Duration::from_millis(100),
            enabled: true,
        },
        MessageDescriptor {
            id: CanId::Standard(0x120),
            payload: PayloadMode::Fixed(vec![0xDE, 0xAD]),
            period: Duration::from_millis(500),
            enabled: true,
        },
        MessageDescriptor {
            id: CanId::Standard(0x130),
            payload: PayloadMode::Random { len: 4 },
            period: Duration::from_secs(1),
            enabled: true,
        },
    ]
}

fn run_preset(secs: u64) {
    run_simulation(preset_rows(), secs);
}

fn run_stress(secs: u64) {
    let rows: Vec<MessageDescriptor> = (0..STRESS_MESSAGES)
        .map(|i| MessageDescriptor {
            id: CanId::Standard(0x200 + i as u16),
            payload: PayloadMode::Random { len: 8 },
            period: Duration::from_millis(20 + 10 * i as u64),
            enabled: true,
        })
        .collect();
    run_simulation(rows, secs);
}

fn run_simulation(rows: Vec<MessageDescriptor>, secs: u64) {
    let bus = Arc::new(VirtualBus::new(RECORD_CAPACITY));
    let engine = TransmissionEngine::with_defaults(bus.clone());

    // Status trace to CSV, over the same subscription contract a UI would use.
    if let Err(e) = create_dir_all("data/logs") {
        error!("Failed to create data/logs: {e}");
        return;
    }
    let trace_handle = spawn_trace_writer(engine.subscribe(), "data/logs/can_trace.csv".into());

    // Second subscriber: live console feedback.
    let console_rx = engine.subscribe();
    let console_handle = thread::spawn(move || {
        for event in console_rx.iter() {
            match event.kind {
                StatusKind::StateChanged(state) => {
                    info!("[{}] -> {}", event.key, state.name());
                }
                StatusKind::Failed(err) => warn!("[{}] send failed: {err}", event.key),
                StatusKind::Sent => log::debug!("[{}] frame sent", event.key),
            }
        }
    });

    for row in rows {
        match engine.register(row) {
            Ok(key) => info!("registered message {key}"),
            Err(err) => error!("registration rejected: {err}"),
        }
    }

    let started = engine.start_all();
    info!("running {started} messages for {secs} seconds...");
    thread::sleep(Duration::from_secs(secs));

    engine.stop_all();

    let mut keys = engine.keys();
    keys.sort_by_key(|k| k.0.raw());
    println!("\n  message   state     frames sent");
    for key in keys {
        if let Ok(snap) = engine.status(key) {
            println!(
                "  {:<9} {:<9} {}",
                key.to_string(),
                snap.state.name(),
                snap.frames_sent
            );
        }
    }
    println!(
        "\n  bus total: {} frames ({} recordings lost to overflow)",
        bus.sent_count(),
        bus.overflow_count()
    );

    // Dropping the engine disconnects both subscribers.
    drop(engine);
    let _ = console_handle.join();
    let _ = trace_handle.join();
    info!("trace exported to data/logs/can_trace.csv");
}
