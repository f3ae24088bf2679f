//! Example Reader
//!
//! Connects to a channel and prints every new value the writer demo
//! publishes.
//!
//! Usage: reader [channel] [timeout_ms]

use shm_comm::{DataState, Deadline, Reader, ShmError};
use std::time::Duration;

fn main() {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "shm_comm_demo".to_string());
    let timeout = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1));

    println!("[Reader] Connecting to: {}", name);

    let mut reader = match Reader::connect(&name) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[Reader] Failed to connect: {}", e);
            eprintln!("[Reader] Make sure the writer has created the channel first!");
            std::process::exit(1);
        }
    };

    if reader.slot_size() < 16 {
        eprintln!(
            "[Reader] Slot size {} is too small, need at least 16 bytes",
            reader.slot_size()
        );
        std::process::exit(1);
    }

    if let Some(id) = reader.id() {
        println!("[Reader] Connected! Reader ID: {}", id);
    }

    let mut seen = 0u64;
    loop {
        match reader.timedwait(Deadline::after(timeout)) {
            Ok(DataState::NewData(data)) => {
                let counter = u64::from_le_bytes(data[..8].try_into().unwrap_or([0; 8]));
                let micros = u64::from_le_bytes(data[8..16].try_into().unwrap_or([0; 8]));
                seen += 1;
                println!(
                    "[Reader] #{} at {:.3}s (received {})",
                    counter,
                    micros as f64 / 1e6,
                    seen
                );
            }
            Ok(DataState::OldData(_)) | Ok(DataState::NoData) => {}
            Err(ShmError::Timeout) => println!("[Reader] Nothing new for {:?}", timeout),
            Err(e) => {
                eprintln!("[Reader] Read failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
