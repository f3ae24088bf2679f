//! Example Writer
//!
//! Creates a channel (if needed) and publishes a counter and timestamp
//! at a fixed rate.
//!
//! Usage: writer [channel] [interval_ms]

use shm_comm::{create_channel, ChannelConfig, ShmError, Writer};
use std::time::{Duration, Instant};

fn main() {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "shm_comm_demo".to_string());
    let interval = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(100));

    println!("[Writer] Channel: {}", name);

    match create_channel(&name, &ChannelConfig::new(64, 8)) {
        Ok(()) => println!("[Writer] Channel created"),
        Err(ShmError::ChannelExists { .. }) => println!("[Writer] Reusing existing channel"),
        Err(e) => {
            eprintln!("[Writer] Failed to create channel: {}", e);
            std::process::exit(1);
        }
    }

    let mut writer = match Writer::connect(&name) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("[Writer] Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    if writer.slot_size() < 16 {
        eprintln!(
            "[Writer] Slot size {} is too small, need at least 16 bytes",
            writer.slot_size()
        );
        std::process::exit(1);
    }

    println!("[Writer] Publishing every {:?} (Ctrl+C to quit)", interval);

    let start = Instant::now();
    for counter in 0u64.. {
        let elapsed = start.elapsed().as_micros() as u64;
        let slot = match writer.acquire_write_slot() {
            Ok(slot) => slot,
            Err(e) => {
                eprintln!("[Writer] Acquire failed: {}", e);
                std::process::exit(1);
            }
        };
        slot[..8].copy_from_slice(&counter.to_le_bytes());
        slot[8..16].copy_from_slice(&elapsed.to_le_bytes());

        if let Err(e) = writer.publish() {
            eprintln!("[Writer] Publish failed: {}", e);
            std::process::exit(1);
        }
        if counter % 10 == 0 {
            println!("[Writer] Published #{}", counter);
        }
        std::thread::sleep(interval);
    }
}
