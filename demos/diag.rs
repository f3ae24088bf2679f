//! Channel Diagnostics
//!
//! Checks a channel's consistency and prints its header state: latest
//! slot, reader identities and their cursors. Identities left behind by
//! dead readers are reclaimed along the way.
//!
//! Usage: diag <channel>

use shm_comm::inspect_channel;

fn main() {
    let name = match std::env::args().nth(1) {
        Some(name) => name,
        None => {
            println!("usage: diag <channel>");
            return;
        }
    };

    match inspect_channel(&name) {
        Ok(snapshot) => {
            print!("{}", snapshot);
            println!("live readers: {}", snapshot.live_readers());
        }
        Err(e) => {
            eprintln!("[Diag] {}", e);
            std::process::exit(e.code().abs());
        }
    }
}
