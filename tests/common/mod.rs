use std::sync::atomic::{AtomicUsize, Ordering};

use shm_comm::{create_channel, remove_channel, ChannelConfig};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("shm_comm_test_{}_{tag}_{n}", std::process::id())
}

/// Removes the channel when dropped, so a failed assertion doesn't leak
/// regions into /dev/shm.
pub struct TestChannel {
    pub name: String,
}

impl TestChannel {
    pub fn create(tag: &str, slot_size: usize, max_readers: usize) -> Self {
        let name = unique_name(tag);
        create_channel(&name, &ChannelConfig::new(slot_size, max_readers)).expect("create channel");
        Self { name }
    }
}

impl Drop for TestChannel {
    fn drop(&mut self) {
        let _ = remove_channel(&self.name);
    }
}
