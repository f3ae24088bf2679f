//! Absolute deadlines on the monotonic clock
//!
//! Timed waits on the channel's wake signal take an absolute point in
//! `CLOCK_MONOTONIC` time, so wall-clock adjustments never shorten or
//! stretch a wait.

use rustix::time::{clock_gettime, ClockId};
use std::ops::Add;
use std::time::Duration;

/// A point in time on `CLOCK_MONOTONIC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Duration);

impl Deadline {
    /// The current monotonic time
    pub fn now() -> Self {
        let ts = clock_gettime(ClockId::Monotonic);
        Deadline(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
    }

    /// A deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self::now() + timeout
    }

    /// A deadline at an absolute monotonic time, e.g. one computed by
    /// another process from its own `clock_gettime(CLOCK_MONOTONIC)`.
    pub fn from_monotonic(since_boot: Duration) -> Self {
        Deadline(since_boot)
    }

    /// Offset of this deadline from the monotonic clock's origin
    pub fn as_monotonic(&self) -> Duration {
        self.0
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.0.saturating_sub(Self::now().0)
    }

    pub fn has_elapsed(&self) -> bool {
        Self::now() >= *self
    }

    pub(crate) fn as_timespec(&self) -> libc::timespec {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        ts.tv_sec = self.0.as_secs().min(libc::time_t::MAX as u64) as libc::time_t;
        ts.tv_nsec = self.0.subsec_nanos() as libc::c_long;
        ts
    }
}

impl Add<Duration> for Deadline {
    type Output = Deadline;

    fn add(self, rhs: Duration) -> Deadline {
        Deadline(self.0.saturating_add(rhs))
    }
}
