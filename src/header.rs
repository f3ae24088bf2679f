//! Channel header layout and region sizing
//!
//! Header region:
//!
//! ```text
//! +----------------+------------------------------+---------------------------+
//! | ChannelHeader  | reader_locks[max_readers]    | reader_cursor[max_readers]|
//! |                | (pthread_mutex_t each)       | (i32 each)                |
//! +----------------+------------------------------+---------------------------+
//! ```
//!
//! Data region: `max_readers + 2` slots of `slot_size` bytes. At most
//! `max_readers + 1` slots are ever pinned (the latest one plus one per
//! reader), which leaves the writer at least one free slot.

use crate::robust::{RobustMutex, SharedCondvar};
use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicI32, Ordering};

/// Sentinel for "no slot": nothing published, or nothing observed
pub const NO_SLOT: i32 = -1;

/// Channel names must be strictly shorter than this
pub const MAX_NAME_LEN: usize = 128;

/// Control block at the start of the header region
#[repr(C)]
pub struct ChannelHeader {
    pub(crate) lock: RobustMutex,
    pub(crate) wake: SharedCondvar,
    pub(crate) latest: AtomicI32,
    max_readers: i32,
    slot_size: u32,
}

impl ChannelHeader {
    /// Initialise a zeroed header region in place.
    ///
    /// # Safety
    /// `base` must point to a writable, suitably aligned mapping of at
    /// least `header_region_size(max_readers)` bytes that nobody else is
    /// using yet.
    pub unsafe fn init(base: *mut u8, slot_size: u32, max_readers: i32) -> io::Result<()> {
        let readers = max_readers as usize;
        std::ptr::write_bytes(base, 0, header_region_size(readers));

        let header = base as *mut ChannelHeader;
        RobustMutex::init(std::ptr::addr_of_mut!((*header).lock), true)?;
        SharedCondvar::init(std::ptr::addr_of_mut!((*header).wake))?;
        (*header).latest = AtomicI32::new(NO_SLOT);
        (*header).max_readers = max_readers;
        (*header).slot_size = slot_size;

        let locks = base.add(reader_locks_offset()) as *mut RobustMutex;
        let cursors = base.add(cursors_offset(readers)) as *mut AtomicI32;
        for i in 0..readers {
            RobustMutex::init(locks.add(i), false)?;
            cursors.add(i).write(AtomicI32::new(NO_SLOT));
        }
        Ok(())
    }

    /// Number of reservable reader identities, as stored
    #[inline(always)]
    pub fn max_readers(&self) -> i32 {
        self.max_readers
    }

    /// Byte size of one slot, as stored
    #[inline(always)]
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Raw value of the latest published slot (`NO_SLOT` if none).
    /// Only meaningful while the header lock is held.
    #[inline(always)]
    pub(crate) fn latest_raw(&self) -> i32 {
        self.latest.load(Ordering::Relaxed)
    }
}

/// Offset of `reader_locks[0]` inside the header region
pub const fn reader_locks_offset() -> usize {
    size_of::<ChannelHeader>()
}

/// Offset of `reader_cursor[0]` inside the header region
pub const fn cursors_offset(max_readers: usize) -> usize {
    reader_locks_offset() + max_readers * size_of::<RobustMutex>()
}

/// Size of the header region for `max_readers` readers
pub const fn header_region_size(max_readers: usize) -> usize {
    size_of::<ChannelHeader>()
        + max_readers * size_of::<RobustMutex>()
        + max_readers * size_of::<i32>()
}

/// Number of slots in the data region
pub const fn slot_count(max_readers: usize) -> usize {
    max_readers + 2
}

/// Size of the data region
pub const fn data_region_size(slot_size: usize, max_readers: usize) -> usize {
    slot_count(max_readers) * slot_size
}

/// Region sizes `(header, data)`, or `None` if either overflows
pub fn checked_region_sizes(slot_size: usize, max_readers: usize) -> Option<(usize, usize)> {
    let per_reader = size_of::<RobustMutex>() + size_of::<i32>();
    let header = max_readers
        .checked_mul(per_reader)?
        .checked_add(size_of::<ChannelHeader>())?;
    let data = max_readers.checked_add(2)?.checked_mul(slot_size)?;
    Some((header, data))
}
