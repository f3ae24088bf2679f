//! Process-local view of a connected channel
//!
//! Maps both regions, checks their sizes against what the header declares,
//! and hands out typed accessors for the header, the reader lock and cursor
//! arrays, and individual slots.

use crate::error::{Result, ShmError};
use crate::header::{
    cursors_offset, data_region_size, header_region_size, reader_locks_offset, slot_count,
    ChannelHeader, NO_SLOT,
};
use crate::robust::{RobustGuard, RobustMutex};
use crate::shm::{object_name, Access, ShmObject, ShmRegion, DATA_SUFFIX, HEADER_SUFFIX};
use std::mem::size_of;
use std::sync::atomic::AtomicI32;

pub(crate) struct ChannelView {
    name: String,
    header: ShmRegion,
    data: ShmRegion,
    max_readers: usize,
    slot_size: usize,
}

impl ChannelView {
    /// Map channel `name`. The header region is always mapped read-write
    /// since every participant takes its lock; `data_access` applies to the
    /// slots.
    pub(crate) fn open(name: &str, data_access: Access) -> Result<Self> {
        let header_obj = ShmObject::open(&object_name(name, HEADER_SUFFIX), Access::ReadWrite)?;
        let data_obj = ShmObject::open(&object_name(name, DATA_SUFFIX), data_access)?;

        let header_len = header_obj.len()?;
        if header_len < size_of::<ChannelHeader>() {
            return Err(ShmError::ChannelInconsistent {
                name: name.to_string(),
                region: "header",
                expected: size_of::<ChannelHeader>(),
                actual: header_len,
            });
        }
        let header = header_obj.map(header_len, Access::ReadWrite)?;

        let (max_readers, slot_size) = {
            let hdr = unsafe { &*(header.as_ptr() as *const ChannelHeader) };
            (hdr.max_readers(), hdr.slot_size())
        };
        if max_readers < 1 || slot_size < 1 {
            return Err(ShmError::ChannelInconsistent {
                name: name.to_string(),
                region: "header",
                expected: header_region_size(max_readers.max(1) as usize),
                actual: header_len,
            });
        }
        let max_readers = max_readers as usize;
        let slot_size = slot_size as usize;

        let expected_header = header_region_size(max_readers);
        if expected_header != header_len {
            return Err(ShmError::ChannelInconsistent {
                name: name.to_string(),
                region: "header",
                expected: expected_header,
                actual: header_len,
            });
        }

        let expected_data = data_region_size(slot_size, max_readers);
        let data_len = data_obj.len()?;
        if expected_data != data_len {
            return Err(ShmError::ChannelInconsistent {
                name: name.to_string(),
                region: "data",
                expected: expected_data,
                actual: data_len,
            });
        }
        let data = data_obj.map(expected_data, data_access)?;

        Ok(Self {
            name: name.to_string(),
            header,
            data,
            max_readers,
            slot_size,
        })
    }

    #[inline(always)]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub(crate) fn max_readers(&self) -> usize {
        self.max_readers
    }

    #[inline(always)]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline(always)]
    pub(crate) fn slot_count(&self) -> usize {
        slot_count(self.max_readers)
    }

    #[inline(always)]
    pub(crate) fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.header.as_ptr() as *const ChannelHeader) }
    }

    pub(crate) fn reader_locks(&self) -> &[RobustMutex] {
        unsafe {
            let ptr = self.header.as_ptr().add(reader_locks_offset()) as *const RobustMutex;
            std::slice::from_raw_parts(ptr, self.max_readers)
        }
    }

    pub(crate) fn cursors(&self) -> &[AtomicI32] {
        unsafe {
            let ptr = self.header.as_ptr().add(cursors_offset(self.max_readers)) as *const AtomicI32;
            std::slice::from_raw_parts(ptr, self.max_readers)
        }
    }

    /// Take the header lock
    pub(crate) fn lock(&self) -> Result<RobustGuard<'_>> {
        self.header()
            .lock
            .guard()
            .map_err(|e| ShmError::fatal("header lock", e))
    }

    /// Validate a slot index read from shared memory.
    ///
    /// `NO_SLOT` maps to `None`; anything outside the slot range means the
    /// header has been corrupted.
    pub(crate) fn check_index(&self, raw: i32) -> Result<Option<usize>> {
        if raw == NO_SLOT {
            return Ok(None);
        }
        if raw < 0 || raw as usize >= self.slot_count() {
            return Err(ShmError::corrupted(
                "slot index check",
                format!(
                    "channel '{}' holds slot index {} outside 0..{}",
                    self.name,
                    raw,
                    self.slot_count()
                ),
            ));
        }
        Ok(Some(raw as usize))
    }

    /// Read access to one slot
    pub(crate) fn slot(&self, index: usize) -> &[u8] {
        assert!(index < self.slot_count(), "slot index {} out of range", index);
        unsafe {
            std::slice::from_raw_parts(self.data.as_ptr().add(index * self.slot_size), self.slot_size)
        }
    }

    /// Write access to one slot.
    ///
    /// # Safety
    /// The data region must be mapped read-write, and the caller must be
    /// the writer currently holding `index`: no cursor and no `latest` may
    /// refer to it while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slot_mut(&self, index: usize) -> &mut [u8] {
        assert!(index < self.slot_count(), "slot index {} out of range", index);
        debug_assert_eq!(self.data.access(), Access::ReadWrite);
        std::slice::from_raw_parts_mut(self.data.as_ptr().add(index * self.slot_size), self.slot_size)
    }
}
