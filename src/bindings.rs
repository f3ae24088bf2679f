//! C Bindings for shm_comm
//!
//! Provides a raw C API for creating, removing and connecting to channels.
//! Every function returns an integer result code: `0` on success, a
//! negative `SHM_*` error code on failure, or a positive data state from
//! the reader calls.

use crate::channel::{self, ChannelConfig};
use crate::deadline::Deadline;
use crate::error::{Result, ShmError};
use crate::reader::{DataState, Reader};
use crate::writer::Writer;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::time::Duration;

/// Bad argument or call sequence
pub const SHM_INVAL: c_int = -1;
/// Mapping, allocation or lock failure
pub const SHM_FATAL: c_int = -2;
/// Channel regions do not exist
pub const SHM_NO_CHANNEL: c_int = -3;
/// Region sizes disagree with the header
pub const SHM_CHANNEL_INCONSISTENT: c_int = -4;
/// Lock or signal initialisation failed
pub const SHM_ERR_INIT: c_int = -5;
/// Channel or handle could not be created
pub const SHM_ERR_CREATE: c_int = -6;
/// Deadline passed without new data
pub const SHM_TIMEOUT: c_int = -7;

/// Reader got a value it had not seen
pub const SHM_NEWDATA: c_int = 1;
/// Reader got the value it saw last time
pub const SHM_OLDDATA: c_int = 2;
/// Nothing has been published
pub const SHM_NODATA: c_int = 3;

// Opaque handles
pub struct ShmWriterHandle(Writer);
pub struct ShmReaderHandle(Reader);

unsafe fn channel_name<'a>(name: *const c_char) -> Result<&'a str> {
    if name.is_null() {
        return Err(ShmError::InvalidArgument("null channel name".to_string()));
    }
    CStr::from_ptr(name)
        .to_str()
        .map_err(|_| ShmError::InvalidArgument("channel name is not UTF-8".to_string()))
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

unsafe fn hand_out_state(result: Result<DataState<'_>>, buf: *mut *mut c_void) -> c_int {
    match result {
        Ok(DataState::NoData) => {
            *buf = ptr::null_mut();
            SHM_NODATA
        }
        Ok(DataState::OldData(data)) => {
            *buf = data.as_ptr() as *mut c_void;
            SHM_OLDDATA
        }
        Ok(DataState::NewData(data)) => {
            *buf = data.as_ptr() as *mut c_void;
            SHM_NEWDATA
        }
        Err(e) => e.code(),
    }
}

/// Create the regions of a channel with `readers` reader identities and
/// slots of `size` bytes. A non-zero `force` reinitialises existing
/// regions.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn shm_create_channel(
    name: *const c_char,
    size: c_int,
    readers: c_int,
    force: c_int,
) -> c_int {
    if size < 1 || readers < 1 {
        return SHM_INVAL;
    }
    status(channel_name(name).and_then(|name| {
        let config = ChannelConfig::new(size as usize, readers as usize).force(force != 0);
        channel::create_channel(name, &config)
    }))
}

/// Remove the regions of a channel
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn shm_remove_channel(name: *const c_char) -> c_int {
    status(channel_name(name).and_then(channel::remove_channel))
}

/// Connect as the writer of a channel
///
/// # Safety
/// name must be a valid null-terminated string, ret a valid pointer
#[no_mangle]
pub unsafe extern "C" fn shm_connect_writer(
    name: *const c_char,
    ret: *mut *mut ShmWriterHandle,
) -> c_int {
    if ret.is_null() {
        return SHM_INVAL;
    }
    match channel_name(name).and_then(Writer::connect) {
        Ok(writer) => {
            *ret = Box::into_raw(Box::new(ShmWriterHandle(writer)));
            0
        }
        Err(e) => e.code(),
    }
}

/// Destroy a writer handle
///
/// # Safety
/// writer must come from shm_connect_writer and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn shm_release_writer(writer: *mut ShmWriterHandle) -> c_int {
    if writer.is_null() {
        return SHM_INVAL;
    }
    Box::from_raw(writer).0.release();
    0
}

/// Writer: Get the slot to fill next
///
/// # Safety
/// wr must be a live writer handle, buf a valid pointer
#[no_mangle]
pub unsafe extern "C" fn shm_writer_buffer_get(
    wr: *mut ShmWriterHandle,
    buf: *mut *mut c_void,
) -> c_int {
    if wr.is_null() || buf.is_null() {
        return SHM_INVAL;
    }
    match (*wr).0.acquire_write_slot() {
        Ok(slot) => {
            *buf = slot.as_mut_ptr() as *mut c_void;
            0
        }
        Err(e) => e.code(),
    }
}

/// Writer: Publish the slot obtained from shm_writer_buffer_get
///
/// # Safety
/// wr must be a live writer handle
#[no_mangle]
pub unsafe extern "C" fn shm_writer_buffer_write(wr: *mut ShmWriterHandle) -> c_int {
    if wr.is_null() {
        return SHM_INVAL;
    }
    status((*wr).0.publish())
}

/// Writer: Slot size in bytes
///
/// # Safety
/// wr must be a live writer handle
#[no_mangle]
pub unsafe extern "C" fn shm_writer_get_size(wr: *mut ShmWriterHandle) -> c_int {
    if wr.is_null() {
        return SHM_INVAL;
    }
    c_int::try_from((*wr).0.slot_size()).unwrap_or(SHM_INVAL)
}

// --- Reader Side ---

/// Connect as a reader of a channel
///
/// # Safety
/// name must be a valid null-terminated string, ret a valid pointer. The
/// handle must only be used from the connecting thread.
#[no_mangle]
pub unsafe extern "C" fn shm_connect_reader(
    name: *const c_char,
    ret: *mut *mut ShmReaderHandle,
) -> c_int {
    if ret.is_null() {
        return SHM_INVAL;
    }
    match channel_name(name).and_then(Reader::connect) {
        Ok(reader) => {
            *ret = Box::into_raw(Box::new(ShmReaderHandle(reader)));
            0
        }
        Err(e) => e.code(),
    }
}

/// Destroy a reader handle, giving back its identity
///
/// # Safety
/// reader must come from shm_connect_reader on this thread and not be used
/// afterwards
#[no_mangle]
pub unsafe extern "C" fn shm_release_reader(reader: *mut ShmReaderHandle) -> c_int {
    if reader.is_null() {
        return SHM_INVAL;
    }
    status(Box::from_raw(reader).0.release())
}

/// Reader: Look at the latest value without waiting
///
/// # Safety
/// reader must be a live reader handle, buf a valid pointer
#[no_mangle]
pub unsafe extern "C" fn shm_reader_buffer_get(
    reader: *mut ShmReaderHandle,
    buf: *mut *mut c_void,
) -> c_int {
    if reader.is_null() || buf.is_null() {
        return SHM_INVAL;
    }
    hand_out_state((*reader).0.try_get(), buf)
}

/// Reader: Block until unseen data is published
///
/// # Safety
/// reader must be a live reader handle, buf a valid pointer
#[no_mangle]
pub unsafe extern "C" fn shm_reader_buffer_wait(
    reader: *mut ShmReaderHandle,
    buf: *mut *mut c_void,
) -> c_int {
    if reader.is_null() || buf.is_null() {
        return SHM_INVAL;
    }
    hand_out_state((*reader).0.wait(), buf)
}

/// Reader: Like shm_reader_buffer_wait, up to an absolute CLOCK_MONOTONIC
/// deadline
///
/// # Safety
/// reader must be a live reader handle, abstime and buf valid pointers
#[no_mangle]
pub unsafe extern "C" fn shm_reader_buffer_timedwait(
    reader: *mut ShmReaderHandle,
    abstime: *const libc::timespec,
    buf: *mut *mut c_void,
) -> c_int {
    if reader.is_null() || abstime.is_null() || buf.is_null() {
        return SHM_INVAL;
    }
    let ts = &*abstime;
    if ts.tv_sec < 0 || ts.tv_nsec < 0 || ts.tv_nsec >= 1_000_000_000 {
        return SHM_INVAL;
    }
    let deadline = Deadline::from_monotonic(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32));
    hand_out_state((*reader).0.timedwait(deadline), buf)
}
