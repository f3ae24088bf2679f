//! Reader identity registration
//!
//! Each channel has `max_readers` identity locks. A reader owns identity
//! `i` for as long as it holds `reader_locks[i]`; the locks are never used
//! to protect anything, only as an allocation bitmap that the OS clears for
//! us when a holder dies.

use crate::error::{Result, ShmError};
use crate::header::NO_SLOT;
use crate::robust::LockOutcome;
use crate::view::ChannelView;
use std::sync::atomic::Ordering;

/// State of one reader identity as seen by [`survey`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Not reserved by any reader
    Free,
    /// Reserved by a live reader
    Held,
    /// Its holder had died; the identity was recovered and freed
    Reclaimed,
}

/// One reader identity in a channel snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSlot {
    pub index: usize,
    pub state: IdentityState,
    /// Slot the identity last observed, before any reclaim reset it
    pub cursor: Option<usize>,
}

/// Reserve the first free identity, recovering ones whose holder died.
pub(crate) fn claim(view: &ChannelView) -> Result<usize> {
    let _guard = view.lock()?;

    for (index, lock) in view.reader_locks().iter().enumerate() {
        let outcome = lock
            .try_lock()
            .map_err(|e| ShmError::fatal("reader identity trylock", e))?;
        match outcome {
            LockOutcome::Busy => continue,
            LockOutcome::Recovered => {
                log::warn!(
                    "channel '{}': reclaimed reader identity {} from a dead reader",
                    view.name(),
                    index
                );
            }
            LockOutcome::Acquired => {}
        }
        view.cursors()[index].store(NO_SLOT, Ordering::Relaxed);
        return Ok(index);
    }

    Err(ShmError::NoReaderSlots {
        name: view.name().to_string(),
        max_readers: view.max_readers(),
    })
}

/// Give back an identity obtained from [`claim`] on the same thread.
pub(crate) fn release(view: &ChannelView, index: usize) -> Result<()> {
    let _guard = view.lock()?;
    view.reader_locks()[index]
        .unlock()
        .map_err(|e| ShmError::fatal("reader identity unlock", e))?;
    view.cursors()[index].store(NO_SLOT, Ordering::Relaxed);
    Ok(())
}

/// Probe every identity under the header lock.
///
/// Identities whose holder died are recovered, released and have their
/// cursor reset, so the writer no longer treats their last slot as pinned.
pub(crate) fn survey(view: &ChannelView) -> Result<Vec<ReaderSlot>> {
    let _guard = view.lock()?;
    let mut slots = Vec::with_capacity(view.max_readers());

    for (index, lock) in view.reader_locks().iter().enumerate() {
        let cursor_raw = view.cursors()[index].load(Ordering::Relaxed);
        let cursor = view.check_index(cursor_raw)?;

        let outcome = lock
            .try_lock()
            .map_err(|e| ShmError::fatal("reader identity trylock", e))?;
        let state = match outcome {
            LockOutcome::Busy => IdentityState::Held,
            LockOutcome::Acquired => {
                lock.unlock()
                    .map_err(|e| ShmError::fatal("reader identity unlock", e))?;
                IdentityState::Free
            }
            LockOutcome::Recovered => {
                lock.unlock()
                    .map_err(|e| ShmError::fatal("reader identity unlock", e))?;
                view.cursors()[index].store(NO_SLOT, Ordering::Relaxed);
                log::warn!(
                    "channel '{}': reclaimed reader identity {} (cursor {:?}) from a dead reader",
                    view.name(),
                    index,
                    cursor
                );
                IdentityState::Reclaimed
            }
        };

        slots.push(ReaderSlot {
            index,
            state,
            cursor,
        });
    }

    Ok(slots)
}
