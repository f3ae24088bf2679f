//! Reader side of a channel: visibility and waiting
//!
//! A reader compares its cursor (the slot it last observed) with the
//! channel's latest slot:
//!
//! - latest is unset: [`DataState::NoData`]
//! - cursor equals latest: [`DataState::OldData`], already seen
//! - otherwise: [`DataState::NewData`], and the cursor advances
//!
//! The slot a reader's cursor points at is never handed to the writer, so
//! the returned slice stays intact until the reader's next call.

use crate::deadline::Deadline;
use crate::error::{Result, ShmError};
use crate::registry;
use crate::shm::Access;
use crate::view::ChannelView;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

/// What a reader found in the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState<'a> {
    /// Nothing has been published
    NoData,
    /// The latest value, already returned to this reader before
    OldData(&'a [u8]),
    /// A value this reader has not seen yet
    NewData(&'a [u8]),
}

impl<'a> DataState<'a> {
    /// Slot contents, if anything was published
    pub fn data(&self) -> Option<&'a [u8]> {
        match *self {
            DataState::NoData => None,
            DataState::OldData(data) | DataState::NewData(data) => Some(data),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, DataState::NewData(_))
    }
}

enum Observed {
    NoData,
    Old(usize),
    New(usize),
}

/// A connected reader holding one of the channel's reader identities
///
/// The identity is a lock owned by the thread that connected, so a
/// `Reader` stays on that thread.
pub struct Reader {
    view: ChannelView,
    id: Option<usize>,
    _not_send: PhantomData<*const ()>,
}

impl Reader {
    /// Connect to an existing channel and reserve a reader identity.
    ///
    /// Fails with [`ShmError::NoReaderSlots`] when every identity is held
    /// by a live reader.
    pub fn connect(name: &str) -> Result<Self> {
        crate::channel::validate_name(name)?;
        let view = ChannelView::open(name, Access::ReadOnly)?;

        let id = registry::claim(&view).map_err(|e| match e {
            ShmError::NoReaderSlots { .. } => e,
            other => ShmError::CreateFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        })?;

        log::debug!("reader {} connected to '{}'", id, name);

        Ok(Self {
            view,
            id: Some(id),
            _not_send: PhantomData,
        })
    }

    /// Name of the channel
    pub fn name(&self) -> &str {
        self.view.name()
    }

    /// Reader identity reserved by this handle
    pub fn id(&self) -> Option<usize> {
        self.id
    }

    /// Size in bytes of every slot
    pub fn slot_size(&self) -> usize {
        self.view.slot_size()
    }

    fn identity(&self) -> Result<usize> {
        self.id.ok_or_else(|| {
            ShmError::corrupted("reader identity", "reader has been released".to_string())
        })
    }

    /// Classify and advance. Caller holds the header lock.
    fn observe(&self, id: usize) -> Result<Observed> {
        let cursor = &self.view.cursors()[id];
        let latest = match self.view.check_index(self.view.header().latest_raw())? {
            Some(latest) => latest,
            None => return Ok(Observed::NoData),
        };
        if self.view.check_index(cursor.load(Ordering::Relaxed))? == Some(latest) {
            Ok(Observed::Old(latest))
        } else {
            cursor.store(latest as i32, Ordering::Relaxed);
            Ok(Observed::New(latest))
        }
    }

    /// Whether the channel moved since this reader last looked.
    /// Caller holds the header lock.
    fn changed(&self, id: usize) -> bool {
        self.view.cursors()[id].load(Ordering::Relaxed) != self.view.header().latest_raw()
    }

    fn state(&self, observed: Observed) -> DataState<'_> {
        match observed {
            Observed::NoData => DataState::NoData,
            Observed::Old(index) => DataState::OldData(self.view.slot(index)),
            Observed::New(index) => DataState::NewData(self.view.slot(index)),
        }
    }

    /// Look at the latest value without waiting
    pub fn try_get(&mut self) -> Result<DataState<'_>> {
        let id = self.identity()?;
        let observed = {
            let _guard = self.view.lock()?;
            self.observe(id)?
        };
        Ok(self.state(observed))
    }

    /// Block until a value this reader has not seen is published.
    ///
    /// Returns immediately if one is already there. Blocks while nothing
    /// has been published at all.
    pub fn wait(&mut self) -> Result<DataState<'_>> {
        let id = self.identity()?;
        let observed = {
            let mut guard = self.view.lock()?;
            while !self.changed(id) {
                self.view
                    .header()
                    .wake
                    .wait(&mut guard)
                    .map_err(|e| ShmError::fatal("wake wait", e))?;
            }
            self.observe(id)?
        };
        Ok(self.state(observed))
    }

    /// Like [`wait`](Self::wait), giving up with [`ShmError::Timeout`] at
    /// `deadline`.
    pub fn timedwait(&mut self, deadline: Deadline) -> Result<DataState<'_>> {
        let id = self.identity()?;
        let observed = {
            let mut guard = self.view.lock()?;
            while !self.changed(id) {
                let timed_out = self
                    .view
                    .header()
                    .wake
                    .wait_until(&mut guard, deadline)
                    .map_err(|e| ShmError::fatal("wake timed wait", e))?;
                if timed_out && !self.changed(id) {
                    return Err(ShmError::Timeout);
                }
            }
            self.observe(id)?
        };
        Ok(self.state(observed))
    }

    fn release_identity(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            registry::release(&self.view, id)?;
            log::debug!("reader {} released from '{}'", id, self.view.name());
        }
        Ok(())
    }

    /// Give back the reader identity and disconnect
    pub fn release(mut self) -> Result<()> {
        self.release_identity()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Err(e) = self.release_identity() {
            log::error!("failed to release reader on '{}': {}", self.view.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_state_accessors() {
        let bytes = [1u8, 2, 3];
        assert_eq!(DataState::NoData.data(), None);
        assert!(!DataState::NoData.is_new());
        assert_eq!(DataState::OldData(&bytes).data(), Some(&bytes[..]));
        assert!(!DataState::OldData(&bytes).is_new());
        assert!(DataState::NewData(&bytes).is_new());
    }
}
