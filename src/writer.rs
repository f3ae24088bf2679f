//! Writer side of a channel: slot allocation and publishing

use crate::error::{Result, ShmError};
use crate::header::NO_SLOT;
use crate::registry::{self, IdentityState};
use crate::shm::Access;
use crate::view::ChannelView;
use std::sync::atomic::Ordering;

/// The single writer of a channel
///
/// The writer fills a slot that no reader can be looking at, then makes it
/// the channel's latest value. Exclusivity of the filled slot comes from
/// the allocation rule alone: while the writer holds index `i`, neither
/// `latest` nor any reader cursor can equal `i`.
pub struct Writer {
    view: ChannelView,
    in_use: Vec<bool>,
    held: Option<usize>,
}

impl Writer {
    /// Connect to an existing channel as its writer.
    ///
    /// Connecting resets the channel's latest slot, so readers see
    /// "no data" until this writer publishes.
    pub fn connect(name: &str) -> Result<Self> {
        crate::channel::validate_name(name)?;
        let view = ChannelView::open(name, Access::ReadWrite)?;

        {
            let _guard = view.lock().map_err(|e| ShmError::CreateFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            view.header().latest.store(NO_SLOT, Ordering::Relaxed);
        }

        log::debug!(
            "writer connected to '{}' ({} slots of {} bytes)",
            name,
            view.slot_count(),
            view.slot_size()
        );

        Ok(Self {
            in_use: vec![false; view.slot_count()],
            view,
            held: None,
        })
    }

    /// Name of the channel
    pub fn name(&self) -> &str {
        self.view.name()
    }

    /// Size in bytes of every slot
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.view.slot_size()
    }

    /// Reader capacity of the channel
    #[inline]
    pub fn max_readers(&self) -> usize {
        self.view.max_readers()
    }

    /// Index of the slot currently held for filling, if any
    #[inline]
    pub fn held_slot(&self) -> Option<usize> {
        self.held
    }

    /// Get a slot to fill with the next value.
    ///
    /// Repeated calls without [`publish`](Self::publish) return the same
    /// slot. The contents are whatever was last written there.
    pub fn acquire_write_slot(&mut self) -> Result<&mut [u8]> {
        let index = match self.held {
            Some(index) => index,
            None => {
                let index = self.find_free_slot()?;
                self.held = Some(index);
                index
            }
        };
        Ok(unsafe { self.view.slot_mut(index) })
    }

    fn find_free_slot(&mut self) -> Result<usize> {
        let _guard = self.view.lock()?;

        self.in_use.fill(false);
        if let Some(latest) = self.view.check_index(self.view.header().latest_raw())? {
            self.in_use[latest] = true;
        }
        for cursor in self.view.cursors() {
            if let Some(index) = self.view.check_index(cursor.load(Ordering::Relaxed))? {
                self.in_use[index] = true;
            }
        }

        self.in_use.iter().position(|used| !used).ok_or_else(|| {
            ShmError::corrupted(
                "slot allocation",
                format!("all {} slots of '{}' are pinned", self.in_use.len(), self.view.name()),
            )
        })
    }

    /// Make the held slot the channel's latest value and wake waiting
    /// readers.
    pub fn publish(&mut self) -> Result<()> {
        let index = self.held.ok_or(ShmError::NoSlotAcquired)?;

        {
            let _guard = self.view.lock()?;
            self.view
                .header()
                .latest
                .store(index as i32, Ordering::Relaxed);
            self.held = None;
        }

        // Broadcast after unlocking so woken readers don't block on us.
        self.view
            .header()
            .wake
            .broadcast()
            .map_err(|e| ShmError::fatal("wake broadcast", e))
    }

    /// Copy `data` into a fresh slot and publish it.
    ///
    /// `data` may be shorter than a slot; the rest of the slot keeps its
    /// previous contents.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let slot_size = self.slot_size();
        if data.len() > slot_size {
            return Err(ShmError::InvalidArgument(format!(
                "payload of {} bytes exceeds slot size {}",
                data.len(),
                slot_size
            )));
        }
        self.acquire_write_slot()?[..data.len()].copy_from_slice(data);
        self.publish()
    }

    /// Recover reader identities whose holders died, releasing the slots
    /// their last cursors pinned. Returns how many were reclaimed.
    ///
    /// A dead reader's cursor otherwise stays pinned until a new reader
    /// happens to claim the same identity.
    pub fn reclaim_dead_readers(&mut self) -> Result<usize> {
        let reclaimed = registry::survey(&self.view)?
            .iter()
            .filter(|slot| slot.state == IdentityState::Reclaimed)
            .count();
        Ok(reclaimed)
    }

    /// Disconnect. Dropping the writer has the same effect.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        log::debug!("writer disconnected from '{}'", self.view.name());
    }
}
