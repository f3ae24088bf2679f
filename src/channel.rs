//! Channel lifecycle: create, remove, inspect
//!
//! Creation lays out and initialises both regions and then unmaps them
//! again; it does not keep the channel open. Writers and readers connect
//! independently through [`crate::Writer::connect`] and
//! [`crate::Reader::connect`].

use crate::error::{Result, ShmError};
use crate::header::{checked_region_sizes, ChannelHeader, MAX_NAME_LEN};
use crate::registry::{self, IdentityState, ReaderSlot};
use crate::shm::{self, object_name, Access, ShmObject, ShmRegion, DATA_SUFFIX, HEADER_SUFFIX};
use crate::view::ChannelView;
use std::fmt;

/// Default slot size (4KB)
const DEFAULT_SLOT_SIZE: usize = 4 * 1024;

/// Default number of reader identities
const DEFAULT_MAX_READERS: usize = 8;

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Size of one data slot in bytes
    pub slot_size: usize,
    /// Maximum number of simultaneously connected readers
    pub max_readers: usize,
    /// Reuse (and reinitialise) regions that already exist
    pub force: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            slot_size: DEFAULT_SLOT_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            force: false,
        }
    }
}

impl ChannelConfig {
    pub fn new(slot_size: usize, max_readers: usize) -> Self {
        Self {
            slot_size,
            max_readers,
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Byte size of the header region this configuration produces
    pub fn header_region_size(&self) -> usize {
        crate::header::header_region_size(self.max_readers)
    }

    /// Byte size of the data region this configuration produces
    pub fn data_region_size(&self) -> usize {
        crate::header::data_region_size(self.slot_size, self.max_readers)
    }

    fn validate(&self) -> Result<(usize, usize)> {
        if self.slot_size < 1 || self.slot_size > i32::MAX as usize {
            return Err(ShmError::InvalidArgument(format!(
                "slot size {} out of range 1..={}",
                self.slot_size,
                i32::MAX
            )));
        }
        if self.max_readers < 1 || self.max_readers > i32::MAX as usize - 2 {
            return Err(ShmError::InvalidArgument(format!(
                "reader capacity {} out of range",
                self.max_readers
            )));
        }
        checked_region_sizes(self.slot_size, self.max_readers).ok_or_else(|| {
            ShmError::InvalidArgument(format!(
                "{} readers of {} byte slots overflow the address space",
                self.max_readers, self.slot_size
            ))
        })
    }
}

/// Check a channel name: non-empty, shorter than [`MAX_NAME_LEN`], at most
/// one leading '/', no NUL bytes.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= MAX_NAME_LEN {
        return Err(ShmError::InvalidArgument(format!(
            "channel name length {} out of range 1..{}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    let body = name.strip_prefix('/').unwrap_or(name);
    if body.is_empty() || body.contains('/') || body.contains('\0') {
        return Err(ShmError::InvalidArgument(format!(
            "invalid channel name '{}'",
            name.escape_default()
        )));
    }
    Ok(())
}

/// Create (or with `force`, reuse) one region and map it. Returns whether
/// this call created the object; only a created object is unlinked again
/// on failure.
fn create_region(name: &str, len: usize, force: bool) -> Result<(ShmRegion, bool)> {
    let (obj, created) = match ShmObject::create(name, true) {
        Ok(obj) => (obj, true),
        Err(ShmError::ChannelExists { .. }) if force => (ShmObject::create(name, false)?, false),
        Err(e) => return Err(e),
    };
    match obj.set_len(len).and_then(|()| obj.map(len, Access::ReadWrite)) {
        Ok(region) => Ok((region, created)),
        Err(e) => {
            if created {
                let _ = shm::unlink(name);
            }
            Err(e)
        }
    }
}

/// Create the shared memory backing for channel `name`.
///
/// Fails with [`ShmError::ChannelExists`] if either region already exists,
/// unless `config.force` is set. Forcing reinitialises the channel in
/// place; participants still connected to it are left with undefined
/// contents.
pub fn create_channel(name: &str, config: &ChannelConfig) -> Result<()> {
    validate_name(name)?;
    let (header_len, data_len) = config.validate()?;

    let header_name = object_name(name, HEADER_SUFFIX);
    let data_name = object_name(name, DATA_SUFFIX);

    let (header, header_created) = create_region(&header_name, header_len, config.force)?;
    let (data, data_created) = match create_region(&data_name, data_len, config.force) {
        Ok(region) => region,
        Err(e) => {
            drop(header);
            if header_created {
                let _ = shm::unlink(&header_name);
            }
            return Err(e);
        }
    };

    unsafe {
        std::ptr::write_bytes(data.as_ptr(), 0, data_len);
        if let Err(source) =
            ChannelHeader::init(header.as_ptr(), config.slot_size as u32, config.max_readers as i32)
        {
            drop(header);
            drop(data);
            if header_created {
                let _ = shm::unlink(&header_name);
            }
            if data_created {
                let _ = shm::unlink(&data_name);
            }
            return Err(ShmError::InitializationFailed {
                name: name.to_string(),
                source,
            });
        }
    }

    log::debug!(
        "created channel '{}': {} readers, {} byte slots (header {} bytes, data {} bytes)",
        name,
        config.max_readers,
        config.slot_size,
        header_len,
        data_len
    );
    Ok(())
}

/// Unlink both regions of channel `name`.
///
/// Removing a channel that does not exist is not an error. Processes that
/// still have the channel mapped keep their mappings.
pub fn remove_channel(name: &str) -> Result<()> {
    validate_name(name)?;
    let removed_data = shm::unlink(&object_name(name, DATA_SUFFIX))?;
    let removed_header = shm::unlink(&object_name(name, HEADER_SUFFIX))?;
    if removed_data || removed_header {
        log::debug!("removed channel '{}'", name);
    }
    Ok(())
}

/// Point-in-time view of a channel's header state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub name: String,
    pub slot_size: usize,
    pub max_readers: usize,
    /// Most recently published slot
    pub latest: Option<usize>,
    pub readers: Vec<ReaderSlot>,
}

impl ChannelSnapshot {
    /// Number of identities currently held by live readers
    pub fn live_readers(&self) -> usize {
        self.readers
            .iter()
            .filter(|r| r.state == IdentityState::Held)
            .count()
    }
}

impl fmt::Display for ChannelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "channel:     {}", self.name)?;
        writeln!(f, "slot size:   {}", self.slot_size)?;
        writeln!(f, "max readers: {}", self.max_readers)?;
        match self.latest {
            Some(latest) => writeln!(f, "latest:      {}", latest)?,
            None => writeln!(f, "latest:      none")?,
        }
        for reader in &self.readers {
            let state = match reader.state {
                IdentityState::Free => "free",
                IdentityState::Held => "held",
                IdentityState::Reclaimed => "reclaimed (owner dead)",
            };
            match reader.cursor {
                Some(cursor) => writeln!(f, "reader[{}]:   {}, cursor {}", reader.index, state, cursor)?,
                None => writeln!(f, "reader[{}]:   {}, cursor none", reader.index, state)?,
            }
        }
        Ok(())
    }
}

/// Open channel `name`, check its consistency and report its header state.
///
/// Reader identities left behind by dead readers are reclaimed as a side
/// effect.
pub fn inspect_channel(name: &str) -> Result<ChannelSnapshot> {
    validate_name(name)?;
    let view = ChannelView::open(name, Access::ReadOnly)?;

    let latest = {
        let _guard = view.lock()?;
        view.check_index(view.header().latest_raw())?
    };
    let readers = registry::survey(&view)?;

    Ok(ChannelSnapshot {
        name: name.to_string(),
        slot_size: view.slot_size(),
        max_readers: view.max_readers(),
        latest,
        readers,
    })
}
