//! shm_comm - Real-time shared memory channels with robust locking
//!
//! This library provides inter-process communication through named shared
//! memory channels with a Single Writer Multiple Readers pattern. Readers
//! always see the most recently published value; there is no queue.
//!
//! # Architecture
//!
//! - **Header region** (`/X_hdr`): robust process-shared lock, monotonic
//!   wake signal, the latest published slot and one identity lock and
//!   cursor per reader
//! - **Data region** (`/X_data`): `max_readers + 2` fixed-size slots, so
//!   the writer always finds one no reader is looking at
//! - **Writer**: fills a free slot in place, then publishes it
//! - **Readers**: get `NewData`/`OldData`/`NoData`, optionally blocking
//!   until something new arrives
//!
//! A process that dies holding a lock or a reader identity does not wedge
//! the channel: the next participant to touch the lock recovers it.
//!
//! # Example
//!
//! ```no_run
//! use shm_comm::{create_channel, ChannelConfig, DataState, Reader, Writer};
//!
//! create_channel("telemetry", &ChannelConfig::new(64, 4))?;
//!
//! let mut writer = Writer::connect("telemetry")?;
//! let mut reader = Reader::connect("telemetry")?;
//!
//! writer.write(b"position 1.0 2.0")?;
//! if let DataState::NewData(bytes) = reader.try_get()? {
//!     assert_eq!(&bytes[..16], b"position 1.0 2.0");
//! }
//! # Ok::<(), shm_comm::ShmError>(())
//! ```

pub mod error;
pub mod shm;
pub mod robust;
pub mod deadline;
pub mod header;
mod view;
pub mod registry;
pub mod channel;
pub mod writer;
pub mod reader;
pub mod bindings;

pub use error::{ShmError, Result};
pub use channel::{create_channel, inspect_channel, remove_channel, ChannelConfig, ChannelSnapshot};
pub use deadline::Deadline;
pub use reader::{DataState, Reader};
pub use registry::{IdentityState, ReaderSlot};
pub use writer::Writer;
