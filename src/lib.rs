//! SharedChannels - cross-process setpoint table in shared memory
//!
//! One process (the authority, typically the hardware forwarder) creates a
//! small table of integer channels in a POSIX shared memory segment. Any
//! number of unrelated processes attach to it by name and read or write
//! individual channels directly, without going through the authority.
//!
//! # Architecture
//!
//! - **Authority**: creates and initializes the segment, owns its name, and
//!   marks it dead on shutdown
//! - **Participants**: attach by name, counted in the segment's client count
//! - **Channels**: per-slot views that clamp (and optionally rescale) writes
//!
//! Slots are "last write wins" registers. There is no locking: each channel is
//! expected to have a single logical writer.
//!
//! ```no_run
//! use shared_channels::{Channel, ChannelSpec, Role, Table, TableConfig};
//!
//! let config = TableConfig::default();
//! let authority = Table::open_with(&config, Role::Authority, true)?;
//!
//! // In another process
//! let channel = Channel::connect(&config, 0, ChannelSpec::default().normalized(0.0, 100.0))?;
//! channel.write(50)?;
//!
//! assert_eq!(authority.read_slot(0)?, 2047);
//! # Ok::<(), shared_channels::ChannelError>(())
//! ```

pub mod error;
pub mod shm;
pub mod layout;
pub mod table;
pub mod channel;
pub mod config;
pub mod bindings;

pub use error::{ChannelError, Result};
pub use layout::{Layout, SlotWidth};
pub use table::{Role, Table};
pub use channel::{Channel, ChannelSpec, Normalize};
pub use config::TableConfig;
pub use shm::unlink_registered;
