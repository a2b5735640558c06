//! Table configuration shared between the authority and its participants
//!
//! The channel count is not negotiated through the segment; every process
//! must be handed the same [`TableConfig`]. The firmware header that sizes the
//! device's channel array is the usual source of truth.

use crate::error::{ChannelError, Result};
use crate::layout::SlotWidth;
use std::path::Path;

/// Default segment name
pub const DEFAULT_NAME: &str = "default_shared_list";

/// Default channel count (matches the stock firmware)
pub const DEFAULT_CHANNEL_COUNT: usize = 2;

/// Upper bound on the channel count the firmware can address
pub const MAX_CHANNEL_COUNT: usize = 255;

const CHANNEL_MACRO: &str = "NR_OF_CHANNELS";

/// Name and geometry of a channel table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Segment name, without any OS prefix
    pub name: String,
    /// Number of channel slots
    pub channel_count: usize,
    /// Width of each slot
    pub slot_width: SlotWidth,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            channel_count: DEFAULT_CHANNEL_COUNT,
            slot_width: SlotWidth::default(),
        }
    }
}

impl TableConfig {
    /// Default configuration under another segment name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Read the channel count from a firmware header file
    pub fn from_header(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ChannelError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_header_str(&text)
    }

    /// Parse `#define NR_OF_CHANNELS <n>` out of header text
    ///
    /// `n` must satisfy `0 < n <= 255`.
    pub fn from_header_str(text: &str) -> Result<Self> {
        let count = text
            .lines()
            .find_map(|line| {
                let mut tokens = line.split_whitespace();
                match (tokens.next(), tokens.next(), tokens.next()) {
                    (Some("#define"), Some(CHANNEL_MACRO), Some(value)) => Some(value),
                    _ => None,
                }
            })
            .ok_or_else(|| {
                ChannelError::InvalidConfig(format!("no `#define {}` line found", CHANNEL_MACRO))
            })?;

        let channel_count: usize = count.parse().map_err(|_| {
            ChannelError::InvalidConfig(format!("channel count `{}` is not a number", count))
        })?;
        if channel_count == 0 || channel_count > MAX_CHANNEL_COUNT {
            return Err(ChannelError::InvalidConfig(format!(
                "channel count {} outside 1..={}",
                channel_count, MAX_CHANNEL_COUNT
            )));
        }

        Ok(Self {
            channel_count,
            ..Self::default()
        })
    }
}
