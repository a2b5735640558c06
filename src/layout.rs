//! Binary layout of a channel table segment
//!
//! ```text
//! offset 0 : liveness       1 byte   i8   (1 = authority up, 0 = torn down)
//! offset 1 : client_count   4 bytes  i32  little-endian
//! offset 5 : channels[0..N) N * slot_width bytes, little-endian
//! ```
//!
//! The fields are packed, so `client_count` and wider slots are unaligned.
//! Every field is still read and written as one whole value of its width;
//! nothing here splits a value into per-byte writes. Every slot width goes
//! through the same unaligned load/store between compiler fences.
//!
//! `N` and the slot width are agreed out of band (see [`crate::config`]);
//! the layout carries no version or size negotiation of its own.

use crate::error::{ChannelError, Result};
use std::ptr;
use std::sync::atomic::{compiler_fence, AtomicI8, Ordering};

pub const LIVENESS_OFFSET: usize = 0;
pub const CLIENT_COUNT_OFFSET: usize = 1;
pub const CHANNELS_OFFSET: usize = 5;

pub const AUTHORITY_UP: i8 = 1;
pub const AUTHORITY_DOWN: i8 = 0;

/// Width of one channel slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotWidth {
    I8,
    #[default]
    I16,
    I32,
}

impl SlotWidth {
    /// Bytes per slot
    #[inline(always)]
    pub const fn bytes(self) -> usize {
        match self {
            SlotWidth::I8 => 1,
            SlotWidth::I16 => 2,
            SlotWidth::I32 => 4,
        }
    }

    /// Inclusive range of values a slot can hold
    pub const fn range(self) -> (i32, i32) {
        match self {
            SlotWidth::I8 => (i8::MIN as i32, i8::MAX as i32),
            SlotWidth::I16 => (i16::MIN as i32, i16::MAX as i32),
            SlotWidth::I32 => (i32::MIN, i32::MAX),
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(SlotWidth::I8),
            2 => Some(SlotWidth::I16),
            4 => Some(SlotWidth::I32),
            _ => None,
        }
    }
}

/// Channel count and slot width of one table; fixes every byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    channel_count: usize,
    slot_width: SlotWidth,
    size: usize,
}

impl Layout {
    /// Fails with `InvalidConfig` when the segment size is not addressable
    pub fn new(channel_count: usize, slot_width: SlotWidth) -> Result<Self> {
        let size = channel_count
            .checked_mul(slot_width.bytes())
            .and_then(|slots| slots.checked_add(CHANNELS_OFFSET))
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or_else(|| {
                ChannelError::InvalidConfig(format!(
                    "{} channels of {} bytes do not fit in one segment",
                    channel_count,
                    slot_width.bytes()
                ))
            })?;

        Ok(Self {
            channel_count,
            slot_width,
            size,
        })
    }

    #[inline(always)]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    #[inline(always)]
    pub fn slot_width(&self) -> SlotWidth {
        self.slot_width
    }

    /// Total segment size in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte offset of slot `index`; in bounds for any `index` below the
    /// channel count
    #[inline(always)]
    pub fn slot_offset(&self, index: usize) -> usize {
        CHANNELS_OFFSET + index * self.slot_width.bytes()
    }

    /// # Safety
    /// `base` must point to a live mapping of at least one byte.
    #[inline(always)]
    unsafe fn liveness<'a>(base: *mut u8) -> &'a AtomicI8 {
        &*(base.add(LIVENESS_OFFSET) as *const AtomicI8)
    }

    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`] bytes.
    #[inline]
    pub unsafe fn load_liveness(base: *mut u8) -> i8 {
        Self::liveness(base).load(Ordering::Acquire)
    }

    /// Publishes the flag before any later unmap/unlink by this process.
    ///
    /// # Safety
    /// `base` must point to a live mapping of at least one byte.
    #[inline]
    pub unsafe fn store_liveness(base: *mut u8, value: i8) {
        Self::liveness(base).store(value, Ordering::Release);
    }

    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`] bytes.
    #[inline]
    pub unsafe fn load_client_count(base: *mut u8) -> i32 {
        let p = base.add(CLIENT_COUNT_OFFSET) as *const i32;
        i32::from_le(ptr::read_unaligned(p))
    }

    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`] bytes.
    #[inline]
    pub unsafe fn store_client_count(base: *mut u8, value: i32) {
        let p = base.add(CLIENT_COUNT_OFFSET) as *mut i32;
        ptr::write_unaligned(p, value.to_le());
    }

    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`]
    /// bytes and `index` must be below the channel count.
    #[inline]
    pub unsafe fn load_slot(&self, base: *mut u8, index: usize) -> i32 {
        debug_assert!(index < self.channel_count);
        let p = base.add(self.slot_offset(index));
        compiler_fence(Ordering::Acquire);
        match self.slot_width {
            SlotWidth::I8 => ptr::read_unaligned(p as *const i8) as i32,
            SlotWidth::I16 => i16::from_le(ptr::read_unaligned(p as *const i16)) as i32,
            SlotWidth::I32 => i32::from_le(ptr::read_unaligned(p as *const i32)),
        }
    }

    /// Stores `value` truncated to the slot width.
    ///
    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`]
    /// bytes and `index` must be below the channel count.
    #[inline]
    pub unsafe fn store_slot(&self, base: *mut u8, index: usize, value: i32) {
        debug_assert!(index < self.channel_count);
        let p = base.add(self.slot_offset(index));
        match self.slot_width {
            SlotWidth::I8 => ptr::write_unaligned(p as *mut i8, value as i8),
            SlotWidth::I16 => ptr::write_unaligned(p as *mut i16, (value as i16).to_le()),
            SlotWidth::I32 => ptr::write_unaligned(p as *mut i32, value.to_le()),
        }
        compiler_fence(Ordering::Release);
    }

    /// Authority initialization: up, no clients, every slot zero
    ///
    /// # Safety
    /// `base` must point to a live mapping of at least [`Layout::size`] bytes.
    pub unsafe fn init(&self, base: *mut u8) {
        Self::store_client_count(base, 0);
        for index in 0..self.channel_count {
            self.store_slot(base, index, 0);
        }
        Self::store_liveness(base, AUTHORITY_UP);
    }
}
