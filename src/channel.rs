//! Per-slot channel views
//!
//! A [`Channel`] binds one slot of a [`Table`] and applies the value policy
//! on the way in: optional linear rescaling, then clamping, then truncation
//! to the slot width. Reads return the stored value as is; normalization is
//! write-side only, so the forwarder always sees device-native values.

use crate::config::TableConfig;
use crate::error::{ChannelError, Result};
use crate::layout::SlotWidth;
use crate::table::{Role, Table};
use log::debug;
use std::borrow::Borrow;

/// Source range that written values are rescaled from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    pub src_min: f64,
    pub src_max: f64,
}

/// Value policy of a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSpec {
    /// Lower bound, applied first
    pub clamp_min: i32,
    /// Upper bound, applied second
    pub clamp_max: i32,
    /// Rescale `[src_min, src_max]` onto `[clamp_min, clamp_max]` before clamping
    pub normalize: Option<Normalize>,
}

impl Default for ChannelSpec {
    /// 12-bit DAC range, no rescaling
    fn default() -> Self {
        Self {
            clamp_min: 0,
            clamp_max: 4095,
            normalize: None,
        }
    }
}

impl ChannelSpec {
    pub fn clamped(clamp_min: i32, clamp_max: i32) -> Self {
        Self {
            clamp_min,
            clamp_max,
            normalize: None,
        }
    }

    pub fn normalized(self, src_min: f64, src_max: f64) -> Self {
        Self {
            normalize: Some(Normalize { src_min, src_max }),
            ..self
        }
    }

    /// Reject policies that cannot be applied deterministically.
    ///
    /// `clamp_min > clamp_max` is not rejected: the result is then always
    /// `clamp_max`.
    pub fn validate(&self, slot_width: SlotWidth) -> Result<()> {
        let (lo, hi) = slot_width.range();
        if self.clamp_min < lo || self.clamp_max > hi {
            return Err(ChannelError::InvalidConfig(format!(
                "clamp range [{}, {}] does not fit a {}-byte slot",
                self.clamp_min,
                self.clamp_max,
                slot_width.bytes()
            )));
        }
        if let Some(Normalize { src_min, src_max }) = self.normalize {
            if !src_min.is_finite() || !src_max.is_finite() || src_min == src_max {
                return Err(ChannelError::InvalidConfig(format!(
                    "normalize range [{}, {}] is empty or not finite",
                    src_min, src_max
                )));
            }
        }
        Ok(())
    }

    /// Map a written value to the integer that gets stored
    pub fn apply(&self, value: f64) -> i32 {
        let min = f64::from(self.clamp_min);
        let max = f64::from(self.clamp_max);

        let value = match self.normalize {
            Some(Normalize { src_min, src_max }) => {
                min + (value - src_min) * (max - min) / (src_max - src_min)
            }
            None => value,
        };

        // NaN falls through to clamp_min
        let value = value.max(min).min(max);
        value as i32
    }
}

/// A range-clamping view onto one slot of a table
///
/// `B` is either a borrowed `&Table` ([`Channel::bind`]) or an owned
/// participant [`Table`] ([`Channel::connect`]).
pub struct Channel<B: Borrow<Table> = Table> {
    table: Option<B>,
    index: usize,
    spec: ChannelSpec,
}

impl<B: Borrow<Table>> Channel<B> {
    /// Bind slot `index` of `table`
    pub fn bind(table: B, index: usize, spec: ChannelSpec) -> Result<Self> {
        {
            let t: &Table = table.borrow();
            t.check_index(index)?;
            spec.validate(t.slot_width())?;
        }
        Ok(Self {
            table: Some(table),
            index,
            spec,
        })
    }

    fn table(&self) -> Result<&Table> {
        match &self.table {
            Some(t) => Ok(t.borrow()),
            None => Err(ChannelError::Detached),
        }
    }

    /// Rescale, clamp and store `value`; returns what was stored
    pub fn write(&self, value: impl Into<f64>) -> Result<i32> {
        let table = self.table()?;
        if !table.is_alive() {
            return Err(ChannelError::AuthorityDown);
        }
        let stored = self.spec.apply(value.into());
        table.write_slot(self.index, stored)?;
        Ok(stored)
    }

    /// Current raw value of the slot
    pub fn read(&self) -> Result<i32> {
        self.table()?.read_slot(self.index)
    }

    /// Release the binding. Idempotent; an owned table is closed with it.
    pub fn close(&mut self) {
        if self.table.take().is_some() {
            debug!("Channel::close: slot {}", self.index);
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.table.is_none()
    }
}

impl Channel<Table> {
    /// Attach a fresh participant table and bind slot `index` of it
    pub fn connect(config: &TableConfig, index: usize, spec: ChannelSpec) -> Result<Self> {
        if index >= config.channel_count {
            return Err(ChannelError::OutOfRange {
                index,
                count: config.channel_count,
            });
        }
        let table = Table::open_with(config, Role::Participant, false)?;
        Self::bind(table, index, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("channel_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_apply_clamps() {
        let spec = ChannelSpec::default();
        assert_eq!(spec.apply(-10.0), 0);
        assert_eq!(spec.apply(9999.0), 4095);
        assert_eq!(spec.apply(1234.0), 1234);
        assert_eq!(spec.apply(12.9), 12);
        assert_eq!(spec.apply(f64::NAN), 0);
    }

    #[test]
    fn test_apply_normalizes() {
        let spec = ChannelSpec::clamped(0, 4095).normalized(0.0, 100.0);
        assert!((spec.apply(50.0) - 2048).abs() <= 1);
        assert_eq!(spec.apply(0.0), 0);
        assert_eq!(spec.apply(100.0), 4095);
        assert_eq!(spec.apply(150.0), 4095);
        assert_eq!(spec.apply(-1.0), 0);

        // Inverted source range flips direction
        let inverted = ChannelSpec::clamped(0, 100).normalized(1.0, 0.0);
        assert_eq!(inverted.apply(0.0), 100);
    }

    #[test]
    fn test_inverted_clamp_is_clamp_max() {
        let spec = ChannelSpec::clamped(10, 5);
        assert_eq!(spec.apply(0.0), 5);
        assert_eq!(spec.apply(100.0), 5);
    }

    #[test]
    fn test_validate() {
        assert!(ChannelSpec::default().validate(SlotWidth::I16).is_ok());
        assert!(ChannelSpec::default().validate(SlotWidth::I8).is_err());
        assert!(ChannelSpec::clamped(-128, 127).validate(SlotWidth::I8).is_ok());
        assert!(ChannelSpec::default()
            .normalized(5.0, 5.0)
            .validate(SlotWidth::I16)
            .is_err());
        assert!(ChannelSpec::default()
            .normalized(0.0, f64::INFINITY)
            .validate(SlotWidth::I16)
            .is_err());
    }

    #[test]
    fn test_bind_write_read() {
        let name = unique("rw");
        let authority = Table::open(&name, Role::Authority, 2, SlotWidth::I16, false).unwrap();
        let participant = Table::open(&name, Role::Participant, 2, SlotWidth::I16, false).unwrap();

        let writer = Channel::bind(&participant, 1, ChannelSpec::default()).unwrap();
        let reader = Channel::bind(&authority, 1, ChannelSpec::default()).unwrap();

        assert_eq!(reader.read().unwrap(), 0);
        assert_eq!(writer.write(300).unwrap(), 300);
        assert_eq!(reader.read().unwrap(), 300);
        assert_eq!(writer.write(300).unwrap(), 300);
        assert_eq!(reader.read().unwrap(), 300);
    }

    #[test]
    fn test_bind_rejects_bad_config() {
        let name = unique("bad");
        let authority = Table::open(&name, Role::Authority, 2, SlotWidth::I8, false).unwrap();

        assert!(matches!(
            Channel::bind(&authority, 2, ChannelSpec::clamped(0, 100)),
            Err(ChannelError::OutOfRange { index: 2, count: 2 })
        ));
        assert!(matches!(
            Channel::bind(&authority, 0, ChannelSpec::default()),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_connect_owns_participant() {
        let config = TableConfig::named(unique("connect"));
        let authority = Table::open_with(&config, Role::Authority, false).unwrap();

        let mut channel = Channel::connect(&config, 0, ChannelSpec::default()).unwrap();
        assert_eq!(authority.client_count(), 1);
        channel.write(42).unwrap();
        assert_eq!(authority.read_slot(0).unwrap(), 42);

        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert_eq!(authority.client_count(), 0);
        assert!(matches!(channel.read(), Err(ChannelError::Detached)));
    }
}
