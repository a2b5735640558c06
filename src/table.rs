//! Channel table attachments
//!
//! A [`Table`] is one process's view onto a named segment, either as the
//! [`Role::Authority`] that creates it and owns its lifetime, or as a
//! [`Role::Participant`] that attaches to it.
//!
//! Per segment the lifecycle is `Absent -> Live -> Dead`. Only an authority
//! `open` makes a name live and only an authority `close` kills it. A forced
//! re-create starts a new generation; participants of the old one see
//! [`ChannelError::AuthorityDown`] and have to re-attach.

use crate::config::TableConfig;
use crate::error::{ChannelError, Result};
use crate::layout::{Layout, SlotWidth, AUTHORITY_DOWN, AUTHORITY_UP};
use crate::shm::Segment;
use log::{debug, info, warn};

/// Which side of the table this attachment is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the segment, owns its lifetime, flips liveness on close
    Authority,
    /// Attaches to an existing segment and is counted in `client_count`
    Participant,
}

/// One attachment to a shared channel table
pub struct Table {
    segment: Segment,
    layout: Layout,
    role: Role,
}

impl Table {
    /// Open a table by name
    ///
    /// As [`Role::Authority`] this creates and initializes the segment
    /// (`force` reclaims a stale one). As [`Role::Participant`] it attaches to
    /// an existing segment of exactly the expected size and bumps
    /// `client_count`; `force` is ignored.
    pub fn open(
        name: &str,
        role: Role,
        channel_count: usize,
        slot_width: SlotWidth,
        force: bool,
    ) -> Result<Self> {
        if channel_count == 0 {
            return Err(ChannelError::InvalidConfig(
                "channel count must be at least 1".to_string(),
            ));
        }
        let layout = Layout::new(channel_count, slot_width)?;

        match role {
            Role::Authority => Self::create(name, layout, force),
            Role::Participant => Self::attach(name, layout),
        }
    }

    /// Open a table using a shared configuration
    pub fn open_with(config: &TableConfig, role: Role, force: bool) -> Result<Self> {
        Self::open(
            &config.name,
            role,
            config.channel_count,
            config.slot_width,
            force,
        )
    }

    fn create(name: &str, layout: Layout, force: bool) -> Result<Self> {
        Self::create_with(name, layout, force, Segment::create)
    }

    /// Authority open over an arbitrary segment constructor
    ///
    /// With `force`, the generation currently under `name` stays mapped and
    /// live until its replacement exists; only then is it marked dead. A
    /// failed create leaves it untouched.
    fn create_with<F>(name: &str, layout: Layout, force: bool, make: F) -> Result<Self>
    where
        F: FnOnce(&str, usize, bool) -> Result<Segment>,
    {
        let previous = if force { attach_previous(name) } else { None };

        let segment = make(name, layout.size(), force)?;
        let base = segment.as_ptr().ok_or(ChannelError::Detached)?;
        unsafe {
            layout.init(base);
        }
        segment.set_release_hook(mark_down);

        if let Some(old) = previous {
            retire(old, &segment);
        }

        info!(
            "authority created '{}' ({} channels, {} byte slots)",
            name,
            layout.channel_count(),
            layout.slot_width().bytes()
        );

        Ok(Self {
            segment,
            layout,
            role: Role::Authority,
        })
    }

    fn attach(name: &str, layout: Layout) -> Result<Self> {
        let segment = Segment::attach(name)?;
        if segment.size() != layout.size() {
            return Err(ChannelError::SizeMismatch {
                expected: layout.size(),
                got: segment.size(),
            });
        }

        let base = segment.as_ptr().ok_or(ChannelError::Detached)?;
        let clients = unsafe {
            if Layout::load_liveness(base) != AUTHORITY_UP {
                // Authority is mid-teardown
                return Err(ChannelError::NoAuthority {
                    name: name.to_string(),
                });
            }
            let clients = Layout::load_client_count(base).max(0) + 1;
            Layout::store_client_count(base, clients);
            clients
        };

        info!("participant attached to '{}', clients now: {}", name, clients);

        Ok(Self {
            segment,
            layout,
            role: Role::Participant,
        })
    }

    /// Tear this attachment down. Idempotent.
    ///
    /// An authority marks the table dead before unlinking it, whatever the
    /// client count. A participant decrements the client count (never below
    /// zero) and detaches.
    pub fn close(&mut self) -> Result<()> {
        let Some(base) = self.segment.as_ptr() else {
            return Ok(());
        };

        match self.role {
            Role::Authority => unsafe {
                let clients = Layout::load_client_count(base);
                Layout::store_liveness(base, AUTHORITY_DOWN);
                info!(
                    "authority teardown '{}', active clients: {}",
                    self.name(),
                    clients
                );
            },
            Role::Participant => unsafe {
                let clients = (Layout::load_client_count(base) - 1).max(0);
                Layout::store_client_count(base, clients);
                debug!(
                    "participant closing '{}', clients left: {}",
                    self.name(),
                    clients
                );
            },
        }

        self.segment.close()
    }

    /// Whether the authority still maintains this table
    ///
    /// Always false once this handle is closed.
    pub fn is_alive(&self) -> bool {
        match self.segment.as_ptr() {
            Some(base) => unsafe { Layout::load_liveness(base) == AUTHORITY_UP },
            None => false,
        }
    }

    /// Current participant count, for diagnostics
    pub fn client_count(&self) -> i32 {
        match self.segment.as_ptr() {
            Some(base) => unsafe { Layout::load_client_count(base) },
            None => 0,
        }
    }

    fn live_base(&self) -> Result<*mut u8> {
        let base = self.segment.as_ptr().ok_or(ChannelError::Detached)?;
        if unsafe { Layout::load_liveness(base) } != AUTHORITY_UP {
            return Err(ChannelError::AuthorityDown);
        }
        Ok(base)
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.layout.channel_count() {
            return Err(ChannelError::OutOfRange {
                index,
                count: self.layout.channel_count(),
            });
        }
        Ok(())
    }

    /// Raw value of slot `index`
    ///
    /// Liveness is checked before and after the load, so a value read while
    /// the authority went down is reported as [`ChannelError::AuthorityDown`].
    pub fn read_slot(&self, index: usize) -> Result<i32> {
        self.check_index(index)?;
        let base = self.live_base()?;
        let value = unsafe { self.layout.load_slot(base, index) };
        self.live_base()?;
        Ok(value)
    }

    /// Store `value` into slot `index`, truncated to the slot width
    pub fn write_slot(&self, index: usize, value: i32) -> Result<()> {
        self.check_index(index)?;
        let base = self.live_base()?;
        unsafe {
            self.layout.store_slot(base, index, value);
        }
        Ok(())
    }

    /// Snapshot of every slot, for change detection in relay loops
    pub fn channels(&self) -> Result<Vec<i32>> {
        let base = self.live_base()?;
        let values = (0..self.layout.channel_count())
            .map(|index| unsafe { self.layout.load_slot(base, index) })
            .collect();
        self.live_base()?;
        Ok(values)
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// True for the authority, which alone may unlink the segment
    #[inline]
    pub fn owns_lifetime(&self) -> bool {
        self.segment.is_owner()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.layout.channel_count()
    }

    #[inline]
    pub fn slot_width(&self) -> SlotWidth {
        self.layout.slot_width()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.segment.is_closed()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Table::drop: '{}': {}", self.segment.name(), e);
        }
    }
}

/// Release hook for authority segments: exit paths that skip `Drop` still
/// take participants down before the name goes away
fn mark_down(base: *mut u8) {
    unsafe {
        Layout::store_liveness(base, AUTHORITY_DOWN);
    }
}

/// Map whatever currently sits under `name`, without counting as a client
fn attach_previous(name: &str) -> Option<Segment> {
    match Segment::attach(name) {
        Ok(old) => Some(old),
        Err(ChannelError::NoAuthority { .. }) => None,
        Err(e) => {
            debug!("attach_previous: '{}' not retired: {}", name, e);
            None
        }
    }
}

/// Mark the replaced generation dead so its participants stop trusting it
fn retire(mut old: Segment, current: &Segment) {
    if !old.same_object(current) {
        if let Some(base) = old.as_ptr() {
            unsafe {
                Layout::store_liveness(base, AUTHORITY_DOWN);
            }
        }
    }
    if let Err(e) = old.close() {
        warn!("retire: '{}': {}", old.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("table_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_authority_initializes_layout() {
        let name = unique("init");
        let authority = Table::open(&name, Role::Authority, 4, SlotWidth::I16, false).unwrap();

        assert!(authority.is_alive());
        assert!(authority.owns_lifetime());
        assert_eq!(authority.client_count(), 0);
        assert_eq!(authority.channels().unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_participant_counts() {
        let name = unique("counts");
        let authority = Table::open(&name, Role::Authority, 2, SlotWidth::I16, false).unwrap();

        let mut p1 = Table::open(&name, Role::Participant, 2, SlotWidth::I16, false).unwrap();
        let p2 = Table::open(&name, Role::Participant, 2, SlotWidth::I16, false).unwrap();
        assert!(!p1.owns_lifetime());
        assert_eq!(authority.client_count(), 2);

        p1.close().unwrap();
        p1.close().unwrap();
        assert_eq!(authority.client_count(), 1);

        drop(p2);
        assert_eq!(authority.client_count(), 0);
    }

    #[test]
    fn test_slots_shared_between_attachments() {
        let name = unique("shared");
        let authority = Table::open(&name, Role::Authority, 3, SlotWidth::I32, false).unwrap();
        let participant = Table::open(&name, Role::Participant, 3, SlotWidth::I32, false).unwrap();

        participant.write_slot(2, 100_000).unwrap();
        assert_eq!(authority.read_slot(2).unwrap(), 100_000);
        assert_eq!(authority.channels().unwrap(), vec![0, 0, 100_000]);

        assert!(matches!(
            participant.read_slot(3),
            Err(ChannelError::OutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_size_mismatch() {
        let name = unique("mismatch");
        let _authority = Table::open(&name, Role::Authority, 2, SlotWidth::I16, false).unwrap();
        assert!(matches!(
            Table::open(&name, Role::Participant, 3, SlotWidth::I16, false),
            Err(ChannelError::SizeMismatch { expected: 11, got: 9 })
        ));
    }

    #[test]
    fn test_zero_channels_rejected() {
        let name = unique("zero");
        assert!(matches!(
            Table::open(&name, Role::Authority, 0, SlotWidth::I16, false),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_failed_forced_create_keeps_previous() {
        let name = unique("keep");
        let authority = Table::open(&name, Role::Authority, 2, SlotWidth::I16, false).unwrap();
        let participant = Table::open(&name, Role::Participant, 2, SlotWidth::I16, false).unwrap();
        participant.write_slot(1, 55).unwrap();

        let layout = Layout::new(2, SlotWidth::I16).unwrap();
        let result = Table::create_with(&name, layout, true, |_, _, _| {
            Err(ChannelError::Truncate(std::io::Error::from_raw_os_error(28)))
        });
        assert!(matches!(result, Err(ChannelError::Truncate(_))));

        assert!(authority.is_alive());
        assert!(participant.is_alive());
        assert_eq!(participant.read_slot(1).unwrap(), 55);
        assert_eq!(authority.client_count(), 1);

        // Still reachable by name for new participants
        let late = Table::open(&name, Role::Participant, 2, SlotWidth::I16, false).unwrap();
        assert_eq!(late.read_slot(1).unwrap(), 55);
    }

    #[test]
    fn test_oversized_table_rejected_before_retiring() {
        let name = unique("oversized");
        let authority = Table::open(&name, Role::Authority, 2, SlotWidth::I16, false).unwrap();

        assert!(matches!(
            Table::open(&name, Role::Authority, usize::MAX, SlotWidth::I32, true),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(authority.is_alive());
    }

    #[test]
    fn test_closed_handle_is_detached() {
        let name = unique("detached");
        let mut authority = Table::open(&name, Role::Authority, 1, SlotWidth::I8, false).unwrap();
        authority.close().unwrap();

        assert!(authority.is_closed());
        assert!(!authority.is_alive());
        assert_eq!(authority.client_count(), 0);
        assert!(matches!(authority.read_slot(0), Err(ChannelError::Detached)));
    }
}
