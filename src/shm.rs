//! Low-level POSIX shared memory operations
//!
//! [`Segment`] is the only place the crate talks to `shm_open`/`mmap`. The
//! creator of a segment owns the name: its `close` unlinks the backing object.
//! Every other handle only maps and unmaps.
//!
//! Names created by this process are kept in a process-wide owner registry so
//! that a lifecycle collaborator (signal handler, exit hook) can release them
//! with [`unlink_registered`] when `Drop` will not run. Each entry may carry a
//! release hook (see [`Segment::set_release_hook`]) that runs on the still
//! mapped bytes before the name is unlinked. Attached segments are never
//! registered, and an explicit `close` removes the entry before unmapping, so
//! the exit path never touches a mapping or a name this process no longer owns.

use crate::error::{ChannelError, Result};
use log::{debug, warn};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate, Stat};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::collections::HashMap;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::{Mutex, OnceLock};

const SHM_PREFIX: &str = "/shch_";
const MAX_NAME_LEN: usize = 255 - SHM_PREFIX.len();

/// Identity of a backing object, used to tell generations of one name apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    fn of(stat: &Stat) -> Self {
        Self {
            dev: stat.st_dev as u64,
            ino: stat.st_ino as u64,
        }
    }
}

/// Runs on the base of a still-mapped segment right before its name is
/// released from an exit path
pub type ReleaseHook = fn(*mut u8);

/// Registry entry of a segment created by this process
struct Owned {
    id: FileId,
    /// Mapping base, valid while the entry exists
    base: usize,
    hook: Option<ReleaseHook>,
}

fn registry() -> &'static Mutex<HashMap<String, Owned>> {
    static OWNED: OnceLock<Mutex<HashMap<String, Owned>>> = OnceLock::new();
    OWNED.get_or_init(|| Mutex::new(HashMap::new()))
}

fn register(name: &str, id: FileId, base: *mut u8) {
    if let Ok(mut owned) = registry().lock() {
        owned.insert(
            name.to_string(),
            Owned {
                id,
                base: base as usize,
                hook: None,
            },
        );
    }
}

/// Drops the registry entry for `name` if it still refers to `id`
fn unregister(name: &str, id: FileId) -> bool {
    match registry().lock() {
        Ok(mut owned) => {
            if owned.get(name).map(|o| o.id) == Some(id) {
                owned.remove(name);
                true
            } else {
                false
            }
        }
        Err(_) => false,
    }
}

/// Release every segment this process created and has not closed yet.
///
/// Meant for exit paths where destructors do not run (signal handlers,
/// `std::process::exit`). Each segment's release hook runs first, on the
/// still-mapped bytes; then the name is unlinked, but only if it still points
/// at the object this process created. Mappings are left in place.
/// Returns the number of names released.
pub fn unlink_registered() -> usize {
    release_registered(|_| true)
}

fn release_registered(select: impl Fn(&str) -> bool) -> usize {
    // Hooks run under the lock: `close` unregisters under the same lock before
    // it unmaps, so every base seen here is still mapped.
    let owned: Vec<(String, FileId)> = match registry().lock() {
        Ok(mut owned) => {
            let names: Vec<String> = owned.keys().filter(|n| select(n)).cloned().collect();
            names
                .into_iter()
                .filter_map(|n| owned.remove(&n).map(|o| (n, o)))
                .map(|(n, o)| {
                    if let Some(hook) = o.hook {
                        hook(o.base as *mut u8);
                    }
                    (n, o.id)
                })
                .collect()
        }
        Err(_) => return 0,
    };

    let mut released = 0;
    for (name, id) in owned {
        match unlink_if_current(&name, id) {
            Ok(true) => released += 1,
            Ok(false) => debug!("unlink_registered: '{}' already replaced or gone", name),
            Err(e) => warn!("unlink_registered: {}", e),
        }
    }
    released
}

fn c_name(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(ChannelError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if name.is_empty() || name.contains('/') {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    CString::new(format!("{}{}", SHM_PREFIX, name))
        .map_err(|_| ChannelError::InvalidName(name.to_string()))
}

/// Unlink `name` only if the object currently behind it is `id`
fn unlink_if_current(name: &str, id: FileId) -> Result<bool> {
    let c_name = c_name(name)?;
    let fd = match shm_open(c_name.as_c_str(), ShmOFlags::RDONLY, Mode::empty()) {
        Ok(fd) => fd,
        Err(Errno::NOENT) => return Ok(false),
        Err(e) => {
            return Err(ChannelError::Unlink {
                name: name.to_string(),
                source: e.into(),
            })
        }
    };
    let stat = fstat(&fd).map_err(|e| ChannelError::Unlink {
        name: name.to_string(),
        source: e.into(),
    })?;
    if FileId::of(&stat) != id {
        return Ok(false);
    }
    match shm_unlink(c_name.as_c_str()) {
        Ok(()) => Ok(true),
        Err(Errno::NOENT) => Ok(false),
        Err(e) => Err(ChannelError::Unlink {
            name: name.to_string(),
            source: e.into(),
        }),
    }
}

fn open_exclusive(c_name: &CString) -> std::result::Result<OwnedFd, Errno> {
    shm_open(
        c_name.as_c_str(),
        ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
        Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
    )
}

fn map_shared(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| ChannelError::Mmap(e.into()))?
    };
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| ChannelError::Mmap(Errno::INVAL.into()))
}

struct Mapping {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    id: FileId,
}

/// Handle to a shared memory region
pub struct Segment {
    mapping: Option<Mapping>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is process-wide; concurrent access to its bytes is
// governed by the layout built on top of it.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new shared memory region of `size` zeroed bytes
    ///
    /// Fails with [`ChannelError::AlreadyExists`] if the name is taken and
    /// `force` is false. With `force`, the existing object is unlinked and a
    /// fresh one is created in its place; handles still mapping the old object
    /// keep it alive privately until they close.
    pub fn create(name: &str, size: usize, force: bool) -> Result<Self> {
        let c_name = c_name(name)?;

        let fd = match open_exclusive(&c_name) {
            Ok(fd) => fd,
            Err(Errno::EXIST) if force => {
                warn!("Segment::create: reclaiming stale segment '{}'", name);
                match shm_unlink(c_name.as_c_str()) {
                    Ok(()) | Err(Errno::NOENT) => {}
                    Err(e) => {
                        return Err(ChannelError::Unlink {
                            name: name.to_string(),
                            source: e.into(),
                        })
                    }
                }
                open_exclusive(&c_name).map_err(|e| match e {
                    Errno::EXIST => ChannelError::AlreadyExists {
                        name: name.to_string(),
                    },
                    e => ChannelError::ShmCreate {
                        name: name.to_string(),
                        source: e.into(),
                    },
                })?
            }
            Err(Errno::EXIST) => {
                return Err(ChannelError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                return Err(ChannelError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                })
            }
        };

        let result = Self::init_created(name, &fd, size);
        let (addr, id) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = shm_unlink(c_name.as_c_str());
                return Err(e);
            }
        };

        register(name, id, addr.as_ptr());
        debug!("Segment::create: '{}' ({} bytes)", name, size);

        Ok(Self {
            mapping: Some(Mapping { fd, addr, id }),
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    fn init_created(name: &str, fd: &OwnedFd, size: usize) -> Result<(NonNull<u8>, FileId)> {
        ftruncate(fd, size as u64).map_err(|e| ChannelError::Truncate(e.into()))?;
        let stat = fstat(fd).map_err(|e| ChannelError::ShmCreate {
            name: name.to_string(),
            source: e.into(),
        })?;
        let addr = map_shared(fd, size)?;

        // Zero initialize
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok((addr, FileId::of(&stat)))
    }

    /// Attach to an existing shared memory region
    ///
    /// Fails with [`ChannelError::NoAuthority`] if nothing exists under `name`.
    pub fn attach(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        let fd = match shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::NOENT) => {
                return Err(ChannelError::NoAuthority {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                return Err(ChannelError::ShmOpen {
                    name: name.to_string(),
                    source: e.into(),
                })
            }
        };

        // Get size from file
        let stat = fstat(&fd).map_err(|e| ChannelError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;
        if size == 0 {
            // Creator has not sized it yet
            return Err(ChannelError::NoAuthority {
                name: name.to_string(),
            });
        }

        let addr = map_shared(&fd, size)?;
        debug!("Segment::attach: '{}' ({} bytes)", name, size);

        Ok(Self {
            mapping: Some(Mapping {
                fd,
                addr,
                id: FileId::of(&stat),
            }),
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// Release this handle's mapping; the creator also unlinks the name.
    ///
    /// Idempotent. The unlink is skipped if the name has since been taken
    /// over by a newer object (a forced re-create by another authority).
    pub fn close(&mut self) -> Result<()> {
        let Some(mapping) = self.mapping.take() else {
            return Ok(());
        };

        if self.is_owner {
            unregister(&self.name, mapping.id);
        }

        unsafe {
            let _ = munmap(mapping.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if unlink_if_current(&self.name, mapping.id)? {
                debug!("Segment::close: unlinked '{}'", self.name);
            } else {
                debug!("Segment::close: '{}' no longer ours, left in place", self.name);
            }
        } else {
            debug!("Segment::close: detached '{}'", self.name);
        }
        Ok(())
    }

    /// Install the hook [`unlink_registered`] runs on this segment's bytes
    /// before releasing its name. No-op for attached segments.
    pub fn set_release_hook(&self, hook: ReleaseHook) {
        let Some(mapping) = &self.mapping else {
            return;
        };
        if !self.is_owner {
            return;
        }
        if let Ok(mut owned) = registry().lock() {
            if let Some(entry) = owned.get_mut(&self.name) {
                if entry.id == mapping.id {
                    entry.hook = Some(hook);
                }
            }
        }
    }

    /// Whether both handles map the same backing object
    pub fn same_object(&self, other: &Segment) -> bool {
        match (&self.mapping, &other.mapping) {
            (Some(a), Some(b)) => a.id == b.id,
            _ => false,
        }
    }

    /// Raw pointer to the mapping, `None` once closed
    #[inline(always)]
    pub fn as_ptr(&self) -> Option<*mut u8> {
        self.mapping.as_ref().map(|m| m.addr.as_ptr())
    }

    /// Get size of shared memory region
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of shared memory
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle owns the shared memory
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.mapping.is_none()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Segment::drop: '{}': {}", self.name, e);
        }
    }
}
