//! C Bindings for SharedChannels
//!
//! Provides a raw C API so producers and forwarders written in other
//! languages can attach to a table. Functions returning `c_int` use `0` for
//! success and the negative `SHCH_E*` codes below for failures.

use crate::channel::{Channel, ChannelSpec};
use crate::error::ChannelError;
use crate::layout::SlotWidth;
use crate::table::{Role, Table};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;

pub const SHCH_OK: c_int = 0;
pub const SHCH_EALREADY_EXISTS: c_int = -1;
pub const SHCH_ENO_AUTHORITY: c_int = -2;
pub const SHCH_EOUT_OF_RANGE: c_int = -3;
pub const SHCH_EAUTHORITY_DOWN: c_int = -4;
pub const SHCH_EINVALID: c_int = -5;
pub const SHCH_EIO: c_int = -6;

fn error_code(err: &ChannelError) -> c_int {
    match err {
        ChannelError::AlreadyExists { .. } => SHCH_EALREADY_EXISTS,
        ChannelError::NoAuthority { .. } => SHCH_ENO_AUTHORITY,
        ChannelError::OutOfRange { .. } => SHCH_EOUT_OF_RANGE,
        ChannelError::AuthorityDown | ChannelError::Detached => SHCH_EAUTHORITY_DOWN,
        ChannelError::InvalidConfig(_)
        | ChannelError::InvalidName(_)
        | ChannelError::NamespaceTooLong { .. }
        | ChannelError::SizeMismatch { .. } => SHCH_EINVALID,
        _ => SHCH_EIO,
    }
}

// Opaque handles
pub struct ShchTableHandle(Table);
pub struct ShchChannelHandle(Channel<Table>);

#[repr(C)]
pub struct ShchChannelSpec {
    pub clamp_min: i32,
    pub clamp_max: i32,
    /// Non-zero enables rescaling from `[src_min, src_max]`
    pub normalize: c_int,
    pub src_min: f64,
    pub src_max: f64,
}

impl From<&ShchChannelSpec> for ChannelSpec {
    fn from(spec: &ShchChannelSpec) -> Self {
        let base = ChannelSpec::clamped(spec.clamp_min, spec.clamp_max);
        if spec.normalize != 0 {
            base.normalized(spec.src_min, spec.src_max)
        } else {
            base
        }
    }
}

unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

unsafe fn write_err(out_err: *mut c_int, code: c_int) {
    if !out_err.is_null() {
        *out_err = code;
    }
}

/// Open a table as authority (`authority != 0`) or participant
///
/// `slot_bytes` must be 1, 2 or 4. On failure returns null and stores the
/// error code into `out_err` if given.
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn shch_table_open(
    name: *const c_char,
    authority: c_int,
    channel_count: usize,
    slot_bytes: usize,
    force: c_int,
    out_err: *mut c_int,
) -> *mut ShchTableHandle {
    let (Some(name), Some(width)) = (name_arg(name), SlotWidth::from_bytes(slot_bytes)) else {
        write_err(out_err, SHCH_EINVALID);
        return ptr::null_mut();
    };
    let role = if authority != 0 {
        Role::Authority
    } else {
        Role::Participant
    };

    match Table::open(name, role, channel_count, width, force != 0) {
        Ok(table) => {
            write_err(out_err, SHCH_OK);
            Box::into_raw(Box::new(ShchTableHandle(table)))
        }
        Err(e) => {
            write_err(out_err, error_code(&e));
            ptr::null_mut()
        }
    }
}

/// Close and free a table handle
#[no_mangle]
pub unsafe extern "C" fn shch_table_close(handle: *mut ShchTableHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn shch_table_is_alive(handle: *const ShchTableHandle) -> bool {
    !handle.is_null() && (*handle).0.is_alive()
}

#[no_mangle]
pub unsafe extern "C" fn shch_table_client_count(handle: *const ShchTableHandle) -> i32 {
    if handle.is_null() {
        return 0;
    }
    (*handle).0.client_count()
}

/// Read a raw slot through a table handle
#[no_mangle]
pub unsafe extern "C" fn shch_table_read(
    handle: *const ShchTableHandle,
    index: usize,
    out_value: *mut i32,
) -> c_int {
    if handle.is_null() || out_value.is_null() {
        return SHCH_EINVALID;
    }
    match (*handle).0.read_slot(index) {
        Ok(v) => {
            *out_value = v;
            SHCH_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Attach a participant and bind one of its slots
///
/// # Safety
/// name must be a valid null-terminated string, spec must be valid
#[no_mangle]
pub unsafe extern "C" fn shch_channel_connect(
    name: *const c_char,
    channel_count: usize,
    slot_bytes: usize,
    index: usize,
    spec: *const ShchChannelSpec,
    out_err: *mut c_int,
) -> *mut ShchChannelHandle {
    let (Some(name), Some(width), false) = (
        name_arg(name),
        SlotWidth::from_bytes(slot_bytes),
        spec.is_null(),
    ) else {
        write_err(out_err, SHCH_EINVALID);
        return ptr::null_mut();
    };

    let spec = ChannelSpec::from(&*spec);
    let channel = Table::open(name, Role::Participant, channel_count, width, false)
        .and_then(|table| Channel::bind(table, index, spec));

    match channel {
        Ok(channel) => {
            write_err(out_err, SHCH_OK);
            Box::into_raw(Box::new(ShchChannelHandle(channel)))
        }
        Err(e) => {
            write_err(out_err, error_code(&e));
            ptr::null_mut()
        }
    }
}

/// Close and free a channel handle, detaching its participant
#[no_mangle]
pub unsafe extern "C" fn shch_channel_destroy(handle: *mut ShchChannelHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Write a value; the stored value goes into `out_stored` if given
#[no_mangle]
pub unsafe extern "C" fn shch_channel_write(
    handle: *const ShchChannelHandle,
    value: f64,
    out_stored: *mut i32,
) -> c_int {
    if handle.is_null() {
        return SHCH_EINVALID;
    }
    match (*handle).0.write(value) {
        Ok(stored) => {
            if !out_stored.is_null() {
                *out_stored = stored;
            }
            SHCH_OK
        }
        Err(e) => error_code(&e),
    }
}

#[no_mangle]
pub unsafe extern "C" fn shch_channel_read(
    handle: *const ShchChannelHandle,
    out_value: *mut i32,
) -> c_int {
    if handle.is_null() || out_value.is_null() {
        return SHCH_EINVALID;
    }
    match (*handle).0.read() {
        Ok(v) => {
            *out_value = v;
            SHCH_OK
        }
        Err(e) => error_code(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_c_roundtrip() {
        let name = CString::new(format!("bindings_{}", std::process::id())).unwrap();
        let mut err = 0;

        unsafe {
            let missing = shch_channel_connect(
                name.as_ptr(),
                2,
                2,
                0,
                &ShchChannelSpec {
                    clamp_min: 0,
                    clamp_max: 4095,
                    normalize: 0,
                    src_min: 0.0,
                    src_max: 0.0,
                },
                &mut err,
            );
            assert!(missing.is_null());
            assert_eq!(err, SHCH_ENO_AUTHORITY);

            let table = shch_table_open(name.as_ptr(), 1, 2, 2, 0, &mut err);
            assert!(!table.is_null());
            assert!(shch_table_is_alive(table));

            let spec = ShchChannelSpec {
                clamp_min: 0,
                clamp_max: 4095,
                normalize: 1,
                src_min: 0.0,
                src_max: 100.0,
            };
            let channel = shch_channel_connect(name.as_ptr(), 2, 2, 1, &spec, &mut err);
            assert!(!channel.is_null());
            assert_eq!(shch_table_client_count(table), 1);

            let mut stored = 0;
            assert_eq!(shch_channel_write(channel, 100.0, &mut stored), SHCH_OK);
            assert_eq!(stored, 4095);

            let mut value = 0;
            assert_eq!(shch_table_read(table, 1, &mut value), SHCH_OK);
            assert_eq!(value, 4095);

            shch_table_close(table);
            assert_eq!(shch_channel_read(channel, &mut value), SHCH_EAUTHORITY_DOWN);
            shch_channel_destroy(channel);
        }
    }

    #[test]
    fn test_bad_slot_width() {
        let name = CString::new("bindings_width").unwrap();
        let mut err = 0;
        let table = unsafe { shch_table_open(name.as_ptr(), 1, 2, 3, 0, &mut err) };
        assert!(table.is_null());
        assert_eq!(err, SHCH_EINVALID);
    }
}
