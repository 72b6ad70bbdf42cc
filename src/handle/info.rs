// SPDX-License-Identifier: Apache-2.0

//! Layouts exchanged with the object information calls

use crate::host::Status;
use crate::structured::{DataStart, Structure};

use core::mem::size_of;

/// Payload of [`InfoClass::HandleFlags`](crate::InfoClass::HandleFlags)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct HandleFlagInformation {
    /// Non-zero when child processes inherit the handle
    pub inherit: u8,

    /// Non-zero when closing the handle is refused
    pub protect_from_close: u8,
}

unsafe impl Structure for HandleFlagInformation {}

/// A counted UTF-16 string referenced by address
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UnicodeString {
    /// Length of the string in bytes, without terminator
    pub length: u16,

    /// Capacity of `buffer` in bytes
    pub maximum_length: u16,

    #[cfg(target_pointer_width = "64")]
    pub reserved: u32,

    /// Address of the first code unit, or zero
    pub buffer: usize,
}

unsafe impl Structure for UnicodeString {}

/// Payload of [`InfoClass::TypeInformation`](crate::InfoClass::TypeInformation)
///
/// The name characters follow the structure in the same buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ObjectTypeInformation {
    pub type_name: UnicodeString,
    pub total_objects: u32,
    pub total_handles: u32,
}

unsafe impl Structure for ObjectTypeInformation {
    const DATA_START: Option<DataStart> = Some(DataStart::new(size_of::<Self>(), 0, true));
}

/// Writes `value` to the front of `buffer`.
///
/// Returns `ERANGE` and the required size when `buffer` is too small.
pub(crate) fn encode<T: Structure>(buffer: &mut [u8], value: &T) -> (Status, usize) {
    let size = size_of::<T>();
    if buffer.len() < size {
        return (Status::from_errno(libc::ERANGE), size);
    }

    // SAFETY: `buffer` holds at least `size` bytes.
    unsafe { buffer.as_mut_ptr().cast::<T>().write_unaligned(*value) };
    (Status::SUCCESS, size)
}

/// Reads a `T` from the front of `buffer`.
pub(crate) fn decode<T: Structure>(buffer: &[u8]) -> Result<T, Status> {
    if buffer.len() < size_of::<T>() {
        return Err(Status::from_errno(libc::EINVAL));
    }

    // SAFETY: in bounds, and `Structure` accepts any bit pattern.
    Ok(unsafe { buffer.as_ptr().cast::<T>().read_unaligned() })
}

/// Writes an [`ObjectTypeInformation`] naming `name` into `buffer`.
///
/// The NUL-terminated UTF-16 name follows the header and the header's
/// string points at it. Returns `ERANGE` and the required size when `buffer`
/// is too small.
#[allow(clippy::needless_update)]
pub(crate) fn encode_type_name(buffer: &mut [u8], name: &str) -> (Status, usize) {
    let header = size_of::<ObjectTypeInformation>();
    let units: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
    let bytes = units.len() * size_of::<u16>();
    let required = header + bytes;

    let (length, maximum_length) = match (
        u16::try_from(bytes - size_of::<u16>()),
        u16::try_from(bytes),
    ) {
        (Ok(length), Ok(maximum)) => (length, maximum),
        _ => return (Status::from_errno(libc::EOVERFLOW), 0),
    };

    if buffer.len() < required {
        return (Status::from_errno(libc::ERANGE), required);
    }

    let info = ObjectTypeInformation {
        type_name: UnicodeString {
            length,
            maximum_length,
            buffer: buffer.as_ptr() as usize + header,
            ..Default::default()
        },
        ..Default::default()
    };

    let (status, _) = encode(buffer, &info);
    if !status.is_success() {
        return (status, required);
    }

    for (chunk, unit) in buffer[header..required].chunks_exact_mut(2).zip(units) {
        chunk.copy_from_slice(&unit.to_ne_bytes());
    }

    (Status::SUCCESS, required)
}
