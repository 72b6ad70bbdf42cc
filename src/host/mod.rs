// SPDX-License-Identifier: Apache-2.0

//! Primitives the layer borrows from its host
//!
//! Every buffer and handle wrapper is generic over a [`Host`], which provides
//! memory allocation, the memory-set/copy primitives, the handle close call and
//! the object information query/set calls. [`System`] implements these for the
//! current Unix process.

#[cfg(test)]
pub(crate) mod mock;
mod system;

pub use system::System;

use crate::{Limits, Result};

use core::fmt;
use core::ptr::{self, NonNull};

/// Raw value of an OS object handle
pub type RawHandle = isize;

/// Completion status of a host call
///
/// Non-negative values signal success. Negative values carry a negated
/// `errno`, the same convention raw Linux syscalls use.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    /// The call succeeded
    pub const SUCCESS: Self = Self(0);

    /// Builds a failure status from an `errno` value
    #[inline]
    pub const fn from_errno(errno: libc::c_int) -> Self {
        Self(-errno)
    }

    /// Captures the calling thread's last OS error
    #[inline]
    pub fn last_os_error() -> Self {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EIO);
        Self::from_errno(errno)
    }

    /// Whether the call succeeded
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// The `errno` carried by a failure status
    #[inline]
    pub const fn errno(self) -> Option<libc::c_int> {
        if self.0 < 0 {
            Some(-self.0)
        } else {
            None
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno() {
            Some(errno) => write!(
                f,
                "{} (errno {errno})",
                std::io::Error::from_raw_os_error(errno)
            ),
            None => write!(f, "success ({})", self.0),
        }
    }
}

/// Object information classes understood by [`Host::query_object_info`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InfoClass {
    /// An `ObjectTypeInformation` header followed by the UTF-16 type name
    TypeInformation = 2,

    /// A `HandleFlagInformation` structure
    HandleFlags = 4,
}

/// Host-provided primitives.
pub trait Host: Clone + fmt::Debug {
    /// Returns the limits this host was configured with.
    #[inline]
    fn limits(&self) -> Limits {
        Limits::default()
    }

    /// Allocates `size` bytes of uninitialized memory.
    ///
    /// Returns [`Error::AllocationFailure`](crate::Error::AllocationFailure)
    /// when the request cannot be satisfied.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>>;

    /// Frees a block previously returned by [`Host::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Host::allocate`] on an equivalent host and must
    /// not be used afterwards. `size` is the length recorded for the block and
    /// may be smaller than the size originally requested.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Copies `count` bytes from `src` to `dst`. The regions may *not* overlap.
    ///
    /// # Safety
    ///
    /// Both regions must be valid for `count` bytes.
    #[inline]
    unsafe fn copy(&self, dst: NonNull<u8>, src: NonNull<u8>, count: usize) {
        ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), count)
    }

    /// Sets `count` bytes at `dst` to zero.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `count` bytes.
    #[inline]
    unsafe fn zero(&self, dst: NonNull<u8>, count: usize) {
        self.fill(dst, count, 0)
    }

    /// Sets `count` bytes at `dst` to `value`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `count` bytes.
    #[inline]
    unsafe fn fill(&self, dst: NonNull<u8>, count: usize, value: u8) {
        ptr::write_bytes(dst.as_ptr(), value, count)
    }

    /// Closes an OS object handle.
    fn close_handle(&self, handle: RawHandle) -> Status;

    /// Queries information of `class` about `handle` into `buffer`.
    ///
    /// Returns the call status and the number of bytes the response needs,
    /// which exceeds `buffer.len()` when the buffer was too small.
    fn query_object_info(
        &self,
        handle: RawHandle,
        class: InfoClass,
        buffer: &mut [u8],
    ) -> (Status, usize);

    /// Sets information of `class` on `handle` from `buffer`.
    fn set_object_info(&self, handle: RawHandle, class: InfoClass, buffer: &[u8]) -> Status;
}
