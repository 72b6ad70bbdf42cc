// SPDX-License-Identifier: Apache-2.0

use super::{Host, InfoClass, RawHandle, Status};
use crate::handle::info::{self, HandleFlagInformation};
use crate::handle::HandleFlags;
use crate::{Error, Limits, Result};

use std::collections::BTreeSet;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Descriptors whose close is refused
///
/// Unix descriptors carry no such attribute, so the process keeps the set.
static PROTECTED: Mutex<BTreeSet<RawHandle>> = Mutex::new(BTreeSet::new());

fn protected() -> MutexGuard<'static, BTreeSet<RawHandle>> {
    PROTECTED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns whether `handle` is marked protected and still open.
///
/// An entry whose descriptor was closed behind the host's back is dropped.
fn is_protected(handle: RawHandle) -> bool {
    let mut set = protected();
    if !set.contains(&handle) {
        return false;
    }

    let open = match libc::c_int::try_from(handle) {
        Ok(fd) => (unsafe { libc::fcntl(fd, libc::F_GETFD) }) >= 0,
        Err(_) => false,
    };
    if !open {
        trace!(handle, "dropping stale protected descriptor");
        set.remove(&handle);
    }

    open
}

fn descriptor(handle: RawHandle) -> core::result::Result<libc::c_int, Status> {
    libc::c_int::try_from(handle).map_err(|_| Status::from_errno(libc::EBADF))
}

/// The current process: `malloc`/`free` and file descriptors
///
/// Protect-from-close is tracked per descriptor number. An entry left behind
/// by a descriptor closed outside this host is dropped on the next flag query
/// or close of that number, but a number reused before then inherits the mark.
#[derive(Copy, Clone, Debug, Default)]
pub struct System {
    limits: Limits,
}

impl System {
    /// Returns a host with the default limits.
    pub const fn new() -> Self {
        Self::with_limits(<Limits as const_default::ConstDefault>::DEFAULT)
    }

    /// Returns a host enforcing `limits`.
    pub const fn with_limits(limits: Limits) -> Self {
        Self { limits }
    }

    fn flags(fd: libc::c_int) -> core::result::Result<HandleFlags, Status> {
        let bits = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if bits < 0 {
            let status = Status::last_os_error();
            if status.errno() == Some(libc::EBADF) {
                protected().remove(&(fd as RawHandle));
            }
            return Err(status);
        }

        let mut flags = HandleFlags::empty();
        flags.set(HandleFlags::INHERIT, bits & libc::FD_CLOEXEC == 0);
        flags.set(
            HandleFlags::PROTECT_FROM_CLOSE,
            protected().contains(&(fd as RawHandle)),
        );
        Ok(flags)
    }

    fn set_flags(fd: libc::c_int, flags: HandleFlags) -> Status {
        let bits = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if bits < 0 {
            return Status::last_os_error();
        }

        let bits = if flags.contains(HandleFlags::INHERIT) {
            bits & !libc::FD_CLOEXEC
        } else {
            bits | libc::FD_CLOEXEC
        };

        if unsafe { libc::fcntl(fd, libc::F_SETFD, bits) } < 0 {
            return Status::last_os_error();
        }

        let mut set = protected();
        if flags.contains(HandleFlags::PROTECT_FROM_CLOSE) {
            set.insert(fd as RawHandle);
        } else {
            set.remove(&(fd as RawHandle));
        }

        Status::SUCCESS
    }

    fn type_name(fd: libc::c_int) -> core::result::Result<&'static str, Status> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } < 0 {
            return Err(Status::last_os_error());
        }

        // SAFETY: `fstat` succeeded and filled the structure.
        let mode = unsafe { stat.assume_init() }.st_mode;
        Ok(match mode & libc::S_IFMT {
            libc::S_IFREG => "File",
            libc::S_IFDIR => "Directory",
            libc::S_IFIFO => "Pipe",
            libc::S_IFSOCK => "Socket",
            libc::S_IFCHR => "CharacterDevice",
            libc::S_IFBLK => "BlockDevice",
            libc::S_IFLNK => "SymbolicLink",
            _ => "Unknown",
        })
    }
}

impl Host for System {
    #[inline]
    fn limits(&self) -> Limits {
        self.limits
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let ptr = unsafe { libc::malloc(size) };
        NonNull::new(ptr.cast()).ok_or(Error::AllocationFailure { size })
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize) {
        libc::free(ptr.as_ptr().cast())
    }

    fn close_handle(&self, handle: RawHandle) -> Status {
        if is_protected(handle) {
            return Status::from_errno(libc::EPERM);
        }

        let fd = match descriptor(handle) {
            Ok(fd) => fd,
            Err(status) => return status,
        };

        if unsafe { libc::close(fd) } < 0 {
            return Status::last_os_error();
        }

        trace!(fd, "closed descriptor");
        Status::SUCCESS
    }

    fn query_object_info(
        &self,
        handle: RawHandle,
        class: InfoClass,
        buffer: &mut [u8],
    ) -> (Status, usize) {
        let fd = match descriptor(handle) {
            Ok(fd) => fd,
            Err(status) => return (status, 0),
        };

        match class {
            InfoClass::HandleFlags => match Self::flags(fd) {
                Ok(flags) => info::encode(buffer, &HandleFlagInformation::from(flags)),
                Err(status) => (status, 0),
            },
            InfoClass::TypeInformation => match Self::type_name(fd) {
                Ok(name) => info::encode_type_name(buffer, name),
                Err(status) => (status, 0),
            },
        }
    }

    fn set_object_info(&self, handle: RawHandle, class: InfoClass, buffer: &[u8]) -> Status {
        let fd = match descriptor(handle) {
            Ok(fd) => fd,
            Err(status) => return status,
        };

        match class {
            InfoClass::HandleFlags => match info::decode::<HandleFlagInformation>(buffer) {
                Ok(information) => Self::set_flags(fd, information.into()),
                Err(status) => status,
            },
            InfoClass::TypeInformation => Status::from_errno(libc::EINVAL),
        }
    }
}
