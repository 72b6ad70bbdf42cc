// SPDX-License-Identifier: Apache-2.0

//! Owned OS object handles
//!
//! A [`NativeHandle`] closes the handle it owns exactly once: either through
//! an explicit [`NativeHandle::release`], which reports the host's status, or
//! when dropped.

pub mod info;
mod list;

pub use list::HandleListBuffer;

use crate::host::{Host, InfoClass, RawHandle, System};
use crate::structured::StructuredBuffer;
use crate::{utils, Error, Result};

use info::{HandleFlagInformation, ObjectTypeInformation};

use core::mem::size_of;
use std::cell::OnceCell;

use bitflags::bitflags;
use tracing::{debug, trace, warn};

bitflags! {
    /// Handle attributes reachable through [`InfoClass::HandleFlags`].
    #[derive(Default)]
    pub struct HandleFlags: u32 {
        /// Child processes inherit the handle.
        const INHERIT = 1 << 0;

        /// Closing the handle is refused.
        const PROTECT_FROM_CLOSE = 1 << 1;
    }
}

impl From<HandleFlags> for HandleFlagInformation {
    fn from(flags: HandleFlags) -> Self {
        Self {
            inherit: flags.contains(HandleFlags::INHERIT).into(),
            protect_from_close: flags.contains(HandleFlags::PROTECT_FROM_CLOSE).into(),
        }
    }
}

impl From<HandleFlagInformation> for HandleFlags {
    fn from(information: HandleFlagInformation) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::INHERIT, information.inherit != 0);
        flags.set(Self::PROTECT_FROM_CLOSE, information.protect_from_close != 0);
        flags
    }
}

/// An OS object handle, closed on release when owned
#[derive(Debug)]
pub struct NativeHandle<H: Host = System> {
    value: RawHandle,
    owns: bool,
    closed: bool,
    type_name: OnceCell<String>,
    host: H,
}

impl NativeHandle {
    /// Wraps a raw handle of the current process.
    ///
    /// # Safety
    ///
    /// When `owns` is set, `value` must be an open handle nothing else closes.
    #[inline]
    pub unsafe fn from_raw(value: RawHandle, owns: bool) -> Self {
        Self::from_raw_in(value, owns, System::default())
    }
}

impl<H: Host> NativeHandle<H> {
    /// Wraps a raw handle managed by `host`.
    ///
    /// # Safety
    ///
    /// When `owns` is set, `value` must be an open handle nothing else closes.
    pub unsafe fn from_raw_in(value: RawHandle, owns: bool, host: H) -> Self {
        Self {
            value,
            owns,
            closed: false,
            type_name: OnceCell::new(),
            host,
        }
    }

    /// Returns `true` for values that never name an open handle.
    #[inline]
    pub const fn is_invalid_value(value: RawHandle) -> bool {
        value <= 0
    }

    /// Returns `true` if the wrapped value is zero or negative.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        Self::is_invalid_value(self.value)
    }

    /// Returns the raw value, zero once closed.
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.value
    }

    /// Returns `true` if releasing this handle closes it.
    #[inline]
    pub fn owns(&self) -> bool {
        self.owns
    }

    /// Returns `true` once [`NativeHandle::release`] closed the handle.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the host the handle belongs to.
    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    fn check(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Disposed);
        }

        Ok(())
    }

    /// Reads the handle's flags.
    pub fn query_flags(&self) -> Result<HandleFlags> {
        self.check()?;

        let mut buffer =
            StructuredBuffer::new_in(HandleFlagInformation::default(), self.host.clone())?;
        let (status, _) = self.host.query_object_info(
            self.value,
            InfoClass::HandleFlags,
            buffer.as_mut_slice()?,
        );
        if !status.is_success() {
            return Err(Error::OsCallFailed(status));
        }

        buffer.result().map(HandleFlags::from)
    }

    /// Replaces the handle's flags.
    pub fn set_flags(&self, flags: HandleFlags) -> Result<()> {
        self.check()?;

        let information = HandleFlagInformation::from(flags);
        let mut buffer = StructuredBuffer::new_in(information, self.host.clone())?;
        let status =
            self.host
                .set_object_info(self.value, InfoClass::HandleFlags, buffer.as_mut_slice()?);
        if !status.is_success() {
            return Err(Error::OsCallFailed(status));
        }

        trace!(handle = self.value, flags = flags.bits(), "set handle flags");
        Ok(())
    }

    fn update(&self, flag: HandleFlags, value: bool) -> Result<()> {
        let mut flags = self.query_flags()?;
        flags.set(flag, value);
        self.set_flags(flags)
    }

    #[inline]
    pub fn inherit(&self) -> Result<bool> {
        Ok(self.query_flags()?.contains(HandleFlags::INHERIT))
    }

    #[inline]
    pub fn set_inherit(&self, inherit: bool) -> Result<()> {
        self.update(HandleFlags::INHERIT, inherit)
    }

    #[inline]
    pub fn protect_from_close(&self) -> Result<bool> {
        Ok(self.query_flags()?.contains(HandleFlags::PROTECT_FROM_CLOSE))
    }

    #[inline]
    pub fn set_protect_from_close(&self, protect: bool) -> Result<()> {
        self.update(HandleFlags::PROTECT_FROM_CLOSE, protect)
    }

    /// Returns the name of the object type behind the handle.
    ///
    /// The first successful query is cached. The query buffer holds
    /// `type_name_query_size` bytes; a longer answer fails and is not retried.
    pub fn type_name(&self) -> Result<&str> {
        self.check()?;

        if let Some(name) = self.type_name.get() {
            return Ok(name.as_str());
        }

        let size = self.host.limits().type_name_query_size;
        let mut buffer = StructuredBuffer::with_additional_in(
            ObjectTypeInformation::default(),
            size,
            true,
            self.host.clone(),
        )?;

        let base = buffer.as_raw().as_ptr() as usize;
        let (status, _) = self.host.query_object_info(
            self.value,
            InfoClass::TypeInformation,
            buffer.as_mut_slice()?,
        );
        if !status.is_success() {
            return Err(Error::OsCallFailed(status));
        }

        let information = buffer.result()?.type_name;
        let units = usize::from(information.length) / size_of::<u16>();
        let name = match information.buffer {
            0 => String::new(),
            address => {
                let offset = address
                    .checked_sub(base)
                    .ok_or(Error::OffsetOutOfRange {
                        offset: address,
                        count: usize::from(information.length),
                        length: buffer.as_raw().len(),
                    })?;
                utils::read_utf16(&buffer, offset, units)?
            }
        };

        trace!(handle = self.value, name = %name, "queried object type");
        Ok(self.type_name.get_or_init(|| name).as_str())
    }

    /// Closes the handle if it is owned and valid.
    ///
    /// On success the handle's value becomes zero. On failure the value is
    /// kept, ownership is given up so the close is never attempted again, and
    /// the host's status is returned. Otherwise this does nothing.
    pub fn release(&mut self) -> Result<()> {
        if !self.owns || self.is_invalid() {
            return Ok(());
        }

        let status = self.host.close_handle(self.value);
        self.owns = false;

        if !status.is_success() {
            return Err(Error::OsCallFailed(status));
        }

        debug!(handle = self.value, "closed handle");
        self.value = 0;
        self.closed = true;
        Ok(())
    }

    /// Gives up ownership without closing and returns the raw value.
    #[inline]
    pub fn into_raw(mut self) -> RawHandle {
        self.owns = false;
        self.value
    }
}

impl<H: Host> Drop for NativeHandle<H> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(handle = self.value, error = %e, "failed to close handle on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use crate::host::Status;
    use crate::Limits;

    fn handle(host: &MockHost, value: RawHandle, owns: bool) -> NativeHandle<MockHost> {
        unsafe { NativeHandle::from_raw_in(value, owns, host.clone()) }
    }

    #[test]
    fn invalid_values() {
        let host = MockHost::default();
        assert!(handle(&host, 0, true).is_invalid());
        assert!(handle(&host, -1, true).is_invalid());
        assert!(!handle(&host, 5, true).is_invalid());

        // Dropping the invalid handles above never reaches the host.
        assert_eq!(host.closed(), [5]);
    }

    #[test]
    fn release_invalid() {
        let host = MockHost::default();
        let mut invalid = handle(&host, -1, true);
        invalid.release().unwrap();
        drop(invalid);
        assert!(host.closed().is_empty());
    }

    #[test]
    fn release_once() {
        let host = MockHost::default();
        let mut h = handle(&host, 5, true);

        h.release().unwrap();
        assert_eq!(h.raw(), 0);
        assert!(h.is_closed());
        assert!(!h.owns());

        h.release().unwrap();
        drop(h);
        assert_eq!(host.closed(), [5]);
    }

    #[test]
    fn close_failure() {
        let host = MockHost::default();
        host.fail_close(7);

        let mut h = handle(&host, 7, true);
        assert_eq!(
            h.release().unwrap_err(),
            Error::OsCallFailed(Status::from_errno(libc::EIO))
        );
        assert_eq!(h.raw(), 7);
        assert!(!h.owns());
        assert!(!h.is_closed());

        h.release().unwrap();
        drop(h);
        assert_eq!(host.closed(), [7]);
    }

    #[test]
    fn not_owned() {
        let host = MockHost::default();
        let mut h = handle(&host, 9, false);
        h.release().unwrap();
        drop(h);

        let h = handle(&host, 10, true);
        assert_eq!(h.into_raw(), 10);
        assert!(host.closed().is_empty());
    }

    #[test]
    fn disposed() {
        let host = MockHost::default();
        host.set_type_name(5, "File");

        let mut h = handle(&host, 5, true);
        h.release().unwrap();
        assert_eq!(h.query_flags().unwrap_err(), Error::Disposed);
        assert_eq!(h.set_inherit(true).unwrap_err(), Error::Disposed);
        assert_eq!(h.type_name().unwrap_err(), Error::Disposed);
    }

    #[test]
    fn flags() {
        let host = MockHost::default();
        let mut h = handle(&host, 5, true);
        assert_eq!(h.query_flags().unwrap(), HandleFlags::empty());

        h.set_inherit(true).unwrap();
        assert!(h.inherit().unwrap());
        assert!(!h.protect_from_close().unwrap());
        assert_eq!(host.flags(5), HandleFlags::INHERIT);

        h.set_protect_from_close(true).unwrap();
        assert_eq!(host.flags(5), HandleFlags::all());
        assert_eq!(
            h.release().unwrap_err(),
            Error::OsCallFailed(Status::from_errno(libc::EPERM))
        );

        h.set_protect_from_close(false).unwrap();
        h.set_inherit(false).unwrap();
        assert_eq!(host.flags(5), HandleFlags::empty());
    }

    #[test]
    fn flags_query_failure() {
        let host = MockHost::default();
        host.fail_queries(5);

        let h = handle(&host, 5, false);
        let denied = Error::OsCallFailed(Status::from_errno(libc::EACCES));
        assert_eq!(h.query_flags().unwrap_err(), denied);
        assert_eq!(h.inherit().unwrap_err(), denied);
        assert_eq!(h.set_inherit(true).unwrap_err(), denied);

        // The read half of the update failed, so nothing was written.
        assert_eq!(host.flags(5), HandleFlags::empty());
        assert_eq!(host.queries().len(), 3);
    }

    #[test]
    fn type_name_cached() {
        let host = MockHost::default();
        host.set_type_name(5, "Event");

        let h = handle(&host, 5, false);
        assert_eq!(h.type_name().unwrap(), "Event");
        assert_eq!(h.type_name().unwrap(), "Event");
        assert_eq!(host.queries(), [(5, InfoClass::TypeInformation)]);
    }

    #[test]
    fn type_name_failure() {
        let host = MockHost::default();
        let h = handle(&host, 6, false);
        assert_eq!(
            h.type_name().unwrap_err(),
            Error::OsCallFailed(Status::from_errno(libc::EBADF))
        );
    }

    #[test]
    fn type_name_no_retry() {
        let host = MockHost::default();
        host.set_limits(Limits {
            type_name_query_size: 64,
            ..Limits::default()
        });
        host.set_type_name(5, "ALongObjectTypeNameThatDoesNotFit");

        let h = handle(&host, 5, false);
        assert_eq!(
            h.type_name().unwrap_err(),
            Error::OsCallFailed(Status::from_errno(libc::ERANGE))
        );
        assert_eq!(host.queries().len(), 1);
    }
}
