// SPDX-License-Identifier: Apache-2.0

use super::NativeHandle;
use crate::buffer::{RawBuffer, Region};
use crate::host::{Host, System};
use crate::{Error, Result};

use core::mem::size_of;
use core::ptr::NonNull;

use tracing::warn;

const SLOT: usize = size_of::<usize>();

/// A packed array of raw handle values that owns the handles it lists
///
/// The memory holds one pointer-sized slot per handle, in order, ready to be
/// passed to a host call expecting a handle array.
#[derive(Debug)]
pub struct HandleListBuffer<H: Host = System> {
    buffer: RawBuffer<H>,
    handles: Vec<NativeHandle<H>>,
}

impl HandleListBuffer {
    /// Lists `handles` in memory from the [`System`] host.
    #[inline]
    pub fn new(handles: Vec<NativeHandle>) -> Result<Self> {
        Self::new_in(handles, System::default())
    }
}

impl<H: Host> HandleListBuffer<H> {
    /// Lists `handles` in memory from `host`, taking ownership of them.
    ///
    /// Ownership passes on the call itself: if the slots cannot be allocated
    /// the handles are released before the error is returned.
    pub fn new_in(handles: Vec<NativeHandle<H>>, host: H) -> Result<Self> {
        let length = handles
            .len()
            .checked_mul(SLOT)
            .ok_or(Error::AllocationFailure { size: usize::MAX })?;

        let mut buffer = RawBuffer::allocate_in(length, host)?;
        for (i, handle) in handles.iter().enumerate() {
            // Raw values are stored bit for bit.
            let slot = handle.raw() as usize;
            buffer.write_bytes(i * SLOT, &slot.to_ne_bytes())?;
        }

        Ok(Self { buffer, handles })
    }

    /// Returns the number of listed handles.
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no handles are listed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Borrows the listed handles in slot order.
    #[inline]
    pub fn handles(&self) -> &[NativeHandle<H>] {
        &self.handles
    }

    /// Returns the address of the first slot, or null once released.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    /// Releases every handle, then frees the slots.
    ///
    /// A failing handle does not stop the others from being released. The
    /// first failure is returned once all handles are processed.
    pub fn release(&mut self) -> Result<()> {
        let mut first = None;

        for mut handle in self.handles.drain(..) {
            if let Err(e) = handle.release() {
                warn!(handle = handle.raw(), error = %e, "failed to release listed handle");
                first.get_or_insert(e);
            }
        }

        self.buffer.release();
        first.map_or(Ok(()), Err)
    }
}

impl<H: Host> Drop for HandleListBuffer<H> {
    fn drop(&mut self) {
        // Failures were already logged per handle.
        let _ = self.release();
    }
}

unsafe impl<H: Host> Region for HandleListBuffer<H> {
    type Host = H;

    #[inline]
    fn host(&self) -> &H {
        self.buffer.host()
    }

    #[inline]
    fn base(&self) -> Option<NonNull<u8>> {
        Region::base(&self.buffer)
    }

    #[inline]
    fn len(&self) -> usize {
        self.buffer.len()
    }
}
