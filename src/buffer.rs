// SPDX-License-Identifier: Apache-2.0

//! Owned blocks of native memory and borrowed views into them
//!
//! A [`RawBuffer`] is the single owner of one host allocation. Ownership can
//! be handed to a new instance with [`RawBuffer::detach`], after which the
//! source is null and never frees. A [`View`] borrows a window of any
//! [`Region`] and has no release path at all.
//!
//! ```
//! use nativemem::RawBuffer;
//!
//! let mut buffer = RawBuffer::allocate(16).unwrap();
//! buffer.write_bytes(4, b"sally").unwrap();
//!
//! let mut moved = buffer.detach(None).unwrap();
//! assert!(!buffer.is_valid());
//! assert_eq!(moved.read_bytes(4, 5).unwrap(), b"sally");
//!
//! moved.resize(64).unwrap();
//! assert_eq!(moved.read_bytes(4, 5).unwrap(), b"sally");
//! ```

use crate::host::{Host, System};
use crate::{utils, Error, Result};

use core::marker::PhantomData;
use core::mem::replace;
use core::ptr::{self, NonNull};
use core::slice::{from_raw_parts, from_raw_parts_mut};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::trace;

/// A contiguous block of native memory with a known length.
///
/// # Safety
///
/// When `base()` returns `Some(ptr)`, `ptr` must be valid for reads and writes
/// of `len()` bytes for as long as the implementor is borrowed.
pub unsafe trait Region {
    /// Host owning the primitives used on this memory
    type Host: Host;

    /// Returns the host of this region.
    fn host(&self) -> &Self::Host;

    /// Returns the base address, or `None` once the memory was released.
    fn base(&self) -> Option<NonNull<u8>>;

    /// Returns the length in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the region has a length of zero.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns the address of `count` bytes at `offset` within `region`.
#[inline]
pub(crate) fn window<R: Region + ?Sized>(
    region: &R,
    offset: usize,
    count: usize,
) -> Result<NonNull<u8>> {
    let base = region.base().ok_or(Error::Disposed)?;
    let length = region.len();

    match offset.checked_add(count) {
        Some(end) if end <= length => {}
        _ => {
            return Err(Error::OffsetOutOfRange {
                offset,
                count,
                length,
            })
        }
    }

    // SAFETY: `offset + count <= len()`, so the result stays within the block.
    Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) })
}

/// The sole owner (or a declared non-owner) of a block of native memory
///
/// Releasing an owning buffer frees the block through its [`Host`]; this
/// happens on [`RawBuffer::release`] or when the buffer is dropped, whichever
/// comes first.
#[derive(Debug)]
pub struct RawBuffer<H: Host = System> {
    addr: AtomicPtr<u8>,
    len: AtomicUsize,
    owns: bool,
    host: H,
}

impl RawBuffer {
    /// Allocates an owning buffer of `length` bytes from the [`System`] host.
    #[inline]
    pub fn allocate(length: usize) -> Result<Self> {
        Self::allocate_in(length, System::default())
    }
}

impl<H: Host> RawBuffer<H> {
    /// Allocates an owning buffer of `length` zeroed bytes from `host`.
    pub fn allocate_in(length: usize, host: H) -> Result<Self> {
        let addr = allocate_block(&host, length)?;
        trace!("allocated {length} bytes at {:p}", addr.as_ptr());

        Ok(Self {
            addr: AtomicPtr::new(addr.as_ptr()),
            len: AtomicUsize::new(length),
            owns: true,
            host,
        })
    }

    /// Adopts an existing block.
    ///
    /// A null `addr` produces an invalid buffer of length zero.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads and writes of `length` initialized bytes
    /// while the buffer is alive. When `owns` is `true`, `addr` must have been returned
    /// by `host`'s allocator and no other owner may free it.
    pub unsafe fn wrap(addr: *mut u8, length: usize, owns: bool, host: H) -> Self {
        let length = if addr.is_null() { 0 } else { length };

        Self {
            addr: AtomicPtr::new(addr),
            len: AtomicUsize::new(length),
            owns,
            host,
        }
    }

    /// Returns the length in bytes, zero once released.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Returns `true` if the buffer has a length of zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while the buffer refers to memory.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.as_ptr().is_null()
    }

    /// Returns `true` if releasing this buffer frees its memory.
    #[inline]
    pub fn owns(&self) -> bool {
        self.owns
    }

    /// Returns the base address, null once released.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.load(Ordering::SeqCst)
    }

    /// Returns the host backing this buffer.
    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Borrows the contents.
    pub fn as_slice(&self) -> Result<&[u8]> {
        let base = self.base().ok_or(Error::Disposed)?;
        // SAFETY: the block is valid for `len()` bytes while `self` is borrowed.
        Ok(unsafe { from_raw_parts(base.as_ptr(), self.len()) })
    }

    /// Borrows the contents mutably.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let base = self.base().ok_or(Error::Disposed)?;
        // SAFETY: the block is valid for `len()` bytes while `self` is borrowed.
        Ok(unsafe { from_raw_parts_mut(base.as_ptr(), self.len()) })
    }

    /// Copies `count` bytes starting at `offset` out of the buffer.
    #[inline]
    pub fn read_bytes(&self, offset: usize, count: usize) -> Result<Vec<u8>> {
        utils::read_bytes(self, offset, count)
    }

    /// Fills `dst` with the bytes starting at `offset`.
    #[inline]
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        utils::read_into(self, offset, dst)
    }

    /// Copies `src` into the buffer starting at `offset`.
    #[inline]
    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        utils::write_bytes(self, offset, src)
    }

    /// Borrows `length` bytes starting at `offset` as a [`View`].
    #[inline]
    pub fn view(&mut self, offset: usize, length: usize) -> Result<View<'_, H>> {
        utils::view(self, offset, length)
    }

    /// Moves the contents into a new block of `new_length` bytes.
    ///
    /// The first `min(len(), new_length)` bytes are preserved; the rest of a
    /// grown block is zeroed. The new address and length are published
    /// so that no observer sees a length larger than the block behind the
    /// address it observed: a growing buffer publishes the address first, a
    /// shrinking one the length first.
    pub fn resize(&mut self, new_length: usize) -> Result<()> {
        let old = self.base().ok_or(Error::Disposed)?;
        if !self.owns {
            return Err(Error::NotOwner);
        }

        let old_length = self.len();
        let new = allocate_block(&self.host, new_length)?;

        // SAFETY: both blocks hold at least `min(old_length, new_length)` bytes
        // and come from distinct allocations.
        unsafe { self.host.copy(new, old, old_length.min(new_length)) };

        if new_length >= old_length {
            self.addr.store(new.as_ptr(), Ordering::SeqCst);
            self.len.store(new_length, Ordering::SeqCst);
        } else {
            self.len.store(new_length, Ordering::SeqCst);
            self.addr.store(new.as_ptr(), Ordering::SeqCst);
        }

        trace!(
            "resized {:p} ({old_length} bytes) to {:p} ({new_length} bytes)",
            old.as_ptr(),
            new.as_ptr()
        );

        // SAFETY: the old block is no longer reachable through `self`.
        unsafe { self.host.free(old, old_length.max(1)) };
        Ok(())
    }

    /// Transfers the block, and its ownership, to a new buffer.
    ///
    /// The source becomes null, non-owning and empty. When `new_length` is
    /// given the returned buffer records that length, which must not exceed
    /// the current one.
    pub fn detach(&mut self, new_length: Option<usize>) -> Result<Self> {
        if !self.is_valid() {
            return Err(Error::Disposed);
        }

        let length = self.len();
        let new_length = new_length.unwrap_or(length);
        if new_length > length {
            return Err(Error::InvalidLength {
                requested: new_length,
                length,
            });
        }

        let addr = self.addr.swap(ptr::null_mut(), Ordering::SeqCst);
        self.len.store(0, Ordering::SeqCst);
        let owns = replace(&mut self.owns, false);
        trace!("detached {addr:p} ({new_length} bytes, owns={owns})");

        Ok(Self {
            addr: AtomicPtr::new(addr),
            len: AtomicUsize::new(new_length),
            owns,
            host: self.host.clone(),
        })
    }

    /// Frees the block if this buffer owns it, and invalidates the buffer.
    ///
    /// Calling this on an already released buffer does nothing.
    pub fn release(&mut self) {
        let addr = self.addr.swap(ptr::null_mut(), Ordering::SeqCst);
        let length = self.len.swap(0, Ordering::SeqCst);
        let owns = replace(&mut self.owns, false);

        if let Some(addr) = NonNull::new(addr) {
            if owns {
                trace!("freeing {length} bytes at {:p}", addr.as_ptr());
                // SAFETY: this buffer was the sole owner of the block.
                unsafe { self.host.free(addr, length.max(1)) };
            }
        }
    }
}

/// Requests a zeroed block that is never null, even for `length == 0`.
fn allocate_block<H: Host>(host: &H, length: usize) -> Result<NonNull<u8>> {
    if length > host.limits().max_allocation {
        return Err(Error::AllocationFailure { size: length });
    }

    let size = length.max(1);
    let block = host.allocate(size)?;
    // SAFETY: the host just handed out `size` writable bytes.
    unsafe { host.zero(block, size) };
    Ok(block)
}

impl<H: Host> Drop for RawBuffer<H> {
    fn drop(&mut self) {
        self.release()
    }
}

unsafe impl<H: Host> Region for RawBuffer<H> {
    type Host = H;

    #[inline]
    fn host(&self) -> &H {
        &self.host
    }

    #[inline]
    fn base(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.as_ptr())
    }

    #[inline]
    fn len(&self) -> usize {
        RawBuffer::len(self)
    }
}

/// A non-owning window into another [`Region`]
///
/// A view is valid only while its source is borrowed; writes through it are
/// visible through the source once the view is gone.
#[derive(Debug)]
pub struct View<'a, H: Host = System> {
    base: NonNull<u8>,
    len: usize,
    host: &'a H,
    phantom: PhantomData<&'a mut [u8]>,
}

impl<'a, H: Host> View<'a, H> {
    /// Creates a view.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for `'a`.
    #[inline]
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize, host: &'a H) -> Self {
        Self {
            base,
            len,
            host,
            phantom: PhantomData,
        }
    }

    /// Returns the base address.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Returns the length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the view has a length of zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the viewed bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed by the constructor.
        unsafe { from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Borrows the viewed bytes mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed by the constructor.
        unsafe { from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

unsafe impl<H: Host> Region for View<'_, H> {
    type Host = H;

    #[inline]
    fn host(&self) -> &H {
        self.host
    }

    #[inline]
    fn base(&self) -> Option<NonNull<u8>> {
        Some(self.base)
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}
