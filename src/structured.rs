// SPDX-License-Identifier: Apache-2.0

//! Typed structure overlays on native memory
//!
//! A [`StructuredBuffer`] holds one `#[repr(C)]` structure at offset zero,
//! optionally followed by trailing bytes. Where the trailing data begins is
//! declared statically through [`Structure::DATA_START`].
//!
//! ```
//! use core::mem::size_of;
//! use nativemem::{DataStart, Structure, StructuredBuffer};
//!
//! #[derive(Copy, Clone, Debug, Default, PartialEq)]
//! #[repr(C)]
//! struct Names {
//!     count: u32,
//!     first: [u16; 0],
//! }
//!
//! unsafe impl Structure for Names {
//!     const DATA_START: Option<DataStart> = Some(DataStart::new(size_of::<u32>(), 0, true));
//! }
//!
//! let mut buffer = StructuredBuffer::with_additional(Names { count: 2, first: [] }, 8, false).unwrap();
//! assert_eq!(buffer.len(), 12);
//! assert_eq!(buffer.trailing_data().unwrap().len(), 8);
//! assert_eq!(buffer.result().unwrap().count, 2);
//! ```

use crate::buffer::{window, RawBuffer, Region, View};
use crate::host::{Host, System};
use crate::{utils, Error, Result};

use core::marker::PhantomData;
use core::mem::{align_of, replace, size_of};
use core::ptr::NonNull;

/// Location of the field where a structure's trailing data begins
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataStart {
    /// Byte offset of the field within the structure
    pub offset: usize,

    /// Size in bytes of the field
    pub size: usize,

    /// The field's own bytes are the first bytes of the trailing data
    ///
    /// When `false`, the trailing data starts right after the field.
    pub included: bool,
}

impl DataStart {
    /// Declares a data start field.
    #[inline]
    pub const fn new(offset: usize, size: usize, included: bool) -> Self {
        Self {
            offset,
            size,
            included,
        }
    }

    /// Returns the byte offset where trailing data begins.
    #[inline]
    pub const fn data_offset(&self) -> usize {
        if self.included {
            self.offset
        } else {
            self.offset + self.size
        }
    }
}

/// Static layout facts about a [`Structure`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Fixed size of the structure in bytes
    pub size: usize,

    /// Alignment of the structure
    pub align: usize,

    /// The declared data start field, if any
    pub data_start: Option<DataStart>,
}

impl Descriptor {
    /// Returns the descriptor of `T`.
    #[inline]
    pub const fn of<T: Structure>() -> Self {
        Self {
            size: size_of::<T>(),
            align: align_of::<T>(),
            data_start: T::DATA_START,
        }
    }

    /// Returns the byte offset where trailing data begins.
    ///
    /// Without a data start field the trailing data follows the structure.
    #[inline]
    pub const fn data_offset(&self) -> usize {
        match self.data_start {
            Some(start) => start.data_offset(),
            None => self.size,
        }
    }
}

/// A plain-data structure that can be marshaled into native memory.
///
/// Marshaling is a byte copy; structures are read and written unaligned.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or primitive) without padding bytes,
/// so every byte of a marshaled copy is initialized; spell out padding as
/// reserved fields. Every bit pattern a host call may write must be a valid
/// value. A declared `DATA_START` must lie within the structure.
pub unsafe trait Structure: Copy + 'static {
    /// Field marking where trailing data begins
    const DATA_START: Option<DataStart> = None;

    /// Releases native resources referenced by a marshaled copy.
    ///
    /// Called on the in-buffer copy right before the owning buffer frees its
    /// memory.
    ///
    /// # Safety
    ///
    /// `this` points to a marshaled copy inside a live buffer; it may be
    /// unaligned. Called at most once per copy.
    #[inline]
    unsafe fn teardown<H: Host>(_this: *mut Self, _host: &H) {}
}

macro_rules! primitive {
    ($($t:ty),+ $(,)?) => {
        $(
            unsafe impl Structure for $t {}
        )+
    };
}

primitive!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

unsafe impl<T: Structure, const N: usize> Structure for [T; N] {}

/// An owned structure of type `T` followed by optional trailing bytes
#[derive(Debug)]
pub struct StructuredBuffer<T: Structure, H: Host = System> {
    buffer: RawBuffer<H>,
    length: usize,
    phantom: PhantomData<T>,
}

impl<T: Structure> StructuredBuffer<T> {
    /// Marshals `value` into a new buffer from the [`System`] host.
    #[inline]
    pub fn new(value: T) -> Result<Self> {
        Self::new_in(value, System::default())
    }

    /// Marshals `value` into a new buffer with room for trailing data.
    ///
    /// See [`StructuredBuffer::with_additional_in`].
    #[inline]
    pub fn with_additional(
        value: T,
        additional: usize,
        additional_includes_header: bool,
    ) -> Result<Self> {
        Self::with_additional_in(value, additional, additional_includes_header, System::default())
    }
}

impl<T: Structure, H: Host> StructuredBuffer<T, H> {
    /// Marshals `value` into a new buffer from `host`.
    #[inline]
    pub fn new_in(value: T, host: H) -> Result<Self> {
        Self::with_additional_in(value, 0, false, host)
    }

    /// Marshals `value` into a new buffer from `host` with room for trailing data.
    ///
    /// With `additional_includes_header` the logical length is `additional`
    /// itself; otherwise it is the data offset plus `additional`. The
    /// allocation never drops below the size of `T`.
    pub fn with_additional_in(
        value: T,
        additional: usize,
        additional_includes_header: bool,
        host: H,
    ) -> Result<Self> {
        let length = if additional_includes_header {
            additional
        } else {
            Self::descriptor()
                .data_offset()
                .checked_add(additional)
                .ok_or(Error::AllocationFailure { size: usize::MAX })?
        };

        let buffer = RawBuffer::allocate_in(length.max(size_of::<T>()), host)?;
        let mut this = Self {
            buffer,
            length,
            phantom: PhantomData,
        };

        utils::write_struct(&mut this.buffer, 0, value)?;
        Ok(this)
    }

    /// Returns the descriptor of `T`.
    #[inline]
    pub const fn descriptor() -> Descriptor {
        Descriptor::of::<T>()
    }

    /// Returns the byte offset where trailing data begins.
    #[inline]
    pub fn data_offset(&self) -> usize {
        Self::descriptor().data_offset()
    }

    /// Returns the logical length: header plus requested trailing data.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the logical length is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns `true` while the buffer refers to memory.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.buffer.is_valid()
    }

    /// Borrows the underlying [`RawBuffer`].
    #[inline]
    pub fn as_raw(&self) -> &RawBuffer<H> {
        &self.buffer
    }

    /// Borrows the whole allocation, e.g. to hand it to a host call.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        self.buffer.as_mut_slice()
    }

    /// Unmarshals the structure.
    #[inline]
    pub fn result(&self) -> Result<T> {
        utils::read_struct(&self.buffer, 0)
    }

    /// Marshals `value` over the structure.
    #[inline]
    pub fn set_result(&mut self, value: T) -> Result<()> {
        utils::write_struct(&mut self.buffer, 0, value)
    }

    /// Borrows the trailing data.
    ///
    /// The view starts at the data offset and ends at the logical length; it
    /// is empty when the logical length does not reach the data offset.
    pub fn trailing_data(&mut self) -> Result<View<'_, H>> {
        let offset = self.data_offset();
        let length = self.length.saturating_sub(offset);

        if length == 0 {
            // An empty view may sit past the end of a short buffer.
            let base = self.buffer.base().ok_or(Error::Disposed)?;
            // SAFETY: a zero-length view never dereferences its base.
            return Ok(unsafe { View::new(base, 0, self.buffer.host()) });
        }

        utils::view(&mut self.buffer, offset, length)
    }

    /// Transfers the buffer, and its ownership, to a new instance.
    pub fn detach(&mut self) -> Result<Self> {
        let buffer = self.buffer.detach(None)?;

        Ok(Self {
            buffer,
            length: replace(&mut self.length, 0),
            phantom: PhantomData,
        })
    }

    /// Tears down the structure and frees the memory if owned.
    ///
    /// Calling this on an already released buffer does nothing.
    pub fn release(&mut self) {
        if self.buffer.owns() {
            if let Ok(this) = window(&self.buffer, 0, size_of::<T>()) {
                // SAFETY: the structure lies within the live buffer.
                unsafe { T::teardown(this.as_ptr().cast(), self.buffer.host()) };
            }
        }

        self.length = 0;
        self.buffer.release();
    }
}

impl<T: Structure, H: Host> Drop for StructuredBuffer<T, H> {
    fn drop(&mut self) {
        self.release()
    }
}

unsafe impl<T: Structure, H: Host> Region for StructuredBuffer<T, H> {
    type Host = H;

    #[inline]
    fn host(&self) -> &H {
        self.buffer.host()
    }

    #[inline]
    fn base(&self) -> Option<NonNull<u8>> {
        self.buffer.base()
    }

    #[inline]
    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// A non-owning structure of type `T` inside another [`Region`]
#[derive(Debug)]
pub struct StructView<'a, T: Structure, H: Host = System> {
    view: View<'a, H>,
    phantom: PhantomData<T>,
}

impl<'a, T: Structure, H: Host> StructView<'a, T, H> {
    #[inline]
    pub(crate) fn new(view: View<'a, H>) -> Self {
        Self {
            view,
            phantom: PhantomData,
        }
    }

    /// Returns the address of the structure.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.view.as_ptr()
    }

    /// Unmarshals the structure.
    #[inline]
    pub fn result(&self) -> Result<T> {
        utils::read_struct(&self.view, 0)
    }

    /// Marshals `value` over the structure.
    #[inline]
    pub fn set_result(&mut self, value: T) -> Result<()> {
        utils::write_struct(&mut self.view, 0, value)
    }
}
