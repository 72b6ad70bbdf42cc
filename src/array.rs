// SPDX-License-Identifier: Apache-2.0

//! Fixed-length arrays of structures

use crate::buffer::{window, RawBuffer, Region};
use crate::host::{Host, System};
use crate::structured::Structure;
use crate::{utils, Error, Result};

use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

/// An owned array of `T` marshaled back to back
#[derive(Debug)]
pub struct FixedArrayBuffer<T: Structure, H: Host = System> {
    buffer: RawBuffer<H>,
    count: usize,
    phantom: PhantomData<T>,
}

impl<T: Structure> FixedArrayBuffer<T> {
    /// Marshals `values` into a new buffer from the [`System`] host.
    #[inline]
    pub fn new(values: &[T]) -> Result<Self> {
        Self::new_in(values, System::default())
    }
}

impl<T: Structure, H: Host> FixedArrayBuffer<T, H> {
    /// Marshals `values` into a new buffer from `host`.
    pub fn new_in(values: &[T], host: H) -> Result<Self> {
        let length = values
            .len()
            .checked_mul(size_of::<T>())
            .ok_or(Error::AllocationFailure { size: usize::MAX })?;

        let mut this = Self {
            buffer: RawBuffer::allocate_in(length, host)?,
            count: values.len(),
            phantom: PhantomData,
        };

        for (i, value) in values.iter().enumerate() {
            this.set(i, *value)?;
        }

        Ok(this)
    }

    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the array has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Borrows the underlying [`RawBuffer`].
    #[inline]
    pub fn as_raw(&self) -> &RawBuffer<H> {
        &self.buffer
    }

    fn offset(&self, index: usize) -> Result<usize> {
        if index >= self.count {
            return Err(Error::OffsetOutOfRange {
                offset: index.saturating_mul(size_of::<T>()),
                count: size_of::<T>(),
                length: self.buffer.len(),
            });
        }

        Ok(index * size_of::<T>())
    }

    /// Unmarshals the element at `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        let offset = self.offset(index)?;
        utils::read_struct(&self.buffer, offset)
    }

    /// Marshals `value` over the element at `index`.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let offset = self.offset(index)?;
        utils::write_struct(&mut self.buffer, offset, value)
    }

    /// Unmarshals every element.
    pub fn result(&self) -> Result<Vec<T>> {
        if !self.buffer.is_valid() {
            return Err(Error::Disposed);
        }

        (0..self.count).map(|i| self.get(i)).collect()
    }

    /// Tears down each element in place and frees the memory if owned.
    pub fn release(&mut self) {
        if self.buffer.owns() {
            for i in 0..self.count {
                if let Ok(element) = window(&self.buffer, i * size_of::<T>(), size_of::<T>()) {
                    // SAFETY: the element lies within the live buffer.
                    unsafe { T::teardown(element.as_ptr().cast(), self.buffer.host()) };
                }
            }
        }

        self.count = 0;
        self.buffer.release();
    }
}

impl<T: Structure, H: Host> Drop for FixedArrayBuffer<T, H> {
    fn drop(&mut self) {
        self.release()
    }
}

unsafe impl<T: Structure, H: Host> Region for FixedArrayBuffer<T, H> {
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
