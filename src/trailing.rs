// SPDX-License-Identifier: Apache-2.0

//! Structures followed by a counted array of elements
//!
//! Many OS structures are laid out as a fixed header whose last field marks
//! the start of a variably sized array. [`VariableLength`] splits such a
//! value into its header and its elements; [`TrailingArrayBuffer`] marshals
//! the header at offset zero and the elements contiguously from the header's
//! data offset, keeping the element count alongside the buffer.

use crate::buffer::Region;
use crate::host::{Host, System};
use crate::structured::{StructuredBuffer, Structure};
use crate::{utils, Error, Result};

use core::mem::size_of;
use core::ptr::NonNull;

/// A value made of a fixed header and a trailing array
pub trait VariableLength: Sized {
    /// The fixed part; must declare a [`DataStart`](crate::DataStart)
    type Header: Structure;

    /// The array element
    type Element: Structure;

    /// Splits the value; `None` means the array reference is absent.
    fn split(self) -> (Self::Header, Option<Vec<Self::Element>>);

    /// Rebuilds a value from its parts.
    fn join(header: Self::Header, elements: Vec<Self::Element>) -> Self;
}

/// An owned [`VariableLength`] value in native memory
#[derive(Debug)]
pub struct TrailingArrayBuffer<V: VariableLength, H: Host = System> {
    inner: StructuredBuffer<V::Header, H>,
    count: usize,
}

impl<V: VariableLength> TrailingArrayBuffer<V> {
    /// Marshals `value` into a new buffer from the [`System`] host.
    #[inline]
    pub fn new(value: V) -> Result<Self> {
        Self::new_in(value, System::default())
    }
}

impl<V: VariableLength, H: Host> TrailingArrayBuffer<V, H> {
    /// Marshals `value` into a new buffer from `host`.
    ///
    /// Fails with [`Error::TypeMismatch`] when the header declares no data
    /// start or the element type has no size, and with [`Error::NullData`]
    /// when the value carries no array.
    pub fn new_in(value: V, host: H) -> Result<Self> {
        if V::Header::DATA_START.is_none() {
            return Err(Error::TypeMismatch("header declares no data start field"));
        }

        let element = size_of::<V::Element>();
        if element == 0 {
            return Err(Error::TypeMismatch("array element has no fixed size"));
        }

        let (header, elements) = value.split();
        let elements = elements.ok_or(Error::NullData)?;
        let bytes = elements
            .len()
            .checked_mul(element)
            .ok_or(Error::AllocationFailure { size: usize::MAX })?;

        let mut inner = StructuredBuffer::with_additional_in(header, bytes, false, host)?;
        let offset = inner.data_offset();
        for (i, e) in elements.iter().enumerate() {
            utils::write_struct(&mut inner, offset + i * element, *e)?;
        }

        Ok(Self {
            inner,
            count: elements.len(),
        })
    }

    /// Returns the number of trailing elements.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Borrows the underlying [`StructuredBuffer`].
    #[inline]
    pub fn as_structured(&self) -> &StructuredBuffer<V::Header, H> {
        &self.inner
    }

    /// Unmarshals the header.
    #[inline]
    pub fn header(&self) -> Result<V::Header> {
        self.inner.result()
    }

    /// Unmarshals the `count()` trailing elements.
    pub fn elements(&self) -> Result<Vec<V::Element>> {
        let offset = self.inner.data_offset();
        let element = size_of::<V::Element>();

        (0..self.count)
            .map(|i| utils::read_struct(&self.inner, offset + i * element))
            .collect()
    }

    /// Unmarshals the header and its elements back into a value.
    pub fn result(&self) -> Result<V> {
        let header = self.header()?;
        let elements = self.elements()?;
        Ok(V::join(header, elements))
    }

    /// Transfers the buffer, and its ownership, to a new instance.
    pub fn detach(&mut self) -> Result<Self> {
        let inner = self.inner.detach()?;
        let count = core::mem::replace(&mut self.count, 0);
        Ok(Self { inner, count })
    }

    /// Tears down the header and frees the memory if owned.
    #[inline]
    pub fn release(&mut self) {
        self.count = 0;
        self.inner.release()
    }
}

unsafe impl<V: VariableLength, H: Host> Region for TrailingArrayBuffer<V, H> {
    type Host = H;

    #[inline]
    fn host(&self) -> &H {
        self.inner.host()
    }

    #[inline]
    fn base(&self) -> Option<NonNull<u8>> {
        self.inner.base()
    }

    #[inline]
    fn len(&self) -> usize {
        Region::len(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use crate::DataStart;

    use core::mem::offset_of;

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    #[repr(C)]
    struct GroupsHeader {
        count: u32,
        reserved: u32,
        groups: [Group; 1],
    }

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    #[repr(C)]
    struct Group {
        sid: u64,
        attributes: u64,
    }

    unsafe impl Structure for Group {}

    unsafe impl Structure for GroupsHeader {
        const DATA_START: Option<DataStart> = Some(DataStart::new(
            offset_of!(GroupsHeader, groups),
            size_of::<[Group; 1]>(),
            true,
        ));
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Groups {
        groups: Option<Vec<Group>>,
    }

    impl VariableLength for Groups {
        type Header = GroupsHeader;
        type Element = Group;

        fn split(self) -> (GroupsHeader, Option<Vec<Group>>) {
            let count = self.groups.as_ref().map_or(0, Vec::len) as u32;
            let header = GroupsHeader {
                count,
                ..Default::default()
            };
            (header, self.groups)
        }

        fn join(header: GroupsHeader, elements: Vec<Group>) -> Self {
            assert_eq!(header.count as usize, elements.len());
            Self {
                groups: Some(elements),
            }
        }
    }

    #[derive(Copy, Clone, Debug)]
    #[repr(C)]
    struct NoStart {
        count: u32,
    }

    unsafe impl Structure for NoStart {}

    #[derive(Debug)]
    struct Unstarted;

    impl VariableLength for Unstarted {
        type Header = NoStart;
        type Element = u32;

        fn split(self) -> (NoStart, Option<Vec<u32>>) {
            (NoStart { count: 0 }, Some(vec![]))
        }

        fn join(_: NoStart, _: Vec<u32>) -> Self {
            Self
        }
    }

    #[derive(Debug)]
    struct Markers;

    impl VariableLength for Markers {
        type Header = GroupsHeader;
        type Element = [u8; 0];

        fn split(self) -> (GroupsHeader, Option<Vec<[u8; 0]>>) {
            (GroupsHeader::default(), Some(vec![[]; 3]))
        }

        fn join(_: GroupsHeader, _: Vec<[u8; 0]>) -> Self {
            Self
        }
    }

    fn groups(n: u64) -> Vec<Group> {
        (0..n)
            .map(|i| Group {
                sid: 0x0105_0000_0000_0000 + i,
                attributes: 7,
            })
            .collect()
    }

    #[test]
    fn five_elements() {
        let original = groups(5);
        let buffer = TrailingArrayBuffer::new(Groups {
            groups: Some(original.clone()),
        })
        .unwrap();

        assert_eq!(buffer.count(), 5);
        assert_eq!(buffer.header().unwrap().count, 5);

        let offset = offset_of!(GroupsHeader, groups);
        assert_eq!(
            buffer.as_structured().len(),
            offset + 5 * size_of::<Group>()
        );

        let result = buffer.result().unwrap();
        assert_eq!(result.groups.as_deref(), Some(&original[..]));
    }

    #[test]
    fn empty_array() {
        let buffer = TrailingArrayBuffer::new(Groups { groups: Some(vec![]) }).unwrap();
        assert_eq!(buffer.count(), 0);
        assert!(Region::len(&buffer) >= size_of::<GroupsHeader>());
        assert_eq!(buffer.result().unwrap().groups, Some(vec![]));
    }

    #[test]
    fn null_data() {
        let err = TrailingArrayBuffer::new(Groups { groups: None }).unwrap_err();
        assert_eq!(err, Error::NullData);
    }

    #[test]
    fn no_data_start() {
        let err = TrailingArrayBuffer::new(Unstarted).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn zero_sized_element() {
        let host = MockHost::default();
        let err = TrailingArrayBuffer::new_in(Markers, host.clone()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
        assert_eq!(host.live_allocations(), 0);
    }

    #[test]
    fn detach_and_release() {
        let host = MockHost::default();
        let mut buffer = TrailingArrayBuffer::new_in(
            Groups {
                groups: Some(groups(3)),
            },
            host.clone(),
        )
        .unwrap();

        let moved = buffer.detach().unwrap();
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.header().unwrap_err(), Error::Disposed);
        assert_eq!(moved.elements().unwrap(), groups(3));

        buffer.release();
        assert_eq!(host.live_allocations(), 1);
        drop(moved);
        assert_eq!(host.live_allocations(), 0);
    }
}
