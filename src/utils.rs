// SPDX-License-Identifier: Apache-2.0

//! Offset-based helpers shared by every [`Region`]

use crate::buffer::{window, Region, View};
use crate::host::Host;
use crate::structured::{Descriptor, StructView, Structure};
use crate::{Error, Result};

use core::mem::size_of;
use core::ptr::{self, NonNull};

const UNIT: usize = size_of::<u16>();

/// Copies `count` bytes starting at `offset` out of `region`.
pub fn read_bytes<R: Region + ?Sized>(
    region: &R,
    offset: usize,
    count: usize,
) -> Result<Vec<u8>> {
    let mut bytes = vec![0; count];
    read_into(region, offset, &mut bytes)?;
    Ok(bytes)
}

/// Fills `dst` with the bytes of `region` starting at `offset`.
pub fn read_into<R: Region + ?Sized>(region: &R, offset: usize, dst: &mut [u8]) -> Result<()> {
    let src = window(region, offset, dst.len())?;
    // SAFETY: `window` checked that the source holds `dst.len()` bytes.
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), dst.len()) };
    Ok(())
}

/// Copies `src` into `region` starting at `offset`.
pub fn write_bytes<R: Region + ?Sized>(region: &mut R, offset: usize, src: &[u8]) -> Result<()> {
    let dst = window(region, offset, src.len())?;
    // SAFETY: `window` checked that the destination holds `src.len()` bytes.
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len()) };
    Ok(())
}

/// Reads `count` UTF-16 code units starting at `offset`.
pub fn read_utf16_units<R: Region + ?Sized>(
    region: &R,
    offset: usize,
    count: usize,
) -> Result<Vec<u16>> {
    let bytes = count.checked_mul(UNIT).ok_or(Error::OffsetOutOfRange {
        offset,
        count: usize::MAX,
        length: region.len(),
    })?;
    let src = window(region, offset, bytes)?;

    Ok((0..count)
        // SAFETY: `window` checked that all `count` units are in bounds.
        .map(|i| unsafe { src.as_ptr().add(i * UNIT).cast::<u16>().read_unaligned() })
        .collect())
}

/// Reads a string of `count` UTF-16 code units starting at `offset`.
///
/// Unpaired surrogates are replaced with U+FFFD.
#[inline]
pub fn read_utf16<R: Region + ?Sized>(region: &R, offset: usize, count: usize) -> Result<String> {
    read_utf16_units(region, offset, count).map(|units| String::from_utf16_lossy(&units))
}

/// Writes `value` as UTF-16 code units starting at `offset`.
///
/// No terminator is written. Returns the number of code units written.
pub fn write_utf16<R: Region + ?Sized>(
    region: &mut R,
    offset: usize,
    value: &str,
) -> Result<usize> {
    let bytes: Vec<u8> = value.encode_utf16().flat_map(u16::to_ne_bytes).collect();
    write_bytes(region, offset, &bytes)?;
    Ok(bytes.len() / UNIT)
}

/// Reads a NUL-terminated UTF-16 string starting at `offset`.
///
/// The scan stops at the first zero code unit or at the end of the region,
/// whichever comes first; a missing terminator is not an error.
pub fn read_nul_utf16<R: Region + ?Sized>(region: &R, offset: usize) -> Result<String> {
    let length = region.len();
    let available = length.checked_sub(offset).ok_or(Error::OffsetOutOfRange {
        offset,
        count: 0,
        length,
    })?;

    let src = window(region, offset, available)?;
    let units: Vec<u16> = (0..available / UNIT)
        // SAFETY: every unit read lies within `available` bytes.
        .map(|i| unsafe { src.as_ptr().add(i * UNIT).cast::<u16>().read_unaligned() })
        .take_while(|unit| *unit != 0)
        .collect();

    Ok(String::from_utf16_lossy(&units))
}

/// Borrows `length` bytes of `region` starting at `offset`.
pub fn view<R: Region + ?Sized>(
    region: &mut R,
    offset: usize,
    length: usize,
) -> Result<View<'_, R::Host>> {
    let base = window(region, offset, length)?;
    let region: &R = region;
    // SAFETY: the window is in bounds and the view keeps `region` borrowed.
    Ok(unsafe { View::new(base, length, region.host()) })
}

/// Sets every byte of `region` to zero through the host primitive.
pub fn zero<R: Region + ?Sized>(region: &mut R) -> Result<()> {
    let base = region.base().ok_or(Error::Disposed)?;
    // SAFETY: the region is valid for `len()` bytes.
    unsafe { region.host().zero(base, region.len()) };
    Ok(())
}

/// Sets every byte of `region` to `value` through the host primitive.
pub fn fill<R: Region + ?Sized>(region: &mut R, value: u8) -> Result<()> {
    let base = region.base().ok_or(Error::Disposed)?;
    // SAFETY: the region is valid for `len()` bytes.
    unsafe { region.host().fill(base, region.len(), value) };
    Ok(())
}

/// Unmarshals a `T` stored at `offset`.
pub fn read_struct<T: Structure, R: Region + ?Sized>(region: &R, offset: usize) -> Result<T> {
    let src = window(region, offset, size_of::<T>())?;
    // SAFETY: in bounds, and `Structure` accepts any bit pattern.
    Ok(unsafe { src.as_ptr().cast::<T>().read_unaligned() })
}

/// Marshals `value` into `region` at `offset`.
pub fn write_struct<T: Structure, R: Region + ?Sized>(
    region: &mut R,
    offset: usize,
    value: T,
) -> Result<()> {
    let dst: NonNull<u8> = window(region, offset, size_of::<T>())?;
    // SAFETY: in bounds; unaligned writes have no alignment requirement.
    unsafe { dst.as_ptr().cast::<T>().write_unaligned(value) };
    Ok(())
}

/// Borrows the `T` stored at `offset` as a non-owning [`StructView`].
pub fn struct_at<T: Structure, R: Region + ?Sized>(
    region: &mut R,
    offset: usize,
) -> Result<StructView<'_, T, R::Host>> {
    view(region, offset, size_of::<T>()).map(StructView::new)
}

/// Returns the static layout descriptor of `T`.
#[inline]
pub const fn descriptor<T: Structure>() -> Descriptor {
    Descriptor::of::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawBuffer;

    fn utf16(value: &str) -> Vec<u8> {
        value.encode_utf16().flat_map(u16::to_ne_bytes).collect()
    }

    #[test]
    fn nul_terminated() {
        let mut buffer = RawBuffer::allocate(32).unwrap();
        zero(&mut buffer).unwrap();
        write_bytes(&mut buffer, 2, &utf16("Event")).unwrap();

        assert_eq!(read_nul_utf16(&buffer, 2).unwrap(), "Event");
        assert_eq!(read_nul_utf16(&buffer, 0).unwrap(), "");
    }

    #[test]
    fn nul_missing() {
        let mut buffer = RawBuffer::allocate(7).unwrap();
        fill(&mut buffer, 0x41).unwrap();

        // Three whole units fit; the trailing odd byte is ignored.
        assert_eq!(read_nul_utf16(&buffer, 0).unwrap(), "\u{4141}".repeat(3));
        assert_eq!(read_nul_utf16(&buffer, 7).unwrap(), "");
        assert!(matches!(
            read_nul_utf16(&buffer, 8),
            Err(Error::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn fixed_count() {
        let mut buffer = RawBuffer::allocate(16).unwrap();
        assert_eq!(write_utf16(&mut buffer, 1, "Mutant").unwrap(), 6);
        assert_eq!(read_utf16(&buffer, 1, 6).unwrap(), "Mutant");
        assert_eq!(read_utf16(&buffer, 1, 3).unwrap(), "Mut");
        assert!(read_utf16(&buffer, 1, 8).is_err());
        assert!(write_utf16(&mut buffer, 8, "Section").is_err());
    }

    #[test]
    fn zero_and_fill() {
        let mut buffer = RawBuffer::allocate(5).unwrap();
        fill(&mut buffer, 0xff).unwrap();
        assert_eq!(read_bytes(&buffer, 0, 5).unwrap(), [0xff; 5]);

        zero(&mut buffer).unwrap();
        assert_eq!(read_bytes(&buffer, 0, 5).unwrap(), [0; 5]);

        buffer.release();
        assert_eq!(zero(&mut buffer).unwrap_err(), Error::Disposed);
        assert_eq!(fill(&mut buffer, 1).unwrap_err(), Error::Disposed);
    }

    #[test]
    fn nested_views() {
        let mut buffer = RawBuffer::allocate(16).unwrap();
        zero(&mut buffer).unwrap();
        {
            let mut outer = view(&mut buffer, 4, 8).unwrap();
            let mut inner = view(&mut outer, 2, 4).unwrap();
            fill(&mut inner, 7).unwrap();
            assert!(view(&mut outer, 6, 3).is_err());
        }
        assert_eq!(
            read_bytes(&buffer, 0, 16).unwrap(),
            [0, 0, 0, 0, 0, 0, 7, 7, 7, 7, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn structs() {
        let mut buffer = RawBuffer::allocate(12).unwrap();
        write_struct(&mut buffer, 1, 0x1122_3344_u32).unwrap();
        assert_eq!(read_struct::<u32, _>(&buffer, 1).unwrap(), 0x1122_3344);
        assert!(write_struct(&mut buffer, 9, 0_u32).is_err());

        let mut view = struct_at::<u64, _>(&mut buffer, 4).unwrap();
        view.set_result(u64::MAX).unwrap();
        assert_eq!(view.result().unwrap(), u64::MAX);
        assert_eq!(descriptor::<u64>().size, 8);
    }
}
