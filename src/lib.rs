// SPDX-License-Identifier: Apache-2.0

//! Owned native memory and OS handles for interop code
//!
//! `nativemem` manages memory handed to, or received from, OS calls that take
//! raw addresses: plain byte blocks, `#[repr(C)]` structures with trailing
//! data, structures ending in a counted array, and fixed arrays of structures.
//! Alongside it wraps OS object handles so that an owned handle is closed
//! exactly once.
//!
//! # Ownership
//!
//! Every buffer either *owns* its memory, and frees it when released or
//! dropped, or merely refers to memory owned elsewhere. Ownership moves with
//! [`RawBuffer::detach`]; the source is left empty. Sub-ranges are borrowed as
//! a [`View`], which never frees anything and cannot outlive its owner.
//!
//! # Hosts
//!
//! The primitives underneath (allocation, memory set/copy, handle close and
//! the object information calls) come from a [`Host`]. [`System`] is the
//! current process, which is the default for every type.
//!
//! ```
//! use nativemem::{FixedArrayBuffer, RawBuffer, Region};
//!
//! let mut raw = RawBuffer::allocate(4).unwrap();
//! raw.write_bytes(0, &[1, 2, 3, 4]).unwrap();
//!
//! let array = FixedArrayBuffer::new(&[7u16, 8, 9]).unwrap();
//! assert_eq!(Region::len(&array), 6);
//! assert_eq!(array.get(1).unwrap(), 8);
//! ```

#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod array;
pub mod buffer;
pub mod error;
pub mod handle;
pub mod host;
pub mod structured;
pub mod trailing;
pub mod utils;

pub use array::FixedArrayBuffer;
pub use buffer::{RawBuffer, Region, View};
pub use error::{Error, Result};
pub use handle::{HandleFlags, HandleListBuffer, NativeHandle};
pub use host::{Host, InfoClass, RawHandle, Status, System};
pub use structured::{DataStart, Descriptor, StructView, Structure, StructuredBuffer};
pub use trailing::{TrailingArrayBuffer, VariableLength};

pub use nativemem_config::{ConfigError, Limits, CONFIG_TEMPLATE};
