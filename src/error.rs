// SPDX-License-Identifier: Apache-2.0

//! Error type shared by every buffer and handle wrapper

use crate::host::Status;

/// Error type used within this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The host allocator refused the request
    #[error("host refused to allocate {size} bytes")]
    AllocationFailure {
        /// Number of bytes requested
        size: usize,
    },

    /// A resize or detach asked for more bytes than the source holds
    #[error("requested length {requested} exceeds buffer length {length}")]
    InvalidLength {
        /// Length asked for
        requested: usize,

        /// Length of the source buffer
        length: usize,
    },

    /// A read, write or view window does not fit the buffer
    #[error("{count} bytes at offset {offset} exceed buffer length {length}")]
    OffsetOutOfRange {
        /// Start of the window
        offset: usize,

        /// Size of the window
        count: usize,

        /// Length of the buffer
        length: usize,
    },

    /// The buffer or handle has already been released
    #[error("buffer or handle has been released")]
    Disposed,

    /// The operation needs to free memory the wrapper does not own
    #[error("buffer does not own its memory")]
    NotOwner,

    /// The structure layout cannot carry trailing array data
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),

    /// A required trailing array was absent
    #[error("required array data is missing")]
    NullData,

    /// An object query, set or close call reported failure
    #[error("OS call failed: {0}")]
    OsCallFailed(Status),
}

/// Result type returned by functionality exposed by this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Error::OffsetOutOfRange {
                offset: 8,
                count: 4,
                length: 10
            }
            .to_string(),
            "4 bytes at offset 8 exceed buffer length 10"
        );
        assert_eq!(
            Error::OsCallFailed(Status::from_errno(libc::EBADF)).to_string(),
            format!("OS call failed: {}", Status::from_errno(libc::EBADF))
        );
    }
}
