//! Error taxonomy for allocator operations.

use std::fmt;
use std::io;

/// Result alias used by every fallible allocator operation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors reported by allocator operations.
///
/// Corruption variants are never recovered from within the reporting call;
/// the operation refuses and leaves the block graph untouched. `OutOfMemory`
/// leaves the allocator fully usable.
#[derive(Debug)]
pub enum AllocError {
    /// Null handle, zero-sized request, misaligned pointer, or arithmetic
    /// overflow while computing a block size.
    InvalidArgument,
    /// No free block satisfies the request and the managed region is fixed.
    OutOfMemory,
    /// A header's magic sentinel did not match.
    MagicMismatch,
    /// The trailing canary of a block was altered.
    CanaryMismatch,
    /// `free` called on a block already on a free list.
    DoubleFree,
    /// The pointer is neither inside the managed region nor a live large
    /// mapping.
    UnmanagedPointer,
    /// The OS refused a mapping or unmapping request.
    Os(io::Error),
}

impl AllocError {
    /// Returns true for the corruption family of errors
    /// (magic, canary, double free, unmanaged pointer).
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::MagicMismatch | Self::CanaryMismatch | Self::DoubleFree | Self::UnmanagedPointer
        )
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::MagicMismatch => write!(f, "header magic mismatch"),
            Self::CanaryMismatch => write!(f, "trailing canary mismatch"),
            Self::DoubleFree => write!(f, "double free"),
            Self::UnmanagedPointer => write!(f, "pointer not managed by this allocator"),
            Self::Os(err) => write!(f, "os mapping failure: {err}"),
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Os(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for AllocError {
    fn from(err: io::Error) -> Self {
        Self::Os(err)
    }
}
