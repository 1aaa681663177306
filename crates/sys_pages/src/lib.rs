//! Page-granular anonymous memory mapping.
//!
//! This crate wraps the platform's virtual memory primitives (`mmap` on Unix,
//! `VirtualAlloc` on Windows) behind a small RAII surface. Allocators built on
//! top of it need exactly three things: a page-aligned mapping of at least `n`
//! bytes, release of that mapping, and the system page size.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows this is typically 64KB; on Unix it equals the page size.
/// Mapping lengths are rounded up to page size by the kernel either way.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// Rounds `len` up to a whole number of pages.
#[must_use]
pub fn round_to_pages(len: usize) -> usize {
    let page = page_size();
    len.div_ceil(page) * page
}

/// A handle to an anonymous memory mapping.
///
/// The region is unmapped when the handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    ///
    /// The pointer is aligned to the system page size.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the mapping has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with length 0.
    /// A length must be set before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    ///
    /// The kernel rounds the mapped region up to whole pages; `Mmap::len`
    /// reports the requested length, not the rounded one.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to pre-populate (prefault) the page tables.
    ///
    /// On Linux, this adds `MAP_POPULATE`.
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to skip swap reservation (on supported platforms).
    ///
    /// On Linux, this adds `MAP_NORESERVE`.
    #[must_use]
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates an anonymous, readable and writable memory map.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is zero or the OS refuses the mapping.
    /// Failure is reported through `io::Error`; a successful call never
    /// yields a null pointer.
    ///
    /// # Safety
    ///
    /// The call itself performs a raw OS mapping. The returned `Mmap` owns
    /// the region, but every use of the raw pointer it yields must stay
    /// within `[ptr, ptr + len)` for the lifetime of the handle.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate, self.no_reserve)? };
        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
