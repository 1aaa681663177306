//! The public allocator handle.
//!
//! An [`Allocator`] is an explicit value passed to every call; there is no
//! process-global instance and independent allocators coexist freely. All
//! operations on one handle are single-threaded: the handle is `Send` but
//! requires `&mut self`, so the borrow checker enforces the one-at-a-time
//! discipline.

use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::block::{
    canary_intact, checked_block_size, header_from_payload, payload_ptr, write_canary, Attribution,
    BlockHeader, ALIGNMENT, CANARY_SIZE, HEADER_SIZE, MAGIC, MIN_BLOCK_SIZE,
};
use crate::error::{AllocError, AllocResult};
use crate::freelist::FreeLists;
use crate::heap::Heap;
use crate::large::LargeSpace;
use crate::metrics::GcMetrics;
use crate::policy::{self, Policy};

/// Default managed region capacity: 1 MiB.
pub const DEFAULT_HEAP_SIZE: usize = 1 << 20;

// ============================================================================
// Configuration
// ============================================================================

/// Init-time parameters for an [`Allocator`].
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    heap_size: usize,
    large_threshold: Option<usize>,
}

impl AllocatorConfig {
    /// Creates a configuration with the defaults: a 1 MiB managed region and
    /// the system page size as the large-object threshold.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            large_threshold: None,
        }
    }

    /// Sets the managed region capacity in bytes.
    #[must_use]
    pub const fn heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = bytes;
        self
    }

    /// Sets the total block size above which requests bypass the managed
    /// region and get a dedicated mapping.
    #[must_use]
    pub const fn large_threshold(mut self, bytes: usize) -> Self {
        self.large_threshold = Some(bytes);
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Where a validated user pointer landed.
#[derive(Clone, Copy)]
pub(crate) enum Located {
    Managed(*mut BlockHeader),
    Large(usize),
}

/// A self-contained dynamic memory allocator.
///
/// Owns one contiguous managed region carved into address-contiguous blocks,
/// segregated free lists over the free ones, a registry of large mappings,
/// and a conservative mark-sweep collector. Dropping the allocator unmaps
/// everything it owns.
pub struct Allocator {
    pub(crate) heap: Heap,
    pub(crate) free: FreeLists,
    pub(crate) large: LargeSpace,
    /// Address of the most recently allocated managed block. Next-fit
    /// resumes after it; compared only as an address, so it survives frees.
    pub(crate) cursor: usize,
    pub(crate) large_threshold: usize,
    pub(crate) last_gc: GcMetrics,
}

// SAFETY: the handle owns all the memory it touches and every operation
// takes `&mut self`, so moving it to another thread is sound.
unsafe impl Send for Allocator {}

impl Allocator {
    /// Creates an allocator with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::Os`] if the OS refuses the region mapping.
    pub fn new() -> AllocResult<Self> {
        Self::with_config(AllocatorConfig::new())
    }

    /// Creates an allocator with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] for a heap size or threshold
    /// too small to hold a single block, and [`AllocError::Os`] if the OS
    /// refuses the region mapping.
    pub fn with_config(config: AllocatorConfig) -> AllocResult<Self> {
        let large_threshold = config.large_threshold.unwrap_or_else(sys_pages::page_size);
        if large_threshold < MIN_BLOCK_SIZE {
            return Err(AllocError::InvalidArgument);
        }

        let heap = Heap::new(config.heap_size)?;
        let mut free = FreeLists::new();
        // SAFETY: the initial block is the whole region, free and unlinked.
        unsafe {
            free.insert(heap.first);
        }

        debug!(
            heap_size = heap.size(),
            large_threshold, "allocator initialized"
        );

        Ok(Self {
            heap,
            free,
            large: LargeSpace::new(),
            cursor: 0,
            large_threshold,
            last_gc: GcMetrics::new(),
        })
    }

    /// Capacity of the managed region in bytes.
    #[must_use]
    pub const fn heap_size(&self) -> usize {
        self.heap.size()
    }

    /// The total block size above which requests take the large path.
    #[must_use]
    pub const fn large_threshold(&self) -> usize {
        self.large_threshold
    }

    /// Metrics of the most recent collection.
    #[must_use]
    pub const fn last_gc_metrics(&self) -> GcMetrics {
        self.last_gc
    }

    /// Allocates `size` bytes, placed by `policy`.
    ///
    /// The returned pointer is aligned to [`ALIGNMENT`] and valid until the
    /// block is freed, reallocated away, or swept. Requests whose total
    /// block size exceeds the large threshold are serviced by a dedicated
    /// mapping instead of the managed region.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] for `size == 0` or size overflow,
    /// [`AllocError::OutOfMemory`] when no free block fits (the allocator
    /// stays fully usable), [`AllocError::Os`] if a large mapping fails.
    pub fn alloc(
        &mut self,
        size: usize,
        attr: Attribution,
        policy: Policy,
    ) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidArgument);
        }
        let total = checked_block_size(size).ok_or(AllocError::InvalidArgument)?;

        if total > self.large_threshold {
            return self.large.alloc(size, total, attr);
        }

        let Some(block) = policy::select(&self.free, policy, total, self.cursor) else {
            warn!(bytes = size, name = attr.name, "allocation failed: region exhausted");
            return Err(AllocError::OutOfMemory);
        };
        let block = block.as_ptr();

        // SAFETY: `select` only yields free headers of this heap; the block
        // is detached before the split and refilled below.
        unsafe {
            self.free.remove(block);
            if let Some(rem) = self.heap.split(block, total) {
                self.free.insert(rem);
            }
            (*block).free = false;
            (*block).marked = false;
            (*block).payload_len = size;
            (*block).attr = attr;
            write_canary(block);
            self.cursor = block as usize;

            trace!(bytes = size, name = attr.name, "block allocated");
            Ok(NonNull::new_unchecked(payload_ptr(block)))
        }
    }

    /// Allocates a zero-initialized region of `count * size` bytes.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidArgument`] when `count * size` overflows, plus
    /// everything [`Self::alloc`] reports.
    pub fn calloc(
        &mut self,
        count: usize,
        size: usize,
        attr: Attribution,
        policy: Policy,
    ) -> AllocResult<NonNull<u8>> {
        let bytes = count
            .checked_mul(size)
            .ok_or(AllocError::InvalidArgument)?;
        let ptr = self.alloc(bytes, attr, policy)?;
        // SAFETY: the fresh block owns at least `bytes` payload bytes.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, bytes);
        }
        Ok(ptr)
    }

    /// Releases a block previously returned by this allocator.
    ///
    /// Freeing a null pointer is a no-op success. The block is merged with
    /// free address-order neighbors and reindexed; a large block is
    /// unmapped.
    ///
    /// # Errors
    ///
    /// The corruption family: bad magic, bad canary, double free, or a
    /// pointer this allocator does not manage. On error the block graph is
    /// left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this allocator that has
    /// no outstanding borrows into its payload.
    pub unsafe fn free(&mut self, ptr: *mut u8, attr: Attribution) -> AllocResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        // SAFETY: classify validates before any header is trusted.
        match unsafe { self.classify(ptr) }? {
            Located::Managed(block) => {
                // SAFETY: the header was just validated.
                unsafe {
                    trace!(
                        bytes = (*block).payload_len,
                        name = attr.name,
                        "block freed"
                    );
                    self.release_block(block);
                }
            }
            Located::Large(index) => {
                trace!(name = attr.name, "large block freed");
                self.large.remove(index);
            }
        }
        Ok(())
    }

    /// Resizes a block, preserving `min(old, new)` payload bytes.
    ///
    /// A null `ptr` behaves as [`Self::alloc`]; `new_size == 0` frees and
    /// returns null. The block is shrunk or grown in place when its own
    /// room, a free successor, or mapping slack allows; otherwise a new
    /// block is placed by `policy` (possibly switching between the managed
    /// and large paths), the payload copied, and the old block freed.
    ///
    /// # Errors
    ///
    /// Validation errors as [`Self::free`]; allocation errors as
    /// [`Self::alloc`]. On error the original block is left intact.
    ///
    /// # Safety
    ///
    /// As [`Self::free`], and the payload must not be borrowed across the
    /// call since the block may move.
    pub unsafe fn realloc(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
        attr: Attribution,
        policy: Policy,
    ) -> AllocResult<*mut u8> {
        if ptr.is_null() {
            return self.alloc(new_size, attr, policy).map(NonNull::as_ptr);
        }
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(ptr, attr)? };
            return Ok(std::ptr::null_mut());
        }

        // SAFETY: classify validates before any header is trusted.
        let located = unsafe { self.classify(ptr) }?;
        let total = checked_block_size(new_size).ok_or(AllocError::InvalidArgument)?;

        match located {
            Located::Managed(block) => unsafe {
                if total <= self.large_threshold {
                    if total <= (*block).size {
                        self.shrink_in_place(block, total, new_size, attr);
                        return Ok(ptr);
                    }
                    if self.try_grow_into_next(block, total) {
                        (*block).payload_len = new_size;
                        (*block).attr = attr;
                        write_canary(block);
                        return Ok(ptr);
                    }
                }
                self.move_block(ptr, (*block).payload_len, new_size, attr, policy, located)
            },
            Located::Large(index) => unsafe {
                let header = self.large_header(index);
                // Page rounding usually leaves slack; reuse it while the
                // block still belongs on the large path.
                if total > self.large_threshold && total <= (*header).size {
                    (*header).payload_len = new_size;
                    (*header).attr = attr;
                    write_canary(header);
                    return Ok(ptr);
                }
                self.move_block(ptr, (*header).payload_len, new_size, attr, policy, located)
            },
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn large_header(&self, index: usize) -> *mut BlockHeader {
        self.large.header_at(index)
    }

    /// Validates a user pointer and resolves which space owns it.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null. Reads the candidate header only after the
    /// range check proves it lies in allocator-owned memory.
    pub(crate) unsafe fn classify(&self, ptr: *mut u8) -> AllocResult<Located> {
        let addr = ptr as usize;
        if addr % ALIGNMENT != 0 {
            return Err(AllocError::InvalidArgument);
        }

        if self.heap.contains(addr) {
            if addr < self.heap.start() + HEADER_SIZE {
                return Err(AllocError::UnmanagedPointer);
            }
            // SAFETY: the whole candidate header lies inside the region.
            unsafe {
                let block = header_from_payload(ptr);
                if (*block).magic != MAGIC {
                    warn!(addr = format_args!("{addr:#x}"), "header magic mismatch");
                    return Err(AllocError::MagicMismatch);
                }
                if (*block).free {
                    warn!(
                        addr = format_args!("{addr:#x}"),
                        "double free of managed block"
                    );
                    return Err(AllocError::DoubleFree);
                }
                if !canary_intact(block) {
                    warn!(
                        addr = format_args!("{addr:#x}"),
                        name = (*block).attr.name,
                        file = (*block).attr.file,
                        line = (*block).attr.line,
                        "trailing canary overwritten"
                    );
                    return Err(AllocError::CanaryMismatch);
                }
                return Ok(Located::Managed(block));
            }
        }

        if let Some(index) = self.large.find_by_payload(ptr) {
            let header = self.large_header(index);
            // SAFETY: the registry owns the mapping the header lives in.
            unsafe {
                if (*header).magic != MAGIC {
                    warn!(addr = format_args!("{addr:#x}"), "header magic mismatch");
                    return Err(AllocError::MagicMismatch);
                }
                if !canary_intact(header) {
                    warn!(
                        addr = format_args!("{addr:#x}"),
                        name = (*header).attr.name,
                        "trailing canary overwritten"
                    );
                    return Err(AllocError::CanaryMismatch);
                }
            }
            return Ok(Located::Large(index));
        }

        Err(AllocError::UnmanagedPointer)
    }

    /// Frees a validated managed block: coalesce, refresh the free-block
    /// canary, reindex. Returns the merged block.
    ///
    /// # Safety
    ///
    /// `block` must be a validated, allocated header of this heap.
    pub(crate) unsafe fn release_block(&mut self, block: *mut BlockHeader) -> *mut BlockHeader {
        unsafe {
            (*block).free = true;
            (*block).marked = false;
            let merged = self.heap.coalesce(block, &mut self.free);
            (*merged).free = true;
            (*merged).marked = false;
            (*merged).attr = Attribution::UNKNOWN;
            (*merged).payload_len = (*merged).size - HEADER_SIZE - CANARY_SIZE;
            write_canary(merged);
            self.free.insert(merged);
            merged
        }
    }

    /// Shrinks an allocated block to `total`, carving the tail back into the
    /// free lists when it is big enough to stand alone.
    unsafe fn shrink_in_place(
        &mut self,
        block: *mut BlockHeader,
        total: usize,
        new_size: usize,
        attr: Attribution,
    ) {
        unsafe {
            if let Some(rem) = self.heap.split(block, total) {
                (*rem).free = true;
                let merged = self.heap.coalesce(rem, &mut self.free);
                (*merged).payload_len = (*merged).size - HEADER_SIZE - CANARY_SIZE;
                write_canary(merged);
                self.free.insert(merged);
            }
            (*block).payload_len = new_size;
            (*block).attr = attr;
            write_canary(block);
        }
    }

    /// Absorbs the free address-order successor when that yields enough
    /// room, splitting back any excess. Returns whether the block now holds
    /// at least `total` bytes.
    unsafe fn try_grow_into_next(&mut self, block: *mut BlockHeader, total: usize) -> bool {
        unsafe {
            let next = (*block).next;
            if next.is_null() || !(*next).free || (*block).size + (*next).size < total {
                return false;
            }

            self.free.remove(next);
            (*block).size += (*next).size;
            (*block).next = (*next).next;
            if !(*block).next.is_null() {
                (*(*block).next).prev = block;
            }
            if self.heap.top == next {
                self.heap.top = block;
            }

            if let Some(rem) = self.heap.split(block, total) {
                // The absorbed neighbor's successor is allocated (adjacent
                // free blocks never persist), so no further merge is possible.
                (*rem).free = true;
                self.free.insert(rem);
            }
            true
        }
    }

    /// Relocation path: place a new block, copy the surviving payload, free
    /// the old block. The old block is only touched after placement
    /// succeeds.
    unsafe fn move_block(
        &mut self,
        old_ptr: *mut u8,
        old_len: usize,
        new_size: usize,
        attr: Attribution,
        policy: Policy,
        located: Located,
    ) -> AllocResult<*mut u8> {
        let new = self.alloc(new_size, attr, policy)?;
        // SAFETY: source and destination are distinct live blocks owning at
        // least `min(old_len, new_size)` payload bytes each.
        unsafe {
            std::ptr::copy_nonoverlapping(old_ptr, new.as_ptr(), old_len.min(new_size));
            match located {
                Located::Managed(block) => {
                    self.release_block(block);
                }
                Located::Large(index) => {
                    self.large.remove(index);
                }
            }
        }
        Ok(new.as_ptr())
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        debug!(
            large_mappings = self.large.count(),
            "allocator torn down"
        );
    }
}
