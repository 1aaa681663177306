//! Diagnostics: linear iteration over every block.

use tracing::warn;

use crate::allocator::Allocator;
use crate::block::{canary_intact, payload_ptr, Attribution, BlockHeader, MAGIC};
use crate::error::{AllocError, AllocResult};

/// A block as seen by [`Allocator::walk`]. Headers are never exposed; this
/// is a by-value snapshot.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    /// Address of the block (its header).
    pub addr: usize,
    /// Address of the payload handed to the caller.
    pub payload: *const u8,
    /// Total block size: header + payload area + canary + padding.
    pub size: usize,
    /// Bytes the caller asked for.
    pub payload_len: usize,
    /// True iff the block is on a free list.
    pub free: bool,
    /// True for blocks serviced by a dedicated mapping.
    pub large: bool,
    /// Attribution of the allocating call site.
    pub attr: Attribution,
}

/// Aggregate heap occupancy, computed by a full walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Capacity of the managed region.
    pub heap_size: usize,
    /// Bytes in allocated managed blocks (headers included).
    pub bytes_allocated: usize,
    /// Bytes in free managed blocks (headers included).
    pub bytes_free: usize,
    /// Allocated managed blocks.
    pub blocks_allocated: usize,
    /// Free managed blocks.
    pub blocks_free: usize,
    /// Largest single free block, total size.
    pub largest_free_block: usize,
    /// Live large mappings.
    pub large_mappings: usize,
    /// Bytes held by large mappings.
    pub large_bytes: usize,
}

impl Allocator {
    /// Visits every managed block in address order, then every large
    /// mapping in registry order.
    ///
    /// # Errors
    ///
    /// Stops at the first block whose magic or canary is invalid and
    /// reports it; blocks past the failure are not visited.
    pub fn walk<F>(&self, mut visitor: F) -> AllocResult<()>
    where
        F: FnMut(&BlockInfo),
    {
        unsafe {
            let mut cur = self.heap.first;
            while !cur.is_null() {
                Self::check_and_visit(cur, false, &mut visitor)?;
                cur = (*cur).next;
            }
            for header in self.large.headers() {
                Self::check_and_visit(header, true, &mut visitor)?;
            }
        }
        Ok(())
    }

    /// Checks every header and canary without visiting.
    ///
    /// # Errors
    ///
    /// The first corruption found, as [`Self::walk`].
    pub fn validate(&self) -> AllocResult<()> {
        self.walk(|_| {})
    }

    /// Computes aggregate occupancy. Fails like [`Self::walk`] on a corrupt
    /// block.
    ///
    /// # Errors
    ///
    /// The first corruption found, as [`Self::walk`].
    pub fn stats(&self) -> AllocResult<HeapStats> {
        let mut stats = HeapStats {
            heap_size: self.heap_size(),
            ..HeapStats::default()
        };
        self.walk(|info| {
            if info.large {
                stats.large_mappings += 1;
                stats.large_bytes += info.size;
            } else if info.free {
                stats.blocks_free += 1;
                stats.bytes_free += info.size;
                stats.largest_free_block = stats.largest_free_block.max(info.size);
            } else {
                stats.blocks_allocated += 1;
                stats.bytes_allocated += info.size;
            }
        })?;
        Ok(stats)
    }

    unsafe fn check_and_visit<F>(
        block: *mut BlockHeader,
        large: bool,
        visitor: &mut F,
    ) -> AllocResult<()>
    where
        F: FnMut(&BlockInfo),
    {
        // SAFETY: callers only pass headers owned by this allocator.
        unsafe {
            let addr = block as usize;
            if (*block).magic != MAGIC {
                warn!(addr = format_args!("{addr:#x}"), "walk stopped: magic mismatch");
                return Err(AllocError::MagicMismatch);
            }
            if !canary_intact(block) {
                warn!(
                    addr = format_args!("{addr:#x}"),
                    name = (*block).attr.name,
                    file = (*block).attr.file,
                    line = (*block).attr.line,
                    "walk stopped: canary mismatch"
                );
                return Err(AllocError::CanaryMismatch);
            }
            visitor(&BlockInfo {
                addr,
                payload: payload_ptr(block),
                size: (*block).size,
                payload_len: (*block).payload_len,
                free: (*block).free,
                large,
                attr: (*block).attr,
            });
        }
        Ok(())
    }
}
