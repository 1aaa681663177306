//! Conservative mark-sweep collection.
//!
//! The caller supplies zero or more contiguous root ranges (typically its
//! stack and statics). Every pointer-aligned word in a root range that lands
//! inside a live payload — interior offsets included — marks the enclosing
//! block, and marked payloads are scanned the same way until the worklist
//! drains. Unmarked allocated blocks are then freed through the ordinary
//! release path; unmarked large mappings are unmapped. Integers that happen
//! to look like heap pointers keep their target alive; the over-approximation
//! is deliberate.

use std::time::Instant;

use tracing::{debug, warn};

use crate::allocator::Allocator;
use crate::block::{canary_intact, payload_ptr, MAGIC};
use crate::metrics::GcMetrics;

const WORD: usize = std::mem::size_of::<usize>();

/// A contiguous address range the collector scans for potential pointers.
#[derive(Debug, Clone, Copy)]
pub struct RootRegion {
    base: *const u8,
    len: usize,
}

impl RootRegion {
    /// A root range of `len` bytes starting at `base`.
    #[must_use]
    pub const fn new(base: *const u8, len: usize) -> Self {
        Self { base, len }
    }

    /// A root range covering the bytes of `slice`.
    ///
    /// Handy for rooting an array of retained pointers in tests and
    /// embedders.
    #[must_use]
    pub fn from_slice<T>(slice: &[T]) -> Self {
        Self {
            base: slice.as_ptr().cast::<u8>(),
            len: std::mem::size_of_val(slice),
        }
    }
}

impl Allocator {
    /// Runs one mark-sweep cycle over the given roots and returns how many
    /// blocks (managed blocks plus large mappings) were freed.
    ///
    /// Per-block corruption is never fatal: a block failing its integrity
    /// checks is reported and left in place, and the sweep continues past
    /// it.
    ///
    /// # Safety
    ///
    /// Every root region must be readable for its full length, and no
    /// payload freed by the sweep may be referenced afterwards. Pointers
    /// held only in CPU registers or other locations outside the given
    /// regions are invisible to the collector.
    pub unsafe fn collect(&mut self, roots: &[RootRegion]) -> usize {
        let started = Instant::now();

        // Phase 1: clear. Mark state from an aborted prior cycle is
        // meaningless; reset everything.
        debug!("gc clear");
        unsafe {
            let mut cur = self.heap.first;
            while !cur.is_null() {
                (*cur).marked = false;
                cur = (*cur).next;
            }
            for header in self.large.headers() {
                (*header).marked = false;
            }
        }

        // Phase 2: mark. The worklist holds unscanned payload ranges; root
        // ranges seed it.
        debug!(roots = roots.len(), "gc mark");
        let mut worklist: Vec<(usize, usize)> = roots
            .iter()
            .map(|r| (r.base as usize, r.len))
            .collect();

        while let Some((base, len)) = worklist.pop() {
            let end = base + len;
            let mut cur = (base + WORD - 1) & !(WORD - 1);
            while cur + WORD <= end {
                // SAFETY: root ranges are readable per the caller contract;
                // payload ranges are allocator-owned memory.
                let word = unsafe { (cur as *const usize).read() };
                // SAFETY: resolution only dereferences headers the allocator
                // owns, after a range check.
                unsafe {
                    if let Some(block) = self.heap.find_payload_block(word) {
                        if !(*block).marked {
                            (*block).marked = true;
                            worklist.push((payload_ptr(block) as usize, (*block).payload_len));
                        }
                    } else if let Some(header) = self.large.find_containing(word) {
                        if !(*header).marked {
                            (*header).marked = true;
                            worklist.push((payload_ptr(header) as usize, (*header).payload_len));
                        }
                    }
                }
                cur += WORD;
            }
        }

        // Phase 3: sweep.
        debug!("gc sweep");
        let mut freed = 0usize;
        let mut bytes = 0usize;
        let mut surviving = 0usize;

        unsafe {
            let mut cur = self.heap.first;
            while !cur.is_null() {
                if (*cur).free {
                    cur = (*cur).next;
                    continue;
                }
                if (*cur).marked {
                    (*cur).marked = false;
                    surviving += 1;
                    cur = (*cur).next;
                    continue;
                }
                if (*cur).magic != MAGIC || !canary_intact(cur) {
                    // Reported, left allocated; the address link still
                    // carries the sweep forward.
                    warn!(
                        addr = format_args!("{:#x}", cur as usize),
                        "sweep skipping corrupt block"
                    );
                    surviving += 1;
                    cur = (*cur).next;
                    continue;
                }
                freed += 1;
                bytes += (*cur).size;
                let merged = self.release_block(cur);
                cur = (*merged).next;
            }
        }

        let (large_freed, large_bytes) = self.large.retain_with(|header| {
            // SAFETY: the registry owns every header it yields.
            unsafe {
                if (*header).marked {
                    (*header).marked = false;
                    return true;
                }
                if (*header).magic != MAGIC || !canary_intact(header) {
                    warn!(
                        addr = format_args!("{:#x}", header as usize),
                        "sweep skipping corrupt large mapping"
                    );
                    return true;
                }
                false
            }
        });
        freed += large_freed;
        bytes += large_bytes;
        surviving += self.large.count();

        self.last_gc = GcMetrics {
            duration: started.elapsed(),
            bytes_reclaimed: bytes,
            blocks_reclaimed: freed,
            blocks_surviving: surviving,
            total_collections: self.last_gc.total_collections + 1,
        };
        debug!(freed, bytes, surviving, "gc complete");
        freed
    }
}
