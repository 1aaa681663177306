//! Placement policies over the segregated free lists.
//!
//! All three policies share one scan skeleton: walk the bins from the class
//! of the rounded request upward and pick a qualifying block. They differ
//! only in which qualifying block wins, so selection is a tagged enum plus a
//! comparison rule rather than a table of function pointers. Bins are
//! unordered (head insertion), so each visited bin is scanned fully and ties
//! resolve deterministically to the lowest address.

use std::ptr::NonNull;

use crate::block::BlockHeader;
use crate::freelist::{bin_index, FreeLists, NUM_BINS};

/// Placement policy deciding which qualifying free block services a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Lowest-addressed qualifying block in the first bin that has one.
    #[default]
    FirstFit,
    /// Smallest qualifying block; ties broken by lowest address.
    BestFit,
    /// First qualifying block past the previous allocation, wrapping once.
    NextFit,
}

/// Selects a free block of total size at least `size`.
///
/// `cursor` is the address of the most recently allocated block; next-fit
/// resumes after it. The cursor is compared purely as an address, so a
/// cursor whose block has since been freed or merged away is harmless.
pub(crate) fn select(
    free: &FreeLists,
    policy: Policy,
    size: usize,
    cursor: usize,
) -> Option<NonNull<BlockHeader>> {
    let start_bin = bin_index(size);
    match policy {
        Policy::FirstFit => scan_upward(free, start_bin, size),
        Policy::BestFit => best_fit(free, start_bin, size),
        Policy::NextFit => next_fit(free, start_bin, size, cursor),
    }
}

/// Lowest-addressed qualifying block in the first non-empty bin from
/// `start_bin` upward.
fn scan_upward(free: &FreeLists, start_bin: usize, size: usize) -> Option<NonNull<BlockHeader>> {
    for idx in start_bin..NUM_BINS {
        if let Some(hit) = lowest_fit(free.bin(idx), size) {
            return Some(hit);
        }
    }
    None
}

fn best_fit(free: &FreeLists, start_bin: usize, size: usize) -> Option<NonNull<BlockHeader>> {
    for idx in start_bin..NUM_BINS {
        let mut best: Option<NonNull<BlockHeader>> = None;
        let mut cur = free.bin(idx);
        while let Some(block) = NonNull::new(cur) {
            // SAFETY: bins only hold valid free headers owned by the allocator.
            unsafe {
                let b = block.as_ptr();
                if (*b).size >= size {
                    let better = match best {
                        None => true,
                        Some(prev) => {
                            let p = prev.as_ptr();
                            (*b).size < (*p).size
                                || ((*b).size == (*p).size && (b as usize) < (p as usize))
                        }
                    };
                    if better {
                        best = Some(block);
                    }
                }
                cur = (*b).fl_next;
            }
        }
        // Blocks in higher bins are at least as large as anything here, so
        // the first bin with a qualifying block settles the fit.
        if best.is_some() {
            return best;
        }
    }
    None
}

fn next_fit(
    free: &FreeLists,
    start_bin: usize,
    size: usize,
    cursor: usize,
) -> Option<NonNull<BlockHeader>> {
    let mut after: Option<NonNull<BlockHeader>> = None;
    let mut wrapped: Option<NonNull<BlockHeader>> = None;

    let mut cur = free.bin(start_bin);
    while let Some(block) = NonNull::new(cur) {
        // SAFETY: bins only hold valid free headers owned by the allocator.
        unsafe {
            let b = block.as_ptr();
            if (*b).size >= size {
                let addr = b as usize;
                if addr > cursor {
                    if after.is_none_or(|p| addr < p.as_ptr() as usize) {
                        after = Some(block);
                    }
                } else if wrapped.is_none_or(|p| addr < p.as_ptr() as usize) {
                    wrapped = Some(block);
                }
            }
            cur = (*b).fl_next;
        }
    }

    // Prefer the first qualifying block past the cursor, then wrap to the
    // start of the bin, then fall through to larger bins first-fit style.
    after
        .or(wrapped)
        .or_else(|| scan_upward(free, start_bin + 1, size))
}

/// Lowest-addressed block in one bin with size at least `size`.
fn lowest_fit(head: *mut BlockHeader, size: usize) -> Option<NonNull<BlockHeader>> {
    let mut hit: Option<NonNull<BlockHeader>> = None;
    let mut cur = head;
    while let Some(block) = NonNull::new(cur) {
        // SAFETY: bins only hold valid free headers owned by the allocator.
        unsafe {
            let b = block.as_ptr();
            if (*b).size >= size && hit.is_none_or(|p| (b as usize) < p.as_ptr() as usize) {
                hit = Some(block);
            }
            cur = (*b).fl_next;
        }
    }
    hit
}
