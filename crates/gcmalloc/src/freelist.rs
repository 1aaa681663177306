//! Segregated free lists keyed by power-of-two size class.
//!
//! Free blocks are indexed in an array of bins. The bin for a block is a
//! function of its total size only: `floor(log2(size)) - log2(MIN_BIN_SIZE)`,
//! clamped to the last bin. Each bin is an intrusive doubly-linked list with
//! O(1) head insertion and O(1) unlink given the node; the placement policies
//! scan bins rather than relying on intra-bin ordering.

use std::ptr;

use crate::block::{BlockHeader, MIN_BLOCK_SIZE};

/// Number of segregated bins.
pub(crate) const NUM_BINS: usize = 16;

/// Smallest size class: the first power of two that can hold a minimal block.
pub(crate) const MIN_BIN_SIZE: usize = MIN_BLOCK_SIZE.next_power_of_two();

const MIN_BIN_SHIFT: usize = MIN_BIN_SIZE.trailing_zeros() as usize;

/// Bin index for a block of total size `size`.
///
/// Sizes below `MIN_BIN_SIZE` saturate into bin 0; sizes past the largest
/// class clamp into the last bin.
pub(crate) fn bin_index(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    (size.ilog2() as usize)
        .saturating_sub(MIN_BIN_SHIFT)
        .min(NUM_BINS - 1)
}

/// The segregated free-list index.
pub(crate) struct FreeLists {
    bins: [*mut BlockHeader; NUM_BINS],
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            bins: [ptr::null_mut(); NUM_BINS],
        }
    }

    /// Head of bin `idx`, or null if the bin is empty.
    pub(crate) fn bin(&self, idx: usize) -> *mut BlockHeader {
        self.bins[idx]
    }

    /// Inserts a free block at the head of its bin. O(1).
    ///
    /// # Safety
    ///
    /// `block` must be a valid header with `free` set and must not currently
    /// be on any free list.
    pub(crate) unsafe fn insert(&mut self, block: *mut BlockHeader) {
        unsafe {
            debug_assert!((*block).free);
            debug_assert!((*block).fl_prev.is_null() && (*block).fl_next.is_null());

            let idx = bin_index((*block).size);
            let head = self.bins[idx];
            (*block).fl_prev = ptr::null_mut();
            (*block).fl_next = head;
            if !head.is_null() {
                (*head).fl_prev = block;
            }
            self.bins[idx] = block;
        }
    }

    /// Unlinks a free block from its bin. O(1).
    ///
    /// # Safety
    ///
    /// `block` must be a valid header currently threaded into the bin that
    /// corresponds to its size.
    pub(crate) unsafe fn remove(&mut self, block: *mut BlockHeader) {
        unsafe {
            let idx = bin_index((*block).size);
            if (*block).fl_prev.is_null() {
                debug_assert_eq!(self.bins[idx], block);
                self.bins[idx] = (*block).fl_next;
            } else {
                (*(*block).fl_prev).fl_next = (*block).fl_next;
            }
            if !(*block).fl_next.is_null() {
                (*(*block).fl_next).fl_prev = (*block).fl_prev;
            }
            (*block).fl_prev = ptr::null_mut();
            (*block).fl_next = ptr::null_mut();
        }
    }
}
