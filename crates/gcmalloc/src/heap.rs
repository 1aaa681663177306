//! The managed heap region: one contiguous arena plus the address-ordered
//! block list.
//!
//! The arena is mapped once at init and carved into a single free block
//! covering the whole region. From then on the address-ordered list covers
//! the arena contiguously: for every non-tail block,
//! `block_addr + block.size == next_addr`. The top chunk is simply the last
//! block in address order; the region never grows.

use sys_pages::{Mmap, MmapOptions};
use tracing::debug;

use crate::block::{init_free_block, BlockHeader, HEADER_SIZE, MIN_BLOCK_SIZE};
use crate::error::{AllocError, AllocResult};
use crate::freelist::FreeLists;

pub(crate) struct Heap {
    /// Owning handle; unmapped on drop.
    _map: Mmap,
    start: usize,
    end: usize,
    /// First block in address order (always at `start`).
    pub(crate) first: *mut BlockHeader,
    /// Last block in address order.
    pub(crate) top: *mut BlockHeader,
}

impl Heap {
    /// Maps the arena and carves it into a single free block.
    pub(crate) fn new(heap_size: usize) -> AllocResult<Self> {
        if heap_size < MIN_BLOCK_SIZE {
            return Err(AllocError::InvalidArgument);
        }
        let size = heap_size & !(crate::block::ALIGNMENT - 1);

        // SAFETY: the mapping is exclusively owned by this heap and every
        // header write below stays inside [start, start + size).
        let map = unsafe { MmapOptions::new().len(size).map_anon()? };
        let start = map.ptr() as usize;

        // Page-aligned mappings are always ALIGNMENT-aligned.
        let first = unsafe { init_free_block(map.ptr(), size) };

        debug!(start = format_args!("{start:#x}"), size, "heap region mapped");

        Ok(Self {
            _map: map,
            start,
            end: start + size,
            first,
            top: first,
        })
    }

    pub(crate) const fn size(&self) -> usize {
        self.end - self.start
    }

    pub(crate) const fn start(&self) -> usize {
        self.start
    }

    pub(crate) const fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Splits a free block so its size becomes exactly `size`, returning the
    /// trailing remainder when one is worth carving. The remainder is linked
    /// into the address-ordered list but not into any bin; the caller owns
    /// that step.
    ///
    /// # Safety
    ///
    /// `block` must be a valid free header of this heap, detached from the
    /// bins, with `block.size >= size` and `size` a multiple of `ALIGNMENT`.
    pub(crate) unsafe fn split(
        &mut self,
        block: *mut BlockHeader,
        size: usize,
    ) -> Option<*mut BlockHeader> {
        unsafe {
            let excess = (*block).size - size;
            if excess < MIN_BLOCK_SIZE {
                return None;
            }

            let rem = init_free_block(block.cast::<u8>().add(size), excess);
            (*rem).prev = block;
            (*rem).next = (*block).next;
            if !(*rem).next.is_null() {
                (*(*rem).next).prev = rem;
            }
            (*block).next = rem;
            (*block).size = size;

            if self.top == block {
                self.top = rem;
            }
            Some(rem)
        }
    }

    /// Merges `block` with its free address-order neighbors, each side at
    /// most once. Absorbed neighbors are removed from their bins. Returns
    /// the merged block, which the caller reinserts.
    ///
    /// # Safety
    ///
    /// `block` must be a valid header of this heap, off every bin.
    pub(crate) unsafe fn coalesce(
        &mut self,
        block: *mut BlockHeader,
        free: &mut FreeLists,
    ) -> *mut BlockHeader {
        unsafe {
            let mut block = block;

            let next = (*block).next;
            if !next.is_null() && (*next).free {
                free.remove(next);
                (*block).size += (*next).size;
                (*block).next = (*next).next;
                if !(*block).next.is_null() {
                    (*(*block).next).prev = block;
                }
                if self.top == next {
                    self.top = block;
                }
            }

            let prev = (*block).prev;
            if !prev.is_null() && (*prev).free {
                free.remove(prev);
                (*prev).size += (*block).size;
                (*prev).next = (*block).next;
                if !(*prev).next.is_null() {
                    (*(*prev).next).prev = prev;
                }
                if self.top == block {
                    self.top = prev;
                }
                block = prev;
            }

            block
        }
    }

    /// Resolves an address to the allocated block whose payload contains it,
    /// interior offsets included. Free blocks never match.
    ///
    /// # Safety
    ///
    /// The address-ordered list must be intact (no operation in flight).
    pub(crate) unsafe fn find_payload_block(&self, addr: usize) -> Option<*mut BlockHeader> {
        if !self.contains(addr) {
            return None;
        }
        unsafe {
            let mut cur = self.first;
            while !cur.is_null() {
                let base = cur as usize;
                if base > addr {
                    return None;
                }
                let payload = base + HEADER_SIZE;
                if !(*cur).free && addr >= payload && addr < payload + (*cur).payload_len {
                    return Some(cur);
                }
                cur = (*cur).next;
            }
        }
        None
    }
}
