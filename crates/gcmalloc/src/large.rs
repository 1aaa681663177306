//! Large-object path: requests above the threshold bypass the managed heap
//! and get a dedicated page-aligned mapping.
//!
//! A large block carries the same header + trailing canary at the head of
//! its mapping, so free, realloc, diagnostics, and the collector treat both
//! paths uniformly. The registry owns every live mapping; removal unmaps.

use std::ptr::NonNull;

use sys_pages::{round_to_pages, Mmap, MmapOptions};
use tracing::{debug, trace};

use crate::block::{
    payload_ptr, write_canary, Attribution, BlockHeader, CANARY, HEADER_SIZE, MAGIC,
};
use crate::error::AllocResult;

/// One live large mapping. The header sits at the mapping base.
pub(crate) struct LargeAlloc {
    map: Mmap,
}

impl LargeAlloc {
    pub(crate) fn header(&self) -> *mut BlockHeader {
        self.map.ptr().cast::<BlockHeader>()
    }

    fn base(&self) -> usize {
        self.map.ptr() as usize
    }

    fn payload_base(&self) -> usize {
        self.base() + HEADER_SIZE
    }
}

/// Registry of live large mappings, in allocation order.
pub(crate) struct LargeSpace {
    entries: Vec<LargeAlloc>,
}

impl LargeSpace {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.len()
    }

    /// Maps a dedicated region for `payload_len` user bytes and stamps the
    /// canonical header at its head. `total` is the already-rounded block
    /// size; the mapping itself rounds up to whole pages and the slack is
    /// recorded in `size` so realloc can grow in place.
    pub(crate) fn alloc(
        &mut self,
        payload_len: usize,
        total: usize,
        attr: Attribution,
    ) -> AllocResult<NonNull<u8>> {
        let mapped = round_to_pages(total);

        // SAFETY: the mapping is exclusively owned by the new entry; the
        // header write stays within its first page.
        let map = unsafe { MmapOptions::new().len(mapped).map_anon()? };
        let header = map.ptr().cast::<BlockHeader>();

        unsafe {
            header.write(BlockHeader {
                magic: MAGIC,
                canary: CANARY,
                size: mapped,
                payload_len,
                free: false,
                marked: false,
                large: true,
                attr,
                prev: std::ptr::null_mut(),
                next: std::ptr::null_mut(),
                fl_prev: std::ptr::null_mut(),
                fl_next: std::ptr::null_mut(),
            });
            write_canary(header);
        }

        debug!(
            bytes = payload_len,
            mapped,
            name = attr.name,
            "large mapping created"
        );

        let payload = unsafe { NonNull::new_unchecked(payload_ptr(header)) };
        self.entries.push(LargeAlloc { map });
        Ok(payload)
    }

    /// Header of the entry at `index`.
    pub(crate) fn header_at(&self, index: usize) -> *mut BlockHeader {
        self.entries[index].header()
    }

    /// Index of the entry whose payload base is exactly `ptr`.
    pub(crate) fn find_by_payload(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        self.entries.iter().position(|e| e.payload_base() == addr)
    }

    /// The entry whose payload range contains `addr`, interior offsets
    /// included.
    pub(crate) fn find_containing(&self, addr: usize) -> Option<*mut BlockHeader> {
        self.entries.iter().find_map(|e| {
            let payload = e.payload_base();
            // SAFETY: the registry only holds entries with intact headers.
            let len = unsafe { (*e.header()).payload_len };
            (addr >= payload && addr < payload + len).then(|| e.header())
        })
    }

    /// Unmaps and forgets the entry at `index`.
    pub(crate) fn remove(&mut self, index: usize) -> usize {
        let entry = self.entries.swap_remove(index);
        let bytes = entry.map.len();
        trace!(
            base = format_args!("{:#x}", entry.base()),
            bytes,
            "large mapping released"
        );
        bytes
        // entry drops here, unmapping the region
    }

    pub(crate) fn headers(&self) -> impl Iterator<Item = *mut BlockHeader> + '_ {
        self.entries.iter().map(LargeAlloc::header)
    }

    /// Removes every entry failing `keep`, unmapping as it goes. Returns
    /// `(mappings_removed, bytes_removed)`.
    pub(crate) fn retain_with<F>(&mut self, mut keep: F) -> (usize, usize)
    where
        F: FnMut(*mut BlockHeader) -> bool,
    {
        let mut removed = 0;
        let mut bytes = 0;
        let mut i = 0;
        while i < self.entries.len() {
            if keep(self.entries[i].header()) {
                i += 1;
            } else {
                bytes += self.remove(i);
                removed += 1;
            }
        }
        (removed, bytes)
    }
}
