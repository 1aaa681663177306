//! Realloc semantics: null/zero edge cases, in-place shrink and grow,
//! relocation, and path switches between the managed region and large
//! mappings.

use gcmalloc::{site, AllocError, Allocator, Policy};

fn fill(ptr: *mut u8, len: usize) {
    for i in 0..len {
        unsafe {
            ptr.add(i).write((i % 249) as u8);
        }
    }
}

fn assert_prefix(ptr: *const u8, len: usize) {
    for i in 0..len {
        unsafe {
            assert_eq!(ptr.add(i).read(), (i % 249) as u8, "byte {i} lost");
        }
    }
}

#[test]
fn test_realloc_null_is_alloc() {
    let mut alloc = Allocator::new().unwrap();
    let p = unsafe {
        alloc
            .realloc(std::ptr::null_mut(), 128, site!("fresh"), Policy::FirstFit)
            .unwrap()
    };
    assert!(!p.is_null());
    unsafe {
        alloc.free(p, site!("fresh")).unwrap();
    }
}

#[test]
fn test_realloc_zero_is_free() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(128, site!("doomed"), Policy::FirstFit).unwrap();

    let out = unsafe {
        alloc
            .realloc(p.as_ptr(), 0, site!("doomed"), Policy::FirstFit)
            .unwrap()
    };
    assert!(out.is_null());

    // The block is gone: the region is one free block again.
    let mut blocks = 0;
    alloc.walk(|_| blocks += 1).unwrap();
    assert_eq!(blocks, 1);
}

#[test]
fn test_grow_in_place_into_free_successor() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(100, site!("grow"), Policy::FirstFit).unwrap();
    fill(p.as_ptr(), 100);

    // The successor is the free tail, so growth happens in place.
    let q = unsafe {
        alloc
            .realloc(p.as_ptr(), 2000, site!("grow"), Policy::FirstFit)
            .unwrap()
    };
    assert_eq!(q, p.as_ptr());
    assert_prefix(q, 100);
    unsafe {
        alloc.free(q, site!("grow")).unwrap();
    }
}

#[test]
fn test_shrink_in_place_preserves_prefix() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(1000, site!("shrink"), Policy::FirstFit).unwrap();
    fill(p.as_ptr(), 1000);

    let q = unsafe {
        alloc
            .realloc(p.as_ptr(), 40, site!("shrink"), Policy::FirstFit)
            .unwrap()
    };
    assert_eq!(q, p.as_ptr());
    assert_prefix(q, 40);

    // The carved-off tail went back to the free lists: the region is still
    // fully covered and mostly free.
    let stats = alloc.stats().unwrap();
    assert_eq!(stats.blocks_allocated, 1);
    assert_eq!(
        stats.bytes_allocated + stats.bytes_free,
        alloc.heap_size()
    );
    unsafe {
        alloc.free(q, site!("shrink")).unwrap();
    }
}

#[test]
fn test_blocked_growth_relocates_and_copies() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(100, site!("move"), Policy::FirstFit).unwrap();
    // Wall off the successor so in-place growth is impossible.
    let wall = alloc.alloc(100, site!("wall"), Policy::FirstFit).unwrap();
    fill(p.as_ptr(), 100);

    let q = unsafe {
        alloc
            .realloc(p.as_ptr(), 3000, site!("move"), Policy::FirstFit)
            .unwrap()
    };
    assert_ne!(q, p.as_ptr());
    assert_prefix(q, 100);

    // The old block was freed by the move.
    let stats = alloc.stats().unwrap();
    assert_eq!(stats.blocks_allocated, 2);

    unsafe {
        alloc.free(q, site!("move")).unwrap();
        alloc.free(wall.as_ptr(), site!("wall")).unwrap();
    }
}

#[test]
fn test_shrink_after_grow_preserves_smaller_prefix() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(600, site!("cycle"), Policy::FirstFit).unwrap();
    fill(p.as_ptr(), 600);

    let grown = unsafe {
        alloc
            .realloc(p.as_ptr(), 2400, site!("cycle"), Policy::BestFit)
            .unwrap()
    };
    assert_prefix(grown, 600);

    let shrunk = unsafe {
        alloc
            .realloc(grown, 200, site!("cycle"), Policy::BestFit)
            .unwrap()
    };
    assert_prefix(shrunk, 200);

    unsafe {
        alloc.free(shrunk, site!("cycle")).unwrap();
    }
}

#[test]
fn test_realloc_crosses_to_large_path_and_back() {
    let page = sys_pages::page_size();
    let mut alloc = Allocator::new().unwrap();

    let p = alloc.alloc(200, site!("cross"), Policy::FirstFit).unwrap();
    fill(p.as_ptr(), 200);

    // Grow far past the threshold: the block moves to a dedicated mapping.
    let big = unsafe {
        alloc
            .realloc(p.as_ptr(), page * 4, site!("cross"), Policy::FirstFit)
            .unwrap()
    };
    assert_prefix(big, 200);
    let stats = alloc.stats().unwrap();
    assert_eq!(stats.large_mappings, 1);
    assert_eq!(stats.blocks_allocated, 0);

    // Shrink back below the threshold: it returns to the managed region.
    let small = unsafe {
        alloc
            .realloc(big, 200, site!("cross"), Policy::FirstFit)
            .unwrap()
    };
    assert_prefix(small, 200);
    let stats = alloc.stats().unwrap();
    assert_eq!(stats.large_mappings, 0);
    assert_eq!(stats.blocks_allocated, 1);

    unsafe {
        alloc.free(small, site!("cross")).unwrap();
    }
}

#[test]
fn test_large_realloc_reuses_mapping_slack() {
    let page = sys_pages::page_size();
    let mut alloc = Allocator::new().unwrap();

    // Mapped length rounds up to whole pages, so a modest growth within the
    // same mapping must keep the address.
    let p = alloc
        .alloc(page * 2, site!("slack"), Policy::FirstFit)
        .unwrap();
    fill(p.as_ptr(), 512);

    let q = unsafe {
        alloc
            .realloc(p.as_ptr(), page * 2 + 128, site!("slack"), Policy::FirstFit)
            .unwrap()
    };
    assert_eq!(q, p.as_ptr());
    assert_prefix(q, 512);

    unsafe {
        alloc.free(q, site!("slack")).unwrap();
    }
}

#[test]
fn test_realloc_rejects_freed_pointer() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(64, site!("stale"), Policy::FirstFit).unwrap();
    unsafe {
        alloc.free(p.as_ptr(), site!("stale")).unwrap();
        let err = alloc.realloc(p.as_ptr(), 128, site!("stale"), Policy::FirstFit);
        assert!(matches!(err, Err(AllocError::DoubleFree)));
    }
}
