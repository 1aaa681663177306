//! Split and coalesce behavior: the address-ordered list always covers the
//! region contiguously, and frees merge with free neighbors only.

use gcmalloc::{site, Allocator, BlockInfo, Policy};

fn snapshot(alloc: &Allocator) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    alloc.walk(|info| blocks.push(*info)).unwrap();
    blocks
}

/// The managed blocks must tile the region: each block ends where the next
/// begins, and the sizes sum to the region capacity.
fn assert_contiguous_cover(alloc: &Allocator) {
    let blocks: Vec<BlockInfo> = snapshot(alloc)
        .into_iter()
        .filter(|b| !b.large)
        .collect();
    assert!(!blocks.is_empty());

    let mut sum = 0;
    for pair in blocks.windows(2) {
        assert_eq!(
            pair[0].addr + pair[0].size,
            pair[1].addr,
            "address-ordered list must be contiguous"
        );
    }
    for b in &blocks {
        sum += b.size;
    }
    assert_eq!(sum, alloc.heap_size());
}

#[test]
fn test_single_alloc_splits_region() {
    let mut alloc = Allocator::new().unwrap();
    let p = alloc.alloc(100, site!("a"), Policy::FirstFit).unwrap();

    let blocks = snapshot(&alloc);
    assert_eq!(blocks.len(), 2);
    assert!(!blocks[0].free);
    assert_eq!(blocks[0].payload_len, 100);
    assert_eq!(blocks[0].payload, p.as_ptr() as *const u8);
    assert!(blocks[1].free);
    assert_contiguous_cover(&alloc);

    // Freeing the only allocation merges everything back into one block.
    unsafe {
        alloc.free(p.as_ptr(), site!("a")).unwrap();
    }
    let blocks = snapshot(&alloc);
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].free);
    assert_eq!(blocks[0].size, alloc.heap_size());
}

#[test]
fn test_free_out_of_order_coalesces_fully() {
    let mut alloc = Allocator::new().unwrap();
    let a = alloc.alloc(32, site!("a"), Policy::FirstFit).unwrap();
    let b = alloc.alloc(32, site!("b"), Policy::FirstFit).unwrap();
    let c = alloc.alloc(32, site!("c"), Policy::FirstFit).unwrap();

    unsafe {
        alloc.free(a.as_ptr(), site!("a")).unwrap();
        alloc.free(c.as_ptr(), site!("c")).unwrap();

        // a and c are free but separated by b: no merge across it. c's free
        // merged forward into the tail, so two free blocks remain.
        let free_blocks = snapshot(&alloc).iter().filter(|i| i.free).count();
        assert_eq!(free_blocks, 2);

        alloc.free(b.as_ptr(), site!("b")).unwrap();
    }

    // The middle free bridges both sides into a single region-sized block.
    let blocks = snapshot(&alloc);
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].free);
    assert_eq!(blocks[0].size, alloc.heap_size());
}

#[test]
fn test_free_merges_only_free_neighbors() {
    let mut alloc = Allocator::new().unwrap();
    let a = alloc.alloc(64, site!("a"), Policy::FirstFit).unwrap();
    let b = alloc.alloc(64, site!("b"), Policy::FirstFit).unwrap();
    let _c = alloc.alloc(64, site!("c"), Policy::FirstFit).unwrap();

    unsafe {
        alloc.free(a.as_ptr(), site!("a")).unwrap();
    }
    // a's neighbors (nothing before it, b after) are allocated: no merge.
    let blocks = snapshot(&alloc);
    assert_eq!(blocks.iter().filter(|i| i.free).count(), 2); // hole at a + tail
    assert_contiguous_cover(&alloc);

    unsafe {
        alloc.free(b.as_ptr(), site!("b")).unwrap();
    }
    // b bridges into a: one hole covering both, c still walling off the tail.
    let blocks = snapshot(&alloc);
    assert_eq!(blocks.iter().filter(|i| i.free).count(), 2);
    assert_eq!(blocks.len(), 3);
    assert_contiguous_cover(&alloc);
}

#[test]
fn test_cover_holds_under_churn() {
    let mut alloc = Allocator::new().unwrap();
    let mut live = Vec::new();

    // Deterministic churn: allocate a ramp of sizes, free every other one,
    // allocate again, free everything.
    for i in 1..40 {
        let p = alloc
            .alloc(i * 13, site!("churn"), Policy::FirstFit)
            .unwrap();
        live.push(p);
    }
    assert_contiguous_cover(&alloc);

    unsafe {
        for p in live.iter().step_by(2) {
            alloc.free(p.as_ptr(), site!("churn")).unwrap();
        }
    }
    assert_contiguous_cover(&alloc);

    let mut second = Vec::new();
    for i in 1..20 {
        let p = alloc
            .alloc(i * 29, site!("churn2"), Policy::BestFit)
            .unwrap();
        second.push(p);
    }
    assert_contiguous_cover(&alloc);

    unsafe {
        for p in live.iter().skip(1).step_by(2).chain(second.iter()) {
            alloc.free(p.as_ptr(), site!("drain")).unwrap();
        }
    }

    let blocks = snapshot(&alloc);
    assert_eq!(blocks.len(), 1, "full drain must coalesce to one block");
    assert_eq!(blocks[0].size, alloc.heap_size());
}
