#![no_main]

use arbitrary::Arbitrary;
use buddy_sim::{BuddyAllocator, Snapshot};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
enum BuddyOp {
    Allocate(usize),
    Deallocate(usize),
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    total_bits: u8,
    ops: Vec<BuddyOp>,
}

/// Asserts that the free and allocated blocks tile the address space and that
/// no two free buddies remain uncoalesced.
fn assert_tiled(snap: &Snapshot) {
    let mut cursor = 0;
    for (block, _) in snap.blocks_by_address() {
        assert!(block.is_aligned(), "misaligned block {block}");
        assert_eq!(block.start(), cursor, "gap or overlap at {cursor}");
        cursor = block.end();
    }
    assert_eq!(cursor, snap.total_memory());

    for block in snap.free() {
        if block.size() < snap.total_memory() {
            assert!(!snap.free().contains(&block.buddy()), "{block} not coalesced");
        }
    }
}

fuzz_target!(|args: Args| {
    let total_memory = 1 << (args.total_bits % 32);
    let mut alloc = BuddyAllocator::try_new(total_memory).unwrap();

    let mut outstanding = Vec::new();

    for op in args.ops {
        match op {
            BuddyOp::Allocate(size) => {
                if let Ok(block) = alloc.allocate(size % (2 * total_memory)) {
                    outstanding.push(block);
                }
            }

            BuddyOp::Deallocate(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }
                let idx = raw_idx % outstanding.len();
                let block = outstanding.swap_remove(idx);
                alloc.deallocate(block).unwrap();
            }
        }

        assert_tiled(&alloc.snapshot());
    }
});
