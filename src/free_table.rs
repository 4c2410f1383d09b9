use alloc::{collections::VecDeque, vec::Vec};

use crate::Block;

/// The order in which free blocks of the same size are handed out.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FreeListPolicy {
    /// Free blocks are used in the order they became free.
    ///
    /// Newly freed, split and coalesced blocks are appended to the back of
    /// their size class, and allocations take from the front.
    #[default]
    InsertionOrder,

    /// Free blocks are used lowest address first.
    ///
    /// Each size class is kept sorted by start address. This makes placement
    /// independent of the order of earlier frees.
    AddressOrder,
}

/// Free blocks grouped into power-of-two size classes.
///
/// Class `k` holds the free blocks of size `2^k`. The number of classes is
/// fixed at construction.
pub(crate) struct FreeTable {
    classes: Vec<VecDeque<Block>>,
    policy: FreeListPolicy,
}

impl FreeTable {
    /// Constructs an empty table with classes for every power of two up to
    /// and including `max_size`.
    pub fn new(max_size: usize, policy: FreeListPolicy) -> FreeTable {
        assert!(max_size.is_power_of_two());

        let num_classes = max_size.ilog2() as usize + 1;
        let mut classes = Vec::with_capacity(num_classes);
        classes.resize_with(num_classes, VecDeque::new);

        FreeTable { classes, policy }
    }

    #[inline]
    fn class_index(size: usize) -> usize {
        assert!(size.is_power_of_two(), "size class must be a power of two");
        size.ilog2() as usize
    }

    /// Returns the free blocks of exactly `size`, in allocation order.
    pub fn class(&self, size: usize) -> &VecDeque<Block> {
        &self.classes[Self::class_index(size)]
    }

    pub fn insert(&mut self, block: Block) {
        let class = &mut self.classes[Self::class_index(block.size())];

        match self.policy {
            FreeListPolicy::InsertionOrder => class.push_back(block),
            FreeListPolicy::AddressOrder => {
                let idx = class.partition_point(|b| b.start() < block.start());
                class.insert(idx, block);
            }
        }
    }

    /// Removes the first free block of exactly `size`.
    pub fn pop(&mut self, size: usize) -> Option<Block> {
        self.classes[Self::class_index(size)].pop_front()
    }

    /// Removes `block` from its size class, returning whether it was present.
    pub fn remove(&mut self, block: &Block) -> bool {
        let class = &mut self.classes[Self::class_index(block.size())];

        match class.iter().position(|b| b == block) {
            Some(idx) => {
                class.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Returns the smallest size strictly greater than `size` that has a free
    /// block.
    pub fn smallest_nonempty_above(&self, size: usize) -> Option<usize> {
        let first = Self::class_index(size) + 1;

        self.classes
            .iter()
            .enumerate()
            .skip(first)
            .find(|(_, class)| !class.is_empty())
            .map(|(k, _)| 1 << k)
    }

    /// Iterates over all free blocks, largest size class first.
    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.classes.iter().rev().flat_map(|class| class.iter())
    }

    /// Returns the number of free blocks in each class, indexed by `log2(size)`.
    pub fn counts(&self) -> Vec<usize> {
        self.classes.iter().map(VecDeque::len).collect()
    }

    /// Returns the total size of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.classes
            .iter()
            .enumerate()
            .map(|(k, class)| class.len() << k)
            .sum()
    }

    /// Returns the size of the largest free block.
    pub fn largest(&self) -> Option<usize> {
        self.classes
            .iter()
            .rposition(|class| !class.is_empty())
            .map(|k| 1 << k)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    #[test]
    fn class_count() {
        let table = FreeTable::new(1024, FreeListPolicy::default());
        assert_eq!(table.counts().len(), 11);
        assert_eq!(table.iter().count(), 0);
        assert_eq!(table.largest(), None);
    }

    #[test]
    fn insertion_order_is_fifo() {
        let mut table = FreeTable::new(1024, FreeListPolicy::InsertionOrder);
        table.insert(Block::new(512, 128));
        table.insert(Block::new(0, 128));

        assert_eq!(table.pop(128), Some(Block::new(512, 128)));
        assert_eq!(table.pop(128), Some(Block::new(0, 128)));
        assert_eq!(table.pop(128), None);
    }

    #[test]
    fn address_order_is_sorted() {
        let mut table = FreeTable::new(1024, FreeListPolicy::AddressOrder);
        table.insert(Block::new(512, 128));
        table.insert(Block::new(896, 128));
        table.insert(Block::new(0, 128));

        let starts: Vec<usize> = table.class(128).iter().map(Block::start).collect();
        assert_eq!(starts, [0, 512, 896]);
    }

    #[test]
    fn remove_and_search() {
        let mut table = FreeTable::new(1024, FreeListPolicy::default());
        table.insert(Block::new(512, 512));
        table.insert(Block::new(256, 256));

        assert_eq!(table.smallest_nonempty_above(64), Some(256));
        assert_eq!(table.smallest_nonempty_above(256), Some(512));
        assert_eq!(table.smallest_nonempty_above(512), None);
        assert_eq!(table.free_bytes(), 768);
        assert_eq!(table.largest(), Some(512));

        assert!(table.remove(&Block::new(256, 256)));
        assert!(!table.remove(&Block::new(256, 256)));
        assert!(table.class(256).is_empty());
        assert_eq!(table.smallest_nonempty_above(64), Some(512));
    }

    #[test]
    fn iterates_largest_first() {
        let mut table = FreeTable::new(1024, FreeListPolicy::default());
        table.insert(Block::new(128, 128));
        table.insert(Block::new(512, 512));
        table.insert(Block::new(256, 256));

        let sizes: Vec<usize> = table.iter().map(Block::size).collect();
        assert_eq!(sizes, [512, 256, 128]);
    }
}
