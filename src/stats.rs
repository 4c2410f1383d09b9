//! Usage statistics for a buddy allocator.

use alloc::vec::Vec;

/// A point-in-time summary of a [`BuddyAllocator`]'s usage.
///
/// [`BuddyAllocator`]: crate::BuddyAllocator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuddyStats {
    /// Size of the managed address space.
    pub total: usize,
    /// Sum of the sizes of all free blocks.
    pub free: usize,
    /// Sum of the reserved sizes of all allocated blocks.
    pub allocated: usize,
    /// Sum of the sizes originally requested for all allocated blocks.
    pub requested: usize,
    /// Number of allocated blocks.
    pub allocations: usize,
    /// Number of free blocks of size `2^k`, indexed by `k`.
    pub free_blocks_by_class: Vec<usize>,
    /// Size of the largest free block, if any.
    pub largest_free: Option<usize>,
}

impl BuddyStats {
    /// Returns the number of reserved addresses beyond what was requested.
    pub fn internal_fragmentation(&self) -> usize {
        self.allocated - self.requested
    }

    /// Returns the number of free addresses that cannot be handed out in a
    /// single allocation because they are not part of the largest free block.
    pub fn external_fragmentation(&self) -> usize {
        self.free - self.largest_free.unwrap_or(0)
    }
}
