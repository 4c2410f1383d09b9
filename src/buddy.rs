//! A simulated binary-buddy allocator.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! Let `L = log2(total_memory)` and `n` be the number of blocks in the largest
//! free size class or the allocated list.
//!
//! | Operation                | Best-case | Worst-case |
//! |--------------------------|-----------|------------|
//! | Allocate                 | O(1)      | O(L)       |
//! | Deallocate               | O(n)      | O(L * n)   |
//!
//! #### Fragmentation
//!
//! Every request is rounded up to a power of two, so up to half of each
//! allocated block may go unused. Because blocks only coalesce with their
//! buddies, free memory can also be split across several non-adjacent blocks
//! none of which is large enough to satisfy a request.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use log::{debug, warn};

use crate::{
    free_table::{FreeListPolicy, FreeTable},
    observer::{Observer, Snapshot},
    round_up_pow2, AllocError, AllocInitError, Allocation, Block, BuddyStats, DeallocError,
};

/// A binary-buddy allocator over the address space `[0, total_memory)`.
///
/// The allocator hands out [`Block`]s whose size is the smallest power of two
/// no less than the requested size. Allocation never moves or resizes an
/// existing block.
///
/// The allocator is not thread-safe. Callers sharing one across threads must
/// serialize calls to [`allocate`] and [`deallocate`], for example by
/// wrapping it in a `Mutex`.
///
/// [`allocate`]: BuddyAllocator::allocate
/// [`deallocate`]: BuddyAllocator::deallocate
pub struct BuddyAllocator {
    total_memory: usize,
    free: FreeTable,
    allocated: Vec<Allocation>,
    observers: Vec<Box<dyn Observer>>,
}

impl fmt::Debug for BuddyAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("total_memory", &self.total_memory)
            .field("free", &self.free.iter().collect::<Vec<_>>())
            .field("allocated", &self.allocated)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl BuddyAllocator {
    /// Constructs a new `BuddyAllocator` managing `total_memory` addresses.
    ///
    /// Free blocks of the same size are handed out in the order they became
    /// free.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `total_memory` is zero or
    /// not a power of two.
    pub fn try_new(total_memory: usize) -> Result<BuddyAllocator, AllocInitError> {
        Self::try_with_policy(total_memory, FreeListPolicy::default())
    }

    /// Constructs a new `BuddyAllocator` which orders each free size class
    /// according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `total_memory` is zero or
    /// not a power of two.
    pub fn try_with_policy(
        total_memory: usize,
        policy: FreeListPolicy,
    ) -> Result<BuddyAllocator, AllocInitError> {
        if !total_memory.is_power_of_two() {
            return Err(AllocInitError::InvalidConfig);
        }

        let mut free = FreeTable::new(total_memory, policy);
        free.insert(Block::new(0, total_memory));

        Ok(BuddyAllocator {
            total_memory,
            free,
            allocated: Vec::new(),
            observers: Vec::new(),
        })
    }

    /// Subscribes `observer` to state changes.
    ///
    /// Observers are notified in subscription order.
    pub fn subscribe(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Returns the size of the managed address space.
    #[inline]
    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Returns the currently allocated blocks, oldest first.
    #[inline]
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocated
    }

    /// Returns the sum of the sizes of all free blocks.
    pub fn free_bytes(&self) -> usize {
        self.free.free_bytes()
    }

    /// Returns the sum of the reserved sizes of all allocated blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.iter().map(Allocation::size).sum()
    }

    /// Returns the size of the largest free block, or `None` if the address
    /// space is fully allocated.
    ///
    /// This is the largest request that can currently succeed.
    pub fn largest_free_block(&self) -> Option<usize> {
        self.free.largest()
    }

    /// Returns the free blocks of exactly `size`, in the order they will be
    /// handed out.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two or exceeds the total memory.
    pub fn free_blocks(&self, size: usize) -> impl Iterator<Item = Block> + '_ {
        assert!(size <= self.total_memory, "size class out of range");
        self.free.class(size).iter().copied()
    }

    /// Returns `true` if `block` is currently allocated.
    pub fn is_allocated(&self, block: Block) -> bool {
        self.allocated.iter().any(|a| a.block() == block)
    }

    /// Computes usage statistics.
    pub fn stats(&self) -> BuddyStats {
        BuddyStats {
            total: self.total_memory,
            free: self.free_bytes(),
            allocated: self.allocated_bytes(),
            requested: self.allocated.iter().map(Allocation::requested).sum(),
            allocations: self.allocated.len(),
            free_blocks_by_class: self.free.counts(),
            largest_free: self.largest_free_block(),
        }
    }

    /// Returns a copy of the free and allocated blocks.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            total_memory: self.total_memory,
            free: self.free.iter().copied().collect(),
            allocated: self.allocated.clone(),
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }

        let snapshot = self.snapshot();
        for observer in self.observers.iter_mut() {
            observer.visualize(&snapshot);
        }
    }

    /// Splits the smallest free block larger than `size` down to `size`.
    ///
    /// Each split removes a block from one size class and inserts both of its
    /// halves into the next smaller class. Returns `false` if no larger free
    /// block exists.
    fn split_down_to(&mut self, size: usize) -> bool {
        let Some(mut cur_size) = self.free.smallest_nonempty_above(size) else {
            return false;
        };

        while cur_size > size {
            let block = self
                .free
                .pop(cur_size)
                .expect("size class emptied during split");
            let (lo, hi) = block.split();

            debug!("split {block} into {lo} and {hi}");

            self.free.insert(lo);
            self.free.insert(hi);
            cur_size /= 2;
        }

        true
    }

    /// Attempts to allocate a block of at least `size` addresses.
    ///
    /// The block is taken from the free list of size `round_up_pow2(size)`,
    /// splitting a larger free block first if that list is empty.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidRequest`] if `size` is zero or exceeds the total
    ///   memory.
    /// - [`AllocError::NoMemory`] if no free block is large enough. The
    ///   allocator state is unchanged.
    pub fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        if size == 0 || size > self.total_memory {
            warn!(
                "rejected allocation of {size}: must be in 1..={}",
                self.total_memory
            );
            return Err(AllocError::InvalidRequest);
        }

        // Cannot fail: size <= total_memory, which is a power of two.
        let target_size = round_up_pow2(size).ok_or(AllocError::InvalidRequest)?;

        if self.free.class(target_size).is_empty() && !self.split_down_to(target_size) {
            warn!("unable to allocate {size}: no free block of {target_size} or larger");
            return Err(AllocError::NoMemory);
        }

        let block = self
            .free
            .pop(target_size)
            .expect("no free block after split");
        self.allocated.push(Allocation::new(block, size));

        debug!("allocated {size} at {block} ({target_size})");

        self.notify();
        Ok(block)
    }

    /// Deallocates `block`, coalescing it with free buddies.
    ///
    /// Only the start and end of `block` are consulted; the reserved size is
    /// taken from the allocation record.
    ///
    /// # Errors
    ///
    /// Returns [`DeallocError::NotAllocated`] if `block` is not currently
    /// allocated, such as on a double free. The allocator state is unchanged.
    pub fn deallocate(&mut self, block: Block) -> Result<(), DeallocError> {
        let Some(idx) = self.allocated.iter().position(|a| a.block() == block) else {
            warn!("deallocation of {block} failed: not allocated");
            return Err(DeallocError::NotAllocated(block));
        };

        let alloc = self.allocated.remove(idx);
        debug!("deallocated {} ({})", alloc.block(), alloc.size());

        self.free.insert(alloc.block());
        self.coalesce(alloc.block());

        self.notify();
        Ok(())
    }

    /// Repeatedly merges the free block `block` with its buddy for as long as
    /// the buddy is free.
    ///
    /// Each iteration doubles the block size, so this runs at most
    /// `log2(total_memory)` times.
    fn coalesce(&mut self, mut block: Block) {
        while block.size() < self.total_memory {
            let buddy = block.buddy();

            if !self.free.remove(&buddy) {
                break;
            }

            let removed = self.free.remove(&block);
            debug_assert!(removed, "coalesced block missing from free table");

            let merged = block.merge(buddy);
            debug!("merged {block} and {buddy} into {merged}");

            self.free.insert(merged);
            block = merged;
        }
    }
}
