//! A simulated binary-buddy allocator.
//!
//! [`BuddyAllocator`] manages a fixed, power-of-two-sized address space that
//! starts at address zero. No memory is actually reserved: the allocator only
//! hands out address ranges ([`Block`]s) and tracks which parts of the space
//! are free and which are allocated.
//!
//! Requests are rounded up to the next power of two. If no free block of that
//! size exists, the smallest larger free block is repeatedly bisected until
//! one does. Freed blocks are coalesced with their buddies for as long as the
//! buddy is also free.
//!
//! Any number of [`Observer`]s may be subscribed to an allocator. Each one
//! receives a [`Snapshot`] of the allocator's state after every successful
//! allocation and deallocation.
//!
//! ```
//! use buddy_sim::BuddyAllocator;
//!
//! let mut buddy = BuddyAllocator::try_new(1024).unwrap();
//!
//! let a = buddy.allocate(100).unwrap();
//! assert_eq!((a.start(), a.size()), (0, 128));
//!
//! buddy.deallocate(a).unwrap();
//! assert_eq!(buddy.largest_free_block(), Some(1024));
//! ```

#![doc(html_root_url = "https://docs.rs/buddy_sim/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use core::fmt;

mod block;
pub mod buddy;
mod free_table;
pub mod observer;
mod stats;


pub use crate::{
    block::{round_up_pow2, Allocation, Block},
    buddy::BuddyAllocator,
    free_table::FreeListPolicy,
    observer::{BlockState, LogObserver, Observer, Snapshot, Span, Viewport},
    stats::BuddyStats,
};

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// The configuration of the allocator is invalid.
    ///
    /// This variant is returned when the total memory size is zero or not a
    /// power of two.
    InvalidConfig,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::InvalidConfig => {
                f.write_str("total memory must be a nonzero power of two")
            }
        }
    }
}

/// Indicates that an allocation request could not be satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The requested size was zero or larger than the managed address space.
    ///
    /// This is rejected before any free block is searched for.
    InvalidRequest,

    /// No free block large enough exists.
    ///
    /// The total amount of free memory may still exceed the request if the
    /// free space is fragmented. The request may succeed after a deallocation.
    NoMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidRequest => f.write_str("invalid allocation size"),
            AllocError::NoMemory => f.write_str("no free block large enough"),
        }
    }
}

/// Indicates that a deallocation request named a block that is not allocated.
///
/// This is returned for double frees and for blocks that were never handed
/// out by the allocator. The allocator state is left untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeallocError {
    /// The block is not currently allocated.
    NotAllocated(Block),
}

impl fmt::Display for DeallocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeallocError::NotAllocated(block) => {
                write!(f, "block {block} is not currently allocated")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocInitError {}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

#[cfg(feature = "std")]
impl std::error::Error for DeallocError {}
