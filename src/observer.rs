//! Observing allocator state.
//!
//! A [`BuddyAllocator`] notifies its subscribed [`Observer`]s after every
//! successful allocation and deallocation, passing a [`Snapshot`] of the free
//! and allocated blocks. Observers receive copies; they cannot mutate the
//! allocator.
//!
//! The [`Display`] impl of [`Snapshot`] produces a textual report of the
//! memory state, and [`Viewport`] maps a snapshot onto a horizontal strip for
//! graphical front ends.
//!
//! [`BuddyAllocator`]: crate::BuddyAllocator
//! [`Display`]: core::fmt::Display

use alloc::vec::Vec;
use core::fmt;

use log::Level;

use crate::{Allocation, Block};

/// Receives allocator state after each mutation.
pub trait Observer {
    /// Called synchronously after each successful allocation or deallocation.
    fn visualize(&mut self, snapshot: &Snapshot);
}

impl<F> Observer for F
where
    F: FnMut(&Snapshot),
{
    fn visualize(&mut self, snapshot: &Snapshot) {
        self(snapshot)
    }
}

/// A copy of an allocator's free and allocated blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub(crate) total_memory: usize,
    pub(crate) free: Vec<Block>,
    pub(crate) allocated: Vec<Allocation>,
}

impl Snapshot {
    /// Returns the size of the managed address space.
    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Returns the free blocks, largest first.
    ///
    /// Blocks of the same size appear in the order the allocator would hand
    /// them out.
    pub fn free(&self) -> &[Block] {
        &self.free
    }

    /// Returns the allocated blocks in the order they were allocated.
    pub fn allocated(&self) -> &[Allocation] {
        &self.allocated
    }

    /// Returns every block with its state, sorted by start address.
    pub fn blocks_by_address(&self) -> Vec<(Block, BlockState)> {
        let mut blocks: Vec<(Block, BlockState)> = self
            .free
            .iter()
            .map(|&b| (b, BlockState::Free))
            .chain(self.allocated.iter().map(|a| (a.block(), BlockState::Allocated)))
            .collect();

        blocks.sort_unstable_by_key(|(b, _)| b.start());
        blocks
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory State:")?;

        for block in &self.free {
            writeln!(f, "  1 block of {} (free) at {}", block.size(), block)?;
        }

        for alloc in &self.allocated {
            writeln!(
                f,
                "  1 block of {} (allocated, requested {}) at {}",
                alloc.size(),
                alloc.requested(),
                alloc.block()
            )?;
        }

        Ok(())
    }
}

/// Whether a block is free or allocated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// The block is in the free table.
    Free,
    /// The block is in the allocated list.
    Allocated,
}

/// The horizontal extent of a block on a display.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Span {
    /// Left edge.
    pub x0: f64,
    /// Right edge.
    pub x1: f64,
    /// State of the block drawn in this span.
    pub state: BlockState,
}

/// A linear mapping from addresses onto a fixed-width display strip.
///
/// Address `a` is drawn at `origin + a * (width / total_memory)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    /// Display coordinate of address zero.
    pub origin: f64,
    /// Display width of the whole address space.
    pub width: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            origin: 50.0,
            width: 500.0,
        }
    }
}

impl Viewport {
    /// Constructs a viewport.
    pub fn new(origin: f64, width: f64) -> Viewport {
        Viewport { origin, width }
    }

    /// Maps an address onto the display.
    pub fn scale(&self, addr: usize, total_memory: usize) -> f64 {
        self.origin + addr as f64 * (self.width / total_memory as f64)
    }

    /// Maps every block in `snapshot` onto the display.
    ///
    /// Free blocks are emitted before allocated blocks, so a painter drawing
    /// the spans in order draws allocated blocks on top.
    pub fn project<'a>(&'a self, snapshot: &'a Snapshot) -> impl Iterator<Item = Span> + 'a {
        let total = snapshot.total_memory;
        let free = snapshot.free.iter().map(|&b| (b, BlockState::Free));
        let allocated = snapshot
            .allocated
            .iter()
            .map(|a| (a.block(), BlockState::Allocated));

        free.chain(allocated).map(move |(block, state)| Span {
            x0: self.scale(block.start(), total),
            x1: self.scale(block.end(), total),
            state,
        })
    }
}

/// An observer which writes each snapshot to the `log` facade.
#[derive(Copy, Clone, Debug)]
pub struct LogObserver {
    level: Level,
}

impl LogObserver {
    /// Constructs an observer which logs at `level`.
    pub fn new(level: Level) -> LogObserver {
        LogObserver { level }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        LogObserver::new(Level::Debug)
    }
}

impl Observer for LogObserver {
    fn visualize(&mut self, snapshot: &Snapshot) {
        if !log::log_enabled!(self.level) {
            return;
        }

        log::log!(
            self.level,
            "memory state: {} free blocks, {} allocated blocks",
            snapshot.free.len(),
            snapshot.allocated.len()
        );

        for block in &snapshot.free {
            log::log!(self.level, "  free {block} ({})", block.size());
        }

        for alloc in &snapshot.allocated {
            log::log!(
                self.level,
                "  allocated {} ({}, requested {})",
                alloc.block(),
                alloc.size(),
                alloc.requested()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::vec;
    use std::{prelude::rust_2021::*, string::ToString};

    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            total_memory: 1024,
            free: vec![Block::new(512, 512), Block::new(0, 128)],
            allocated: vec![
                Allocation::new(Block::new(256, 256), 200),
                Allocation::new(Block::new(128, 128), 128),
            ],
        }
    }

    #[test]
    fn report_lists_free_then_allocated() {
        let report = sample().to_string();
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(
            lines,
            [
                "Memory State:",
                "  1 block of 512 (free) at [512, 1024)",
                "  1 block of 128 (free) at [0, 128)",
                "  1 block of 256 (allocated, requested 200) at [256, 512)",
                "  1 block of 128 (allocated, requested 128) at [128, 256)",
            ]
        );
    }

    #[test]
    fn projection_is_linear() {
        let vp = Viewport::default();
        let spans: Vec<Span> = vp.project(&sample()).collect();

        assert_eq!(spans.len(), 4);
        assert_eq!(
            spans[0],
            Span {
                x0: 300.0,
                x1: 550.0,
                state: BlockState::Free
            }
        );
        assert_eq!(
            spans[2],
            Span {
                x0: 175.0,
                x1: 300.0,
                state: BlockState::Allocated
            }
        );
    }

    #[test]
    fn blocks_by_address_tile_the_space() {
        let blocks = sample().blocks_by_address();
        let starts: Vec<usize> = blocks.iter().map(|(b, _)| b.start()).collect();
        assert_eq!(starts, [0, 128, 256, 512]);

        for pair in blocks.windows(2) {
            assert_eq!(pair[0].0.end(), pair[1].0.start());
        }
    }

    #[test]
    fn closures_are_observers() {
        let mut seen = 0;
        {
            let mut obs = |s: &Snapshot| seen += s.allocated().len();
            obs.visualize(&sample());
        }
        assert_eq!(seen, 2);
    }
}
