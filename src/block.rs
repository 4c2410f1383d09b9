use core::{fmt, ops::Range};

/// Rounds `x` up to the nearest power of two.
///
/// Powers of two round to themselves. Returns `None` if `x` is zero or if the
/// result would not fit in a `usize`.
///
/// ```
/// use buddy_sim::round_up_pow2;
///
/// assert_eq!(round_up_pow2(100), Some(128));
/// assert_eq!(round_up_pow2(128), Some(128));
/// assert_eq!(round_up_pow2(0), None);
/// ```
#[inline]
pub fn round_up_pow2(x: usize) -> Option<usize> {
    match x {
        0 => None,
        x => x.checked_next_power_of_two(),
    }
}

/// A contiguous, half-open range of addresses `[start, end)`.
///
/// Blocks produced by a [`BuddyAllocator`] always have a power-of-two size
/// and a start address that is a multiple of that size.
///
/// [`BuddyAllocator`]: crate::BuddyAllocator
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    start: usize,
    end: usize,
}

impl Block {
    /// Constructs the block `[start, start + size)`.
    ///
    /// # Panics
    ///
    /// Panics if `start + size` overflows.
    #[inline]
    pub fn new(start: usize, size: usize) -> Block {
        let end = start.checked_add(size).expect("block end overflows a usize");
        Block { start, end }
    }

    /// Constructs a block from a start and end address.
    ///
    /// Returns `None` if `end <= start`.
    #[inline]
    pub fn from_range(range: Range<usize>) -> Option<Block> {
        (range.start < range.end).then(|| Block {
            start: range.start,
            end: range.end,
        })
    }

    /// Returns the first address in the block.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the address one past the end of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Returns the number of addresses spanned by the block.
    #[inline]
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Returns the block as a `Range`.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Returns `true` if the size is a power of two and the start address is a
    /// multiple of it.
    #[inline]
    pub fn is_aligned(&self) -> bool {
        let size = self.size();
        size.is_power_of_two() && self.start & (size - 1) == 0
    }

    /// Returns the buddy of this block.
    ///
    /// The buddy is the other half of the block this one was split from. It
    /// is only meaningful for aligned blocks in an address space based at
    /// zero.
    #[inline]
    pub fn buddy(&self) -> Block {
        let size = self.size();
        Block::new(self.start ^ size, size)
    }

    /// Bisects the block at its midpoint.
    ///
    /// Returns the lower and upper halves, which are buddies of each other.
    #[inline]
    pub fn split(&self) -> (Block, Block) {
        let mid = self.start + self.size() / 2;

        (
            Block {
                start: self.start,
                end: mid,
            },
            Block {
                start: mid,
                end: self.end,
            },
        )
    }

    /// Combines this block with its buddy.
    #[inline]
    pub fn merge(&self, buddy: Block) -> Block {
        debug_assert_eq!(self.buddy(), buddy);

        Block {
            start: self.start.min(buddy.start),
            end: self.end.max(buddy.end),
        }
    }

    /// Returns `true` if `addr` lies within the block.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Returns `true` if the two blocks share at least one address.
    #[inline]
    pub fn overlaps(&self, other: &Block) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl From<Block> for Range<usize> {
    fn from(block: Block) -> Range<usize> {
        block.range()
    }
}

/// A record of a currently allocated block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    block: Block,
    requested: usize,
}

impl Allocation {
    pub(crate) fn new(block: Block, requested: usize) -> Allocation {
        debug_assert!(requested <= block.size());
        Allocation { block, requested }
    }

    /// Returns the reserved block.
    #[inline]
    pub fn block(&self) -> Block {
        self.block
    }

    /// Returns the reserved size, which is always a power of two.
    #[inline]
    pub fn size(&self) -> usize {
        self.block.size()
    }

    /// Returns the size that was originally requested.
    #[inline]
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Returns the number of reserved addresses beyond the requested size.
    #[inline]
    pub fn internal_fragmentation(&self) -> usize {
        self.size() - self.requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up() {
        assert_eq!(round_up_pow2(0), None);
        assert_eq!(round_up_pow2(1), Some(1));
        assert_eq!(round_up_pow2(3), Some(4));
        assert_eq!(round_up_pow2(100), Some(128));
        assert_eq!(round_up_pow2(128), Some(128));
        assert_eq!(round_up_pow2(129), Some(256));
        assert_eq!(round_up_pow2(usize::MAX), None);
    }

    #[test]
    fn buddies_are_symmetric() {
        let b = Block::new(256, 128);
        assert_eq!(b.buddy(), Block::new(384, 128));
        assert_eq!(b.buddy().buddy(), b);
    }

    #[test]
    fn split_then_merge() {
        let b = Block::new(512, 256);
        let (lo, hi) = b.split();

        assert_eq!(lo, Block::new(512, 128));
        assert_eq!(hi, Block::new(640, 128));
        assert_eq!(lo.buddy(), hi);
        assert_eq!(hi.merge(lo), b);
    }

    #[test]
    fn alignment() {
        assert!(Block::new(0, 1024).is_aligned());
        assert!(Block::new(384, 128).is_aligned());
        assert!(!Block::new(64, 128).is_aligned());
        assert!(!Block::new(0, 100).is_aligned());
    }

    #[test]
    fn overlap() {
        let a = Block::new(0, 128);
        assert!(a.overlaps(&Block::new(64, 128)));
        assert!(!a.overlaps(&Block::new(128, 128)));
        assert!(a.contains(127));
        assert!(!a.contains(128));
        assert_eq!(Block::from_range(5..5), None);
    }
}
