//! A small library for ~~hating on~~ evaluating the correctness of simulated
//! allocators.
//!
//! The [`Evaluator`] replays a sequence of [`AllocatorOp`]s against a
//! [`Subject`] while keeping a shadow map of which operation owns each
//! address. Any block handed out over an address that is already owned, and
//! any block whose ownership changed while it was outstanding, fails the
//! evaluation.

use std::fmt;

use arbitrary::Arbitrary;
use buddy_sim::{AllocError, Block, BuddyAllocator, DeallocError, FreeListPolicy};
use log::debug;

/// Largest allocation size generated by `Arbitrary`, expressed in bits.
const SIZE_LIMIT_BITS: u8 = 20;

/// A single operation against a subject.
#[derive(Clone, Debug)]
pub enum AllocatorOp {
    /// Allocate at least this many addresses.
    Alloc(usize),
    /// Free the outstanding block at this index, modulo the number of
    /// outstanding blocks.
    Dealloc(usize),
    /// Free a block which was never handed out.
    Bogus { start: usize, size: usize },
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
    Bogus,
}

fn limited_size(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<usize> {
    // Select a random bit index to distribute sizes evenly between powers of two.
    let shift = u8::arbitrary(u)? % (SIZE_LIMIT_BITS + 1);
    Ok(usize::arbitrary(u)? % (1 << shift))
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(limited_size(u)?),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
            AllocatorOpTag::Bogus => AllocatorOp::Bogus {
                start: limited_size(u)?,
                size: limited_size(u)?,
            },
        };

        Ok(op)
    }
}

/// An allocator under evaluation.
pub trait Subject {
    /// Returns the size of the managed address space.
    fn total_memory(&self) -> usize;

    /// Allocates a block of at least `size` addresses.
    fn allocate(&mut self, size: usize) -> Result<Block, AllocError>;

    /// Deallocates `block`.
    fn deallocate(&mut self, block: Block) -> Result<(), DeallocError>;

    /// Returns the sum of the sizes of all free blocks.
    fn free_bytes(&self) -> usize;
}

/// A [`BuddyAllocator`] under evaluation.
#[derive(Debug)]
pub struct BuddySubject(BuddyAllocator);

impl BuddySubject {
    pub fn new(total_memory: usize, policy: FreeListPolicy) -> Option<Self> {
        BuddyAllocator::try_with_policy(total_memory, policy)
            .ok()
            .map(BuddySubject)
    }

    pub fn inner(&self) -> &BuddyAllocator {
        &self.0
    }
}

impl Subject for BuddySubject {
    fn total_memory(&self) -> usize {
        self.0.total_memory()
    }

    fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        self.0.allocate(size)
    }

    fn deallocate(&mut self, block: Block) -> Result<(), DeallocError> {
        self.0.deallocate(block)
    }

    fn free_bytes(&self) -> usize {
        self.0.free_bytes()
    }
}

/// Records which operation owns each address of a simulated address space.
struct ShadowMap {
    // Zero means unowned; otherwise the owning op ID plus one.
    owners: Vec<u64>,
}

impl ShadowMap {
    fn new(total_memory: usize) -> ShadowMap {
        ShadowMap {
            owners: vec![0; total_memory],
        }
    }

    fn is_unowned(&self, block: &Block) -> bool {
        self.owners[block.range()].iter().all(|&o| o == 0)
    }

    /// "Paints" the addresses in `block` with `id`.
    fn paint(&mut self, block: &Block, id: u64) {
        self.owners[block.range()].fill(id + 1);
    }

    fn clear(&mut self, block: &Block) {
        self.owners[block.range()].fill(0);
    }

    /// Verifies that every address in `block` is still owned by `id`.
    fn verify(&self, block: &Block, id: u64) -> bool {
        self.owners[block.range()].iter().all(|&o| o == id + 1)
    }
}

/// An outstanding block and the operation that allocated it.
struct Outstanding {
    block: Block,
    id: u64,
}

/// The reason an evaluation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A block lies outside the address space.
    OutOfBounds(Block),
    /// A block is smaller than requested, or not a power of two.
    WrongSize { requested: usize, block: Block },
    /// A block overlaps another outstanding block.
    Overlap(Block),
    /// An allocation the subject should have accepted was rejected as invalid.
    Rejected(usize),
    /// An outstanding block could not be deallocated.
    DeallocFailed(Block),
    /// A bogus deallocation was accepted.
    BogusAccepted(Block),
    /// Memory was lost or duplicated after everything was freed.
    Leaked { free: usize, total: usize },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::OutOfBounds(b) => write!(f, "block {b} is out of bounds"),
            Failure::WrongSize { requested, block } => {
                write!(f, "request of {requested} returned {block}")
            }
            Failure::Overlap(b) => write!(f, "block {b} overlaps an outstanding block"),
            Failure::Rejected(size) => write!(f, "valid request of {size} was rejected"),
            Failure::DeallocFailed(b) => write!(f, "deallocation of {b} failed"),
            Failure::BogusAccepted(b) => write!(f, "bogus deallocation of {b} succeeded"),
            Failure::Leaked { free, total } => {
                write!(f, "{free} of {total} addresses free after releasing all blocks")
            }
        }
    }
}

/// A failed evaluation.
#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    pub failed_op: Option<AllocatorOp>,
    pub failure: Failure,
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    fn check_allocation(&self, size: usize, block: &Block) -> Result<(), Failure> {
        if block.end() > self.subject.total_memory() {
            return Err(Failure::OutOfBounds(*block));
        }

        if !block.is_aligned() || block.size() < size {
            return Err(Failure::WrongSize {
                requested: size,
                block: *block,
            });
        }

        Ok(())
    }

    fn do_op(
        &mut self,
        op_id: u64,
        op: &AllocatorOp,
        shadow: &mut ShadowMap,
        outstanding: &mut Vec<Outstanding>,
    ) -> Result<(), Failure> {
        let total = self.subject.total_memory();

        match *op {
            AllocatorOp::Alloc(size) => {
                let block = match self.subject.allocate(size) {
                    Ok(b) => b,
                    Err(AllocError::InvalidRequest) if size != 0 && size <= total => {
                        return Err(Failure::Rejected(size));
                    }
                    Err(_) => return Ok(()),
                };

                self.check_allocation(size, &block)?;

                if !shadow.is_unowned(&block) {
                    return Err(Failure::Overlap(block));
                }

                shadow.paint(&block, op_id);
                outstanding.push(Outstanding { block, id: op_id });
            }

            AllocatorOp::Dealloc(raw_idx) => {
                if outstanding.is_empty() {
                    return Ok(());
                }

                let len = outstanding.len();
                let Outstanding { block, id } = outstanding.swap_remove(raw_idx % len);

                if !shadow.verify(&block, id) {
                    return Err(Failure::Overlap(block));
                }

                self.subject
                    .deallocate(block)
                    .map_err(|_| Failure::DeallocFailed(block))?;
                shadow.clear(&block);
            }

            AllocatorOp::Bogus { start, size } => {
                let Some(block) = Block::from_range(start..start.saturating_add(size)) else {
                    return Ok(());
                };

                if outstanding.iter().any(|o| o.block == block) {
                    return Ok(());
                }

                if self.subject.deallocate(block).is_ok() {
                    return Err(Failure::BogusAccepted(block));
                }
            }
        }

        Ok(())
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut shadow = ShadowMap::new(self.subject.total_memory());
        let mut outstanding = Vec::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            if let Err(failure) = self.do_op(op_id, &op, &mut shadow, &mut outstanding) {
                debug!("evaluation failed at op {op_id}: {failure}");
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    failure,
                });
            }

            completed.push(op);
        }

        for Outstanding { block, id } in outstanding {
            let result = if shadow.verify(&block, id) {
                self.subject
                    .deallocate(block)
                    .map_err(|_| Failure::DeallocFailed(block))
            } else {
                Err(Failure::Overlap(block))
            };

            if let Err(failure) = result {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    failure,
                });
            }
        }

        let total = self.subject.total_memory();
        let free = self.subject.free_bytes();
        if free != total {
            return Err(Failed {
                completed,
                failed_op: None,
                failure: Failure::Leaked { free, total },
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arbitrary::Unstructured;

    use super::*;

    #[test]
    fn scripted_ops_pass() {
        let subject = BuddySubject::new(1024, FreeListPolicy::InsertionOrder).unwrap();
        let mut eval = Evaluator::new(subject);

        let ops = vec![
            AllocatorOp::Alloc(100),
            AllocatorOp::Alloc(200),
            AllocatorOp::Alloc(128),
            AllocatorOp::Bogus {
                start: 0,
                size: 64,
            },
            AllocatorOp::Dealloc(0),
            AllocatorOp::Alloc(0),
            AllocatorOp::Alloc(2048),
            AllocatorOp::Dealloc(1),
        ];

        eval.evaluate(ops).unwrap();
        assert_eq!(eval.into_subject().inner().free_bytes(), 1024);
    }

    #[test]
    fn arbitrary_ops_pass() {
        let bytes: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let mut u = Unstructured::new(&bytes);
        let ops: Vec<AllocatorOp> = Vec::arbitrary(&mut u).unwrap();

        for policy in [FreeListPolicy::InsertionOrder, FreeListPolicy::AddressOrder] {
            let subject = BuddySubject::new(1 << 16, policy).unwrap();
            Evaluator::new(subject).evaluate(ops.clone()).unwrap();
        }
    }

    /// A subject which never coalesces, to check that the evaluator notices.
    struct Leaky(BuddySubject);

    impl Subject for Leaky {
        fn total_memory(&self) -> usize {
            self.0.total_memory()
        }

        fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
            self.0.allocate(size)
        }

        fn deallocate(&mut self, _: Block) -> Result<(), DeallocError> {
            Ok(())
        }

        fn free_bytes(&self) -> usize {
            self.0.free_bytes()
        }
    }

    #[test]
    fn detects_leaks() {
        let subject = Leaky(BuddySubject::new(1024, FreeListPolicy::default()).unwrap());
        let failed = Evaluator::new(subject)
            .evaluate([AllocatorOp::Alloc(10), AllocatorOp::Dealloc(0)])
            .unwrap_err();

        assert_eq!(
            failed.failure,
            Failure::Leaked {
                free: 1008,
                total: 1024
            }
        );
    }

    #[test]
    fn detects_accepted_bogus_free() {
        let subject = Leaky(BuddySubject::new(1024, FreeListPolicy::default()).unwrap());
        let failed = Evaluator::new(subject)
            .evaluate([AllocatorOp::Bogus { start: 3, size: 5 }])
            .unwrap_err();

        assert_eq!(failed.failure, Failure::BogusAccepted(Block::new(3, 5)));
    }
}
