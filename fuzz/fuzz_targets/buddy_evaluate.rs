#![no_main]

use arbitrary::Arbitrary;
use buddy_hater::{AllocatorOp, BuddySubject, Evaluator};
use buddy_sim::FreeListPolicy;
use libfuzzer_sys::fuzz_target;

// Keeps the shadow map small enough to scan on every op.
const MAX_TOTAL_BITS: u8 = 16;

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    total_bits: u8,
    address_order: bool,
    ops: Vec<AllocatorOp>,
}

fuzz_target!(|args: Args| {
    let policy = match args.address_order {
        true => FreeListPolicy::AddressOrder,
        false => FreeListPolicy::InsertionOrder,
    };

    let total_memory = 1 << (args.total_bits % (MAX_TOTAL_BITS + 1));
    let subject = BuddySubject::new(total_memory, policy).unwrap();

    if let Err(failed) = Evaluator::new(subject).evaluate(args.ops) {
        panic!("{}: {:?}", failed.failure, failed.failed_op);
    }
});
