#![no_main]

use alloc_hater::{AllocatorOp, Evaluator};
use arbitrary::Arbitrary;
use buddy_arena::{BuddyConfig, MAX_ORDER};
use buddy_arena_hater::{BuddyOp, BuddySubject};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    order: u8,
    overhead: u8,
    ops: Vec<AllocatorOp<BuddyOp>>,
}

fuzz_target!(|args: Args| {
    let Args {
        order,
        overhead,
        ops,
    } = args;

    let config = BuddyConfig::new(order % (MAX_ORDER + 1)).with_overhead(overhead.into());

    let subject = match BuddySubject::with_config(config) {
        Ok(s) => s,
        // Orders below the minimum block size are refused.
        Err(_) => return,
    };

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(ops) {
        panic!(
            "\nevaluation failed.\nconfig: {config:?}\nkind: {:?}\ncompleted: {:?}\nfailed: {:?}",
            failed.kind, failed.completed, failed.failed_op
        );
    }

    assert!(eval.subject().allocator().is_pristine());
});
