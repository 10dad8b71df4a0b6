#![cfg(test)]
extern crate std;

use core::{cmp, ptr::NonNull, slice};

use alloc::{boxed::Box, collections::BTreeSet, vec::Vec};
use quickcheck::{Arbitrary, Gen, QuickCheck};

use crate::{AllocError, BuddyAllocator, BuddyConfig, MAX_ORDER, MIN_ORDER};

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 200;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

// Params =====================================================================

#[derive(Clone, Debug)]
struct BuddyParams {
    order: u8,
    overhead: usize,
}

impl Arbitrary for BuddyParams {
    fn arbitrary(g: &mut Gen) -> Self {
        BuddyParams {
            order: MIN_ORDER + u8::arbitrary(g) % (MAX_ORDER - MIN_ORDER + 1),
            overhead: *g.choose(&[0, 0, 1, 3]).unwrap(),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let mut items = Vec::new();
        if self.overhead != 0 {
            items.push(BuddyParams {
                order: self.order,
                overhead: 0,
            });
        }
        if self.order > MIN_ORDER {
            items.push(BuddyParams {
                order: self.order - 1,
                overhead: self.overhead,
            });
        }

        Box::new(items.into_iter())
    }
}

impl BuddyParams {
    fn build(&self) -> BuddyAllocator {
        let config = BuddyConfig::new(self.order).with_overhead(self.overhead);
        BuddyAllocator::with_config(config).unwrap()
    }
}

#[derive(Clone, Debug)]
enum AllocatorOp {
    /// Allocate a buffer of `size` bytes.
    Allocate { size: usize },
    /// Free an existing allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Free { index: usize },
}

/// Limit on allocation size, expressed in bits.
const ALLOC_LIMIT_BITS: u8 = 9;

fn limited_size(g: &mut Gen) -> usize {
    let exp = u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1);
    usize::arbitrary(g) % 2_usize.pow(exp.into())
}

impl Arbitrary for AllocatorOp {
    fn arbitrary(g: &mut Gen) -> Self {
        if bool::arbitrary(g) {
            AllocatorOp::Allocate {
                size: limited_size(g),
            }
        } else {
            AllocatorOp::Free {
                index: usize::arbitrary(g),
            }
        }
    }
}

// Invariants =================================================================

/// A snapshot of the free lists (per order, in list order) and the registry.
#[derive(Debug, PartialEq, Eq)]
struct State {
    free: Vec<Vec<usize>>,
    used: Vec<(usize, u8)>,
}

fn state(a: &BuddyAllocator) -> State {
    State {
        free: (0..=a.order()).map(|o| a.free_blocks(o).collect()).collect(),
        used: a.used_blocks().collect(),
    }
}

/// Checks that the blocks tile the arena, are aligned, and are fully
/// coalesced.
fn consistent(a: &BuddyAllocator) -> bool {
    let mut blocks: Vec<(usize, u8, bool)> = a
        .used_blocks()
        .map(|(ofs, order)| (ofs, order, false))
        .collect();

    let mut free = BTreeSet::new();
    for order in 0..=a.order() {
        for ofs in a.free_blocks(order) {
            if order < MIN_ORDER {
                return false;
            }
            free.insert((ofs, order));
            blocks.push((ofs, order, true));
        }
    }

    if blocks.len() != a.num_used() + a.num_free() || free.len() != a.num_free() {
        return false;
    }

    blocks.sort_unstable();

    let mut cursor = 0;
    for &(ofs, order, _) in &blocks {
        let size = 1_usize << order;
        if ofs != cursor || ofs % size != 0 {
            return false;
        }
        cursor += size;
    }

    if cursor != a.capacity() {
        return false;
    }

    // No two free buddies of the same order may coexist.
    free.iter()
        .filter(|&&(_, order)| order < a.order())
        .all(|&(ofs, order)| !free.contains(&(ofs ^ (1 << order), order)))
}

// Checker ====================================================================

struct Allocation {
    id: u32,
    ptr: NonNull<[u8]>,
}

impl Allocation {
    fn paint(&mut self) {
        let bytes = unsafe { self.ptr.as_mut() };
        bytes.fill(self.id as u8);
    }

    fn verify(&self) -> bool {
        let bytes = unsafe { self.ptr.as_ref() };
        bytes.iter().all(|&b| b == self.id as u8)
    }
}

struct AllocatorChecker {
    allocator: BuddyAllocator,
    allocations: Vec<Allocation>,
    num_ops: u32,
}

impl AllocatorChecker {
    fn new(params: &BuddyParams, capacity: usize) -> Self {
        AllocatorChecker {
            allocator: params.build(),
            allocations: Vec::with_capacity(capacity),
            num_ops: 0,
        }
    }

    fn do_op(&mut self, op: AllocatorOp) -> bool {
        let op_id = self.num_ops;
        self.num_ops += 1;

        match op {
            AllocatorOp::Allocate { size } => {
                let before = state(&self.allocator);

                match self.allocator.allocate(size) {
                    Ok(ptr) => {
                        if ptr.len() != size {
                            return false;
                        }

                        let block_size = match self.allocator.block_size_of(ptr.cast()) {
                            Some(s) => s,
                            None => return false,
                        };

                        let expected = cmp::max(
                            (size + self.allocator.overhead()).next_power_of_two(),
                            self.allocator.min_block_size(),
                        );
                        if block_size != expected
                            || ptr.cast::<u8>().as_ptr() as usize % block_size != 0
                        {
                            return false;
                        }

                        let mut a = Allocation { id: op_id, ptr };
                        a.paint();
                        self.allocations.push(a);
                    }

                    Err(_) => {
                        if state(&self.allocator) != before {
                            return false;
                        }
                    }
                }
            }

            AllocatorOp::Free { index } => {
                if self.allocations.is_empty() {
                    return true;
                }

                let index = index % self.allocations.len();
                let a = self.allocations.swap_remove(index);

                // Painted bytes would have been clobbered by any overlapping
                // allocation.
                if !a.verify() {
                    return false;
                }

                if self.allocator.deallocate(a.ptr.cast()).is_err() {
                    return false;
                }
            }
        }

        consistent(&self.allocator)
    }

    fn run(&mut self, ops: Vec<AllocatorOp>) -> bool {
        if !ops.into_iter().all(|op| self.do_op(op)) {
            return false;
        }

        // Free any outstanding allocations.
        for a in self.allocations.drain(..) {
            if !a.verify() || self.allocator.deallocate(a.ptr.cast()).is_err() {
                return false;
            }
        }

        self.allocator.is_pristine()
    }
}

// Properties =================================================================

fn allocations_are_mutually_exclusive_prop(params: BuddyParams, ops: Vec<AllocatorOp>) -> bool {
    let mut checker = AllocatorChecker::new(&params, ops.len());
    checker.run(ops)
}

fn round_trip_restores_state_prop(
    params: BuddyParams,
    ops: Vec<AllocatorOp>,
    size: usize,
) -> bool {
    let mut checker = AllocatorChecker::new(&params, ops.len());
    if !ops.into_iter().all(|op| checker.do_op(op)) {
        return false;
    }

    let alloc = &mut checker.allocator;
    let size = 1 + size % alloc.capacity();
    let before = state(alloc);

    match alloc.allocate(size) {
        Ok(ptr) => {
            if alloc.deallocate(ptr.cast()).is_err() {
                return false;
            }
        }
        Err(_) => (),
    }

    state(alloc) == before
}

fn full_coalescing_prop(params: BuddyParams, sizes: Vec<usize>, keys: Vec<u64>) -> bool {
    let mut alloc = params.build();
    let mut live = Vec::new();

    // Fill the arena with arbitrary sizes, then top it off with minimum-size
    // blocks so the allocations tile it exactly.
    for size in sizes {
        if let Ok(ptr) = alloc.allocate(1 + size % alloc.capacity()) {
            live.push(ptr);
        }
    }
    loop {
        match alloc.allocate(1) {
            Ok(ptr) => live.push(ptr),
            Err(AllocError::OutOfMemory { .. }) => break,
            Err(_) => return false,
        }
    }

    if alloc.num_free() != 0 || !consistent(&alloc) {
        return false;
    }

    // Free in an arbitrary order.
    let mut order: Vec<(u64, usize)> = (0..live.len())
        .map(|i| (keys.get(i).copied().unwrap_or(i as u64), i))
        .collect();
    order.sort_unstable();

    for (_, i) in order {
        if alloc.deallocate(live[i].cast()).is_err() || !consistent(&alloc) {
            return false;
        }
    }

    alloc.is_pristine() && alloc.used_blocks().count() == 0
}

#[test]
fn allocations_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(allocations_are_mutually_exclusive_prop as fn(_, _) -> bool);
}

#[test]
fn round_trip_restores_state() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(round_trip_restores_state_prop as fn(_, _, _) -> bool);
}

#[test]
fn full_coalescing_is_order_independent() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(full_coalescing_prop as fn(_, _, _) -> bool);
}

#[test]
fn exhaustion_keeps_existing_allocations() {
    let mut alloc = BuddyAllocator::new(MAX_ORDER).unwrap();
    let mut live: Vec<Allocation> = Vec::new();

    for id in 0.. {
        match alloc.allocate(24) {
            Ok(ptr) => {
                let mut a = Allocation { id, ptr };
                a.paint();
                live.push(a);
            }
            Err(e) => {
                assert_eq!(e, AllocError::OutOfMemory { order: 5 });
                break;
            }
        }
    }

    assert_eq!(live.len(), 8);
    assert!(live.iter().all(Allocation::verify));
    assert!(consistent(&alloc));

    // A double free in the middle of the teardown is rejected and harmless.
    let first = live.remove(0);
    alloc.deallocate(first.ptr.cast()).unwrap();
    let snapshot = state(&alloc);
    assert!(alloc.deallocate(first.ptr.cast()).is_err());
    assert_eq!(state(&alloc), snapshot);

    for a in live.into_iter().rev() {
        assert!(a.verify());
        alloc.deallocate(a.ptr.cast()).unwrap();
    }
    assert!(alloc.is_pristine());
}

#[test]
fn every_order_tiles_and_coalesces() {
    for order in MIN_ORDER..=MAX_ORDER {
        let mut alloc = BuddyAllocator::new(order).unwrap();
        let n = alloc.capacity() / alloc.min_block_size();

        let live: Vec<_> = (0..n).map(|_| alloc.allocate(1).unwrap()).collect();
        assert_eq!(alloc.num_free(), 0);

        // Free even blocks first so no merge can happen until the odd ones go.
        for ptr in live.iter().step_by(2) {
            alloc.deallocate(ptr.cast()).unwrap();
        }
        assert_eq!(alloc.free_blocks(MIN_ORDER).count(), n / 2 + n % 2);
        for ptr in live.iter().skip(1).step_by(2) {
            alloc.deallocate(ptr.cast()).unwrap();
        }

        assert!(alloc.is_pristine(), "order {order} did not coalesce");
    }
}

#[test]
fn payload_is_writable_to_full_length() {
    let mut alloc = BuddyAllocator::new(MAX_ORDER).unwrap();
    let ptr = alloc.allocate(200).unwrap();

    let bytes = unsafe { slice::from_raw_parts_mut(ptr.cast::<u8>().as_ptr(), ptr.len()) };
    bytes.copy_from_slice(&[0xA5; 200]);
    assert!(bytes.iter().all(|&b| b == 0xA5));

    alloc.deallocate(ptr.cast()).unwrap();
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}
