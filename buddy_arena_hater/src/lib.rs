#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use alloc_hater::Subject;
use buddy_arena::{AllocError, AllocInitError, BuddyAllocator, BuddyConfig};

/// Operations specific to `BuddyAllocator`.
#[derive(Clone, Debug, arbitrary::Arbitrary)]
pub enum BuddyOp {
    /// Toggle trace narration.
    SetTrace(bool),
    /// Render the allocator state.
    Dump,
    /// Check the allocator's bookkeeping.
    Audit,
}

pub struct BuddySubject(BuddyAllocator);

impl BuddySubject {
    pub fn new(order: u8) -> Result<Self, AllocInitError> {
        let b = BuddyAllocator::new(order)?;
        Ok(BuddySubject(b))
    }

    pub fn with_config(config: BuddyConfig) -> Result<Self, AllocInitError> {
        let b = BuddyAllocator::with_config(config)?;
        Ok(BuddySubject(b))
    }

    pub fn allocator(&self) -> &BuddyAllocator {
        &self.0
    }
}

/// Checks that the free lists and live allocations exactly tile the arena.
///
/// # Panics
///
/// Panics with a dump of the allocator if they do not.
pub fn audit(alloc: &BuddyAllocator) {
    let mut blocks: Vec<(usize, u8)> = alloc.used_blocks().collect();
    for order in 0..=alloc.order() {
        blocks.extend(alloc.free_blocks(order).map(|ofs| (ofs, order)));
    }
    blocks.sort_unstable();

    let mut cursor = 0;
    for (ofs, order) in blocks {
        let size = 1_usize << order;
        assert!(
            ofs == cursor && ofs % size == 0,
            "block {ofs:#x} of order {order} out of place\n{}",
            alloc.dump()
        );
        cursor += size;
    }

    assert_eq!(cursor, alloc.capacity(), "arena not covered\n{}", alloc.dump());
}

impl Subject for BuddySubject {
    type Op = BuddyOp;
    type AllocError = AllocError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.allocate(size)
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), Self::AllocError> {
        self.0.deallocate(ptr)
    }

    fn handle_custom_op(&mut self, op: BuddyOp) {
        match op {
            BuddyOp::SetTrace(enabled) => self.0.set_trace(enabled),
            BuddyOp::Dump => drop(self.0.dump()),
            BuddyOp::Audit => audit(&self.0),
        }
    }
}
