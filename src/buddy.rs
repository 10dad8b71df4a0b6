//! A binary-buddy memory allocator.

use core::{alloc::Layout, fmt, ptr::NonNull};

use alloc::{string::String, vec::Vec};

use crate::{
    base::BasePtr,
    config::{BuddyConfig, MIN_ORDER},
    dump::Dump,
    polyfill::NonNullStrict,
    size,
    table::{BlockTable, DoubleLink, Slot},
    AllocError, AllocInitError,
};

/// Emits a trace event if the allocator has trace narration enabled.
macro_rules! narrate {
    ($alloc:expr, $($arg:tt)+) => {
        if $alloc.config.trace {
            tracing::trace!($($arg)+);
        }
    };
}

/// The free list of a single order.
#[derive(Debug)]
struct BuddyLevel {
    order: u8,
    free_list: Option<usize>,
    len: usize,
}

impl BuddyLevel {
    fn new(order: u8) -> BuddyLevel {
        BuddyLevel {
            order,
            free_list: None,
            len: 0,
        }
    }

    /// Pushes the block at `ofs` onto the front of the free list.
    fn free_list_push(&mut self, table: &mut BlockTable, ofs: usize) {
        debug_assert_eq!(ofs % (1 << self.order), 0, "misaligned free block");

        let old_head = self.free_list;

        // If `old_head` exists, it points back to the new head.
        if let Some(old) = old_head {
            table.link_mut(old).prev = Some(ofs);
        }

        table.set(
            ofs,
            Slot::Free {
                order: self.order,
                link: DoubleLink {
                    prev: None,
                    next: old_head,
                },
            },
        );

        self.free_list = Some(ofs);
        self.len += 1;
    }

    /// Removes the block at `ofs` from the free list and marks its slot
    /// `Interior`.
    ///
    /// # Panics
    ///
    /// Panics if `ofs` is not a free block of this order.
    fn free_list_remove(&mut self, table: &mut BlockTable, ofs: usize) {
        assert_eq!(
            table.free_order(ofs),
            Some(self.order),
            "missing block in free list"
        );

        let removed = table.link(ofs);
        table.set(ofs, Slot::Interior);

        match removed.prev {
            // Link `prev` forward to `next`.
            Some(p) => table.link_mut(p).next = removed.next,

            // If there's no previous block, then `removed` is the head of the
            // free list.
            None => self.free_list = removed.next,
        }

        if let Some(n) = removed.next {
            // Link `next` back to `prev`.
            table.link_mut(n).prev = removed.prev;
        }

        self.len -= 1;
    }

    /// Pops the head of the free list.
    ///
    /// If the free list is empty, returns `None`.
    fn free_list_pop(&mut self, table: &mut BlockTable) -> Option<usize> {
        let head = self.free_list?;
        self.free_list_remove(table, head);
        Some(head)
    }

    fn iter<'a>(&self, table: &'a BlockTable) -> FreeBlocks<'a> {
        FreeBlocks {
            table,
            next: self.free_list,
        }
    }
}

/// An iterator over the offsets of the blocks in one free list, from the head.
///
/// This `struct` is created by [`BuddyAllocator::free_blocks`].
#[derive(Debug)]
pub struct FreeBlocks<'a> {
    table: &'a BlockTable,
    next: Option<usize>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.next?;
        self.next = self.table.link(cur).next;
        Some(cur)
    }
}

/// A binary-buddy allocator over a single arena of `2^order` bytes.
///
/// Blocks range from `2^MIN_ORDER` bytes up to the whole arena. Allocation
/// splits the smallest sufficiently large free block down to the requested
/// order; deallocation merges the freed block with its buddy for as long as
/// the buddy is free at the same order.
///
/// The allocator keeps all metadata out of band, so the full arena is
/// available to callers and any pointer can be checked before it is freed.
///
/// ```
/// use buddy_arena::{AllocError, BuddyAllocator};
///
/// let mut arena = BuddyAllocator::new(8).unwrap();
///
/// let block = arena.allocate(4).unwrap();
/// assert_eq!(arena.block_size_of(block.cast()), Some(8));
///
/// arena.deallocate(block.cast()).unwrap();
/// assert_eq!(
///     arena.deallocate(block.cast()),
///     Err(AllocError::InvalidFree { addr: block.cast::<u8>().as_ptr() as usize })
/// );
/// assert!(arena.is_pristine());
/// ```
pub struct BuddyAllocator {
    /// Pointer to the arena managed by this allocator.
    base: BasePtr,
    /// Layout the arena was allocated with.
    region_layout: Layout,
    config: BuddyConfig,
    /// One free list per order, indexed by order.
    levels: Vec<BuddyLevel>,
    table: BlockTable,
    num_used: usize,
}

// SAFETY: The allocator is the sole owner of its arena. Moving it to another
// thread moves that ownership along with it.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
    /// Constructs an allocator over a fresh arena of `2^order` bytes with the
    /// default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `order` is out of range or the arena cannot be
    /// allocated.
    pub fn new(order: u8) -> Result<BuddyAllocator, AllocInitError> {
        BuddyAllocator::with_config(BuddyConfig::new(order))
    }

    /// Constructs an allocator according to `config`.
    ///
    /// The arena is zero-filled and starts out as a single free block.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured order is out of range or the arena
    /// cannot be allocated.
    pub fn with_config(config: BuddyConfig) -> Result<BuddyAllocator, AllocInitError> {
        let region_layout = config.region_layout()?;

        // SAFETY: `region_layout` has nonzero size.
        let raw = unsafe { alloc::alloc::alloc_zeroed(region_layout) };
        let region = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(region_layout))?;

        let base = BasePtr::new(region, region_layout.size());

        let mut levels: Vec<BuddyLevel> = (0..=config.order).map(BuddyLevel::new).collect();
        let mut table = BlockTable::new(config.order, MIN_ORDER);

        // The whole arena starts out as one free block.
        levels[usize::from(config.order)].free_list_push(&mut table, 0);

        tracing::debug!(
            order = config.order,
            capacity = region_layout.size(),
            overhead = config.overhead,
            "initialized buddy arena"
        );

        Ok(BuddyAllocator {
            base,
            region_layout,
            config,
            levels,
            table,
            num_used: 0,
        })
    }

    /// Returns the order of the arena.
    #[inline]
    pub fn order(&self) -> u8 {
        self.config.order
    }

    /// Returns the size of the arena in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region_layout.size()
    }

    /// Returns the size of the smallest block the allocator hands out.
    #[inline]
    pub fn min_block_size(&self) -> usize {
        1 << MIN_ORDER
    }

    /// Returns the number of bytes reserved per block on top of each request.
    #[inline]
    pub fn overhead(&self) -> usize {
        self.config.overhead
    }

    /// Returns the configuration the allocator was built with, including the
    /// current trace setting.
    #[inline]
    pub fn config(&self) -> BuddyConfig {
        self.config
    }

    /// Returns whether trace narration is enabled.
    #[inline]
    pub fn tracing(&self) -> bool {
        self.config.trace
    }

    /// Enables or disables trace narration of allocations and deallocations.
    ///
    /// Narration is emitted through `tracing` at the `TRACE` level and has no
    /// effect on results.
    pub fn set_trace(&mut self, enabled: bool) {
        self.config.trace = enabled;
    }

    /// Returns the number of live allocations.
    #[inline]
    pub fn num_used(&self) -> usize {
        self.num_used
    }

    /// Returns the total number of free blocks across all orders.
    pub fn num_free(&self) -> usize {
        self.levels.iter().map(|level| level.len).sum()
    }

    /// Iterates over the offsets of the free blocks of `order`, in free-list
    /// order.
    ///
    /// Orders outside the arena yield nothing.
    pub fn free_blocks(&self, order: u8) -> FreeBlocks<'_> {
        match self.levels.get(usize::from(order)) {
            Some(level) => level.iter(&self.table),
            None => FreeBlocks {
                table: &self.table,
                next: None,
            },
        }
    }

    /// Iterates over live allocations as `(offset, order)` pairs in ascending
    /// offset order.
    pub fn used_blocks(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.table.used()
    }

    /// Returns whether the allocator is back in its initial state: no live
    /// allocations and the whole arena a single free block.
    pub fn is_pristine(&self) -> bool {
        self.num_used == 0
            && self.num_free() == 1
            && self.levels[usize::from(self.order())].free_list == Some(0)
    }

    /// Returns the offset of `ptr` from the start of the arena, or `None` if
    /// `ptr` lies outside it.
    pub fn payload_offset(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.base.offset_of(ptr.addr())
    }

    /// Returns the size of the block reserved for the live allocation at
    /// `ptr`, or `None` if `ptr` is not a live allocation.
    pub fn block_size_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let ofs = self.payload_offset(ptr)?;
        self.table.used_order(ofs).map(|order| 1 << order)
    }

    /// Returns a pointer to the first byte of the block at `ofs`, or `None`
    /// if `ofs` lies outside the arena.
    pub fn block_ptr(&self, ofs: usize) -> Option<NonNull<u8>> {
        (ofs < self.capacity()).then(|| self.base.with_offset(ofs))
    }

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a pointer to `size` bytes at the start of the
    /// reserved block. The block is aligned to its own size. Its contents are
    /// whatever the previous owner left there (zero for never-used memory).
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidSize`] if `size` is zero or larger than
    ///   `isize::MAX`.
    /// - [`AllocError::SizeTooLarge`] if `size` plus the configured overhead
    ///   exceeds the arena.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough.
    ///
    /// The allocator is unchanged on error.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        let target = size::order_for(size, self.config.overhead, self.order())?;

        // Scan increasing block sizes until a free block is found. Nothing is
        // removed until a candidate is confirmed.
        let (block, init_order) = (target..=self.order())
            .find_map(|order| {
                self.levels[usize::from(order)]
                    .free_list_pop(&mut self.table)
                    .map(|block| (block, order))
            })
            .ok_or(AllocError::OutOfMemory { order: target })?;

        narrate!(self, offset = block, order = init_order, size, "selected free block");

        // Split the block repeatedly to obtain a suitably sized block. The
        // lower half keeps the block's offset; the upper half is its buddy.
        for order in (target..init_order).rev() {
            let buddy = block ^ (1 << order);
            self.levels[usize::from(order)].free_list_push(&mut self.table, buddy);

            narrate!(self, offset = block, buddy, order, "split block");
        }

        self.table.set(block, Slot::Used { order: target });
        self.num_used += 1;

        narrate!(self, offset = block, order = target, "allocated block");

        Ok(self.base.with_offset_and_size(block, size))
    }

    /// Deallocates the block at `ptr`, coalescing it with free buddies.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidFree`] if `ptr` is not the start of a live
    /// allocation from this allocator. This covers double frees, pointers
    /// into the middle of a block and pointers from elsewhere. The allocator
    /// is unchanged on error.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let invalid = AllocError::InvalidFree {
            addr: ptr.addr().get(),
        };

        let mut block = self.base.offset_of(ptr.addr()).ok_or(invalid)?;
        let mut order = self.table.used_order(block).ok_or(invalid)?;

        self.table.set(block, Slot::Interior);
        self.num_used -= 1;

        narrate!(self, offset = block, order, "freeing block");

        while order < self.order() {
            let buddy = block ^ (1 << order);

            if self.table.free_order(buddy) != Some(order) {
                break;
            }

            self.levels[usize::from(order)].free_list_remove(&mut self.table, buddy);

            narrate!(self, offset = block, buddy, order, "coalesced with buddy");

            // The lower address becomes the base of the merged block.
            block = block.min(buddy);
            order += 1;
        }

        self.levels[usize::from(order)].free_list_push(&mut self.table, block);

        narrate!(self, offset = block, order, "released block");

        Ok(())
    }

    /// Returns a view that renders the allocator state for debugging.
    pub fn display(&self) -> Dump<'_> {
        Dump::new(self)
    }

    /// Renders live allocations and free lists as text.
    ///
    /// The format is meant for humans and is not stable.
    pub fn dump(&self) -> String {
        use alloc::string::ToString;

        self.display().to_string()
    }

    /// Iterates over the orders that can hold blocks, smallest first.
    pub(crate) fn block_orders(&self) -> impl Iterator<Item = u8> {
        MIN_ORDER..=self.order()
    }
}

impl Drop for BuddyAllocator {
    fn drop(&mut self) {
        // SAFETY: the arena was allocated in `with_config` with exactly this
        // layout and is freed only here.
        unsafe { alloc::alloc::dealloc(self.base.ptr().as_ptr(), self.region_layout) };
    }
}

impl fmt::Debug for BuddyAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("base", &self.base)
            .field("config", &self.config)
            .field("num_used", &self.num_used)
            .field("num_free", &self.num_free())
            .finish()
    }
}
