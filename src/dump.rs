//! Human-readable rendering of allocator state.

use core::fmt;

use crate::BuddyAllocator;

/// Renders the live allocations and free lists of a [`BuddyAllocator`].
///
/// Live allocations are listed as `{ offset, size }` in ascending offset
/// order, followed by one line per non-empty free list, smallest order first,
/// with blocks in free-list order.
///
/// This `struct` is created by [`BuddyAllocator::display`].
pub struct Dump<'a> {
    alloc: &'a BuddyAllocator,
}

impl<'a> Dump<'a> {
    pub(crate) fn new(alloc: &'a BuddyAllocator) -> Dump<'a> {
        Dump { alloc }
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.alloc;

        writeln!(
            f,
            "arena: {} bytes, {} used, {} free",
            a.capacity(),
            a.num_used(),
            a.num_free()
        )?;

        for (ofs, order) in a.used_blocks() {
            writeln!(f, "{{ {ofs:#06x}, {} }}", 1_usize << order)?;
        }

        for order in a.block_orders() {
            let mut blocks = a.free_blocks(order).peekable();
            if blocks.peek().is_none() {
                continue;
            }

            write!(f, "free[{order}]:")?;
            for ofs in blocks {
                write!(f, " |  {} @ {ofs:#06x}  |", 1_usize << order)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
