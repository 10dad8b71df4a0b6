//! Out-of-band block metadata.
//!
//! Every minimum-size granule of the arena has one slot. The slot of the first
//! granule of a block records the block's state; the slots of its remaining
//! granules are `Interior`. The arena bytes themselves never hold metadata.

use alloc::vec::Vec;

/// Links to the neighbors of a free block within its order's free list.
///
/// Links are arena offsets rather than pointers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DoubleLink {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// The state recorded for one granule of the arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// The granule lies inside a larger block whose head is elsewhere.
    Interior,
    /// The granule heads a free block of the given order.
    Free { order: u8, link: DoubleLink },
    /// The granule heads a block handed out to a caller.
    Used { order: u8 },
}

#[derive(Debug)]
pub struct BlockTable {
    slots: Vec<Slot>,
    granule_order: u8,
}

impl BlockTable {
    /// Creates a table for an arena of `2^order` bytes split into granules of
    /// `2^granule_order` bytes, with every slot `Interior`.
    pub fn new(order: u8, granule_order: u8) -> BlockTable {
        debug_assert!(granule_order <= order);

        let num_slots = 1_usize << (order - granule_order);

        BlockTable {
            slots: alloc::vec![Slot::Interior; num_slots],
            granule_order,
        }
    }

    /// Retrieves the index of the slot for the granule at `ofs`.
    ///
    /// Returns `None` if `ofs` is not granule-aligned or lies past the arena.
    #[inline]
    fn index_of(&self, ofs: usize) -> Option<usize> {
        let mask = (1_usize << self.granule_order) - 1;
        if ofs & mask != 0 {
            return None;
        }

        let idx = ofs >> self.granule_order;
        (idx < self.slots.len()).then_some(idx)
    }

    #[inline]
    pub fn get(&self, ofs: usize) -> Option<Slot> {
        self.index_of(ofs).map(|idx| self.slots[idx])
    }

    /// Overwrites the slot at `ofs`.
    ///
    /// # Panics
    ///
    /// Panics if `ofs` does not name a slot.
    #[inline]
    pub fn set(&mut self, ofs: usize, slot: Slot) {
        let idx = self.index_of(ofs).expect("block offset outside table");
        self.slots[idx] = slot;
    }

    /// Returns the order of the free block headed at `ofs`, if any.
    #[inline]
    pub fn free_order(&self, ofs: usize) -> Option<u8> {
        match self.get(ofs)? {
            Slot::Free { order, .. } => Some(order),
            _ => None,
        }
    }

    /// Returns the order of the used block headed at `ofs`, if any.
    #[inline]
    pub fn used_order(&self, ofs: usize) -> Option<u8> {
        match self.get(ofs)? {
            Slot::Used { order } => Some(order),
            _ => None,
        }
    }

    /// Returns the free-list links of the free block at `ofs`.
    ///
    /// # Panics
    ///
    /// Panics if there is no free block at `ofs`.
    pub fn link(&self, ofs: usize) -> DoubleLink {
        match self.get(ofs) {
            Some(Slot::Free { link, .. }) => link,
            other => panic!("expected free block at {ofs:#x}, found {other:?}"),
        }
    }

    /// Returns a mutable reference to the free-list links of the free block at
    /// `ofs`.
    ///
    /// # Panics
    ///
    /// Panics if there is no free block at `ofs`.
    pub fn link_mut(&mut self, ofs: usize) -> &mut DoubleLink {
        let idx = self.index_of(ofs).expect("block offset outside table");

        match &mut self.slots[idx] {
            Slot::Free { link, .. } => link,
            other => panic!("expected free block at {ofs:#x}, found {other:?}"),
        }
    }

    /// Iterates over used blocks as `(offset, order)` in ascending offset
    /// order.
    pub fn used(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        let granule_order = self.granule_order;

        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(idx, slot)| match *slot {
                Slot::Used { order } => Some((idx << granule_order, order)),
                _ => None,
            })
    }
}
