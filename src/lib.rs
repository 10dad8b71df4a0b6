//! A buddy-system allocator over a single fixed-size arena.
//!
//! [`BuddyAllocator`] manages an arena of `2^M` bytes (`M` at most
//! [`MAX_ORDER`]) using Knuth's buddy system: requests are rounded up to a
//! power of two, larger free blocks are split in half until one of the right
//! size exists, and freed blocks are merged with their buddies as far up as
//! possible.
//!
//! All bookkeeping lives outside the arena, which lets the allocator reject
//! double frees and foreign pointers instead of corrupting itself.
//!
//! ```
//! use buddy_arena::BuddyAllocator;
//!
//! let mut arena = BuddyAllocator::new(8)?;
//!
//! let block = arena.allocate(11)?;
//! unsafe { block.cast::<u8>().as_ptr().copy_from(b"HelloWorld\0".as_ptr(), 11) };
//! assert_eq!(arena.block_size_of(block.cast()), Some(16));
//!
//! arena.deallocate(block.cast())?;
//! assert!(arena.is_pristine());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![no_std]
#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
// This is necessary to allow `sptr` to shadow methods provided by newer
// toolchains.
#![allow(unstable_name_collisions)]

extern crate alloc;

mod base;
pub mod buddy;
pub mod config;
mod dump;
mod polyfill;
mod size;
mod table;

#[cfg(test)]
mod tests;

use core::alloc::Layout;

pub use crate::{
    buddy::{BuddyAllocator, FreeBlocks},
    config::{BuddyConfig, MAX_ORDER, MIN_ORDER},
    dump::Dump,
};

/// The error type for allocator constructors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocInitError {
    /// The requested arena is larger than the allocator supports.
    #[error("arena order {order} exceeds the maximum order {max}")]
    OrderTooLarge {
        /// The requested order.
        order: u8,
        /// The largest supported order.
        max: u8,
    },

    /// The requested arena cannot hold a single minimum-size block.
    #[error("arena order {order} is below the minimum block order {min}")]
    OrderTooSmall {
        /// The requested order.
        order: u8,
        /// The smallest supported order.
        min: u8,
    },

    /// The global allocator could not provide the arena.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    #[error("failed to allocate a {}-byte arena", .0.size())]
    AllocFailed(Layout),
}

/// Indicates why an allocation or deallocation was refused.
///
/// The allocator is left unchanged whenever one of these is returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The requested size was zero, or above `isize::MAX` (a wrapped negative
    /// size).
    #[error("allocation size must be nonzero and at most isize::MAX")]
    InvalidSize,

    /// No block in the arena is large enough for the request, even when the
    /// arena is empty.
    #[error("no block can hold {size} bytes")]
    SizeTooLarge {
        /// The requested size.
        size: usize,
    },

    /// No free block of the required order or larger is available.
    #[error("no free block of order {order} or larger")]
    OutOfMemory {
        /// The order the request mapped to.
        order: u8,
    },

    /// The pointer passed to `deallocate` is not a live allocation.
    #[error("address {addr:#x} is not a live allocation")]
    InvalidFree {
        /// The address of the rejected pointer.
        addr: usize,
    },
}
