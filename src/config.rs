//! Construction parameters for a [`BuddyAllocator`].
//!
//! [`BuddyAllocator`]: crate::BuddyAllocator

use core::alloc::Layout;

use crate::AllocInitError;

/// The order of the smallest block the allocator hands out (8 bytes).
pub const MIN_ORDER: u8 = 3;

/// The order of the largest arena an allocator may manage (256 bytes).
pub const MAX_ORDER: u8 = 8;

/// Configuration for a [`BuddyAllocator`].
///
/// ```
/// use buddy_arena::{BuddyAllocator, BuddyConfig};
///
/// let config = BuddyConfig::new(7).with_overhead(1).with_trace(true);
/// let arena = BuddyAllocator::with_config(config).unwrap();
/// assert_eq!(arena.capacity(), 128);
/// ```
///
/// [`BuddyAllocator`]: crate::BuddyAllocator
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuddyConfig {
    /// The arena holds `2^order` bytes.
    pub order: u8,
    /// Bytes reserved in every block on top of the requested size.
    ///
    /// The reserved bytes sit at the tail of the block and are never handed
    /// to the caller; they only influence which order a request maps to.
    pub overhead: usize,
    /// Whether allocation and deallocation emit trace events.
    pub trace: bool,
}

impl BuddyConfig {
    /// Returns the default configuration for an arena of `2^order` bytes.
    pub const fn new(order: u8) -> BuddyConfig {
        BuddyConfig {
            order,
            overhead: 0,
            trace: false,
        }
    }

    /// Sets the per-block overhead.
    pub const fn with_overhead(mut self, overhead: usize) -> BuddyConfig {
        self.overhead = overhead;
        self
    }

    /// Enables or disables trace narration.
    pub const fn with_trace(mut self, trace: bool) -> BuddyConfig {
        self.trace = trace;
        self
    }

    /// Checks that the arena order is supported.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::OrderTooLarge`] if `order` exceeds
    /// [`MAX_ORDER`], or [`AllocInitError::OrderTooSmall`] if the arena could
    /// not hold a single minimum-size block.
    pub fn validate(&self) -> Result<(), AllocInitError> {
        if self.order > MAX_ORDER {
            return Err(AllocInitError::OrderTooLarge {
                order: self.order,
                max: MAX_ORDER,
            });
        }

        if self.order < MIN_ORDER {
            return Err(AllocInitError::OrderTooSmall {
                order: self.order,
                min: MIN_ORDER,
            });
        }

        Ok(())
    }

    /// Returns the layout of the arena described by this configuration.
    ///
    /// The arena is aligned to its own size, so offsets aligned to a block
    /// size yield addresses aligned to that block size.
    pub fn region_layout(&self) -> Result<Layout, AllocInitError> {
        self.validate()?;

        let size = 1_usize << self.order;
        Layout::from_size_align(size, size).map_err(|_| AllocInitError::OrderTooLarge {
            order: self.order,
            max: MAX_ORDER,
        })
    }
}

impl Default for BuddyConfig {
    fn default() -> Self {
        BuddyConfig::new(MAX_ORDER)
    }
}
