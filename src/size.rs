//! Mapping of request sizes to block orders.

use core::cmp;

use crate::{config::MIN_ORDER, AllocError};

/// Rounds `x` up to the next power of two.
///
/// Returns `None` for zero or if the result would overflow.
pub fn round_up_pow2(x: usize) -> Option<usize> {
    match x {
        0 => None,
        x => x.checked_next_power_of_two(),
    }
}

/// Computes the order of the smallest block that can hold `size` bytes plus
/// `overhead` reserved bytes, in an arena of order `max_order`.
///
/// # Errors
///
/// - [`AllocError::InvalidSize`] if `size` is zero or exceeds `isize::MAX`, the
///   range a negative signed size wraps into.
/// - [`AllocError::SizeTooLarge`] if no block up to `max_order` fits.
pub fn order_for(size: usize, overhead: usize, max_order: u8) -> Result<u8, AllocError> {
    if size == 0 || size > isize::MAX as usize {
        return Err(AllocError::InvalidSize);
    }

    let too_large = AllocError::SizeTooLarge { size };

    let reserved = size.checked_add(overhead).ok_or(too_large)?;
    if reserved > 1 << max_order {
        return Err(too_large);
    }

    let block_size = cmp::max(round_up_pow2(reserved).ok_or(too_large)?, 1 << MIN_ORDER);

    // `block_size` is a power of two no larger than 2^max_order.
    Ok(block_size.trailing_zeros() as u8)
}
