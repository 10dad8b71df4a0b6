//! Allocates a string in a 256-byte arena, printing the allocator state before
//! and after freeing it.
//!
//! Run with `cargo run --example hello`.

use std::error::Error;

use buddy_arena::{BuddyAllocator, BuddyConfig};
use tracing::Level;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .init();

    let mut arena = BuddyAllocator::with_config(BuddyConfig::new(8).with_trace(true))?;

    let message = b"HelloWorld\0";
    let mut block = arena.allocate(message.len())?;

    // SAFETY: `block` is a live allocation of exactly `message.len()` bytes
    // and nothing else refers to it.
    unsafe { block.as_mut() }.copy_from_slice(message);

    print!("{}", arena.display());

    arena.deallocate(block.cast())?;
    print!("{}", arena.display());

    Ok(())
}
