use core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

use crate::polyfill::{NonNullStrict, Strict};

/// A pointer to the base of the arena managed by an allocator.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`.
    ///
    /// The returned value assumes the provenance of `ptr`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> BasePtr {
        debug_assert!(
            ptr.addr().get().checked_add(extent).is_some(),
            "arena limit overflows usize"
        );

        BasePtr { ptr, extent }
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the address of the base pointer.
    #[inline]
    pub fn addr(self) -> NonZeroUsize {
        self.ptr.addr()
    }

    /// Returns the address one past the end of the arena.
    #[inline]
    pub fn limit(self) -> usize {
        self.addr().get() + self.extent
    }

    #[inline]
    pub fn contains_addr(self, addr: NonZeroUsize) -> bool {
        self.addr() <= addr && addr.get() < self.limit()
    }

    /// Calculates the offset from `self` to `addr`.
    ///
    /// Returns `None` if `addr` lies outside the arena.
    #[inline]
    pub fn offset_of(self, addr: NonZeroUsize) -> Option<usize> {
        self.contains_addr(addr)
            .then(|| addr.get() - self.addr().get())
    }

    /// Creates a new pointer to the byte `offset` bytes past the base.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_offset(self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.extent);

        // Cannot be zero: the base address is nonzero and the sum stays below
        // `limit()`, which was checked not to overflow.
        let addr = NonZeroUsize::new(self.addr().get() + offset).unwrap();
        self.ptr.with_addr(addr)
    }

    /// Creates a slice pointer of `len` bytes starting `offset` bytes past the
    /// base.
    #[inline]
    pub fn with_offset_and_size(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset + len <= self.extent);

        let raw = self.ptr.as_ptr().with_addr(self.addr().get() + offset);
        let raw_slice = ptr::slice_from_raw_parts_mut(raw, len);

        // SAFETY: `raw` is derived from a non-null base and a nonzero address.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}
