//! A small library for ~~hating on~~ evaluating the correctness of arena
//! allocators with checked deallocation.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{fmt::Debug, mem::MaybeUninit, ptr::NonNull, slice};

/// Upper bound on generated allocation sizes.
///
/// Subjects manage small arenas; larger sizes would only ever be refused.
pub const MAX_SIZE: usize = 1 << 10;

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
    Refree,
    Custom,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp<T> {
    /// Allocate a block of the given size.
    Alloc(usize),
    /// Free an outstanding block, chosen modulo the number of blocks.
    Dealloc(usize),
    /// Free an already-freed block again, chosen modulo the number of freed
    /// blocks. The subject must refuse.
    Refree(usize),
    /// An operation specific to the subject.
    Custom(T),
}

impl<'a, T: arbitrary::Arbitrary<'a>> arbitrary::Arbitrary<'a> for AllocatorOp<T> {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(usize::arbitrary(u)? % MAX_SIZE),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
            AllocatorOpTag::Refree => AllocatorOp::Refree(usize::arbitrary(u)?),
            AllocatorOpTag::Custom => AllocatorOp::Custom(T::arbitrary(u)?),
        };

        Ok(op)
    }
}

pub trait Subject {
    type Op: for<'a> arbitrary::Arbitrary<'a> + Clone + Debug;
    type AllocError: Debug;

    /// Allocates a block of memory of `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError>;

    /// Deallocates the block of memory pointed to by `ptr`.
    ///
    /// Implementations must refuse pointers that are not live allocations.
    fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), Self::AllocError>;

    fn handle_custom_op(&mut self, op: Self::Op) {
        // To silence the unused variable warning.
        drop(op);
    }
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory.
pub struct Block {
    // A pointer to the allocated region.
    ptr: NonNull<[u8]>,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

unsafe fn slice_ptr_to_uninit_slice_mut<'a>(ptr: NonNull<[u8]>) -> &'a mut [MaybeUninit<u8>] {
    unsafe { slice::from_raw_parts_mut(ptr.cast().as_ptr(), ptr.len()) }
}

fn paint(slice: &mut [MaybeUninit<u8>], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        byte.write(value);
    }
}

impl Block {
    /// Creates a block from `ptr` and paints it according to `id`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `ptr` must be valid for reads and writes for `ptr.len()` bytes.
    /// - No references to the memory at `ptr` may exist when this function is called.
    /// - No accesses to the memory at `ptr` may be made except by way of the returned `Block`
    ///   until said `Block` is dropped.
    pub unsafe fn init(ptr: NonNull<[u8]>, id: u64) -> Block {
        let mut b = Block { ptr, id };
        b.paint(id);
        b
    }

    /// Returns the block's address.
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// Returns the `Block`'s memory as a mutable slice of uninitialized bytes.
    pub fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: self is mutably borrowed, so no other references to the
        // slice can exist
        unsafe { slice_ptr_to_uninit_slice_mut(self.ptr) }
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        self.id = id;
        paint(self.as_uninit_slice_mut(), id);
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        // SAFETY: the block was fully painted on creation.
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub enum FailureKind {
    /// A live block's contents were overwritten.
    Clobbered,
    /// The subject refused to free a live block.
    DeallocRefused(String),
    /// The subject accepted a pointer that had already been freed.
    RefreeAccepted,
}

#[derive(Clone, Debug)]
pub struct Failed<T> {
    pub completed: Vec<AllocatorOp<T>>,
    pub failed_op: AllocatorOp<T>,
    pub kind: FailureKind,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed<S::Op>>
    where
        I: IntoIterator<Item = AllocatorOp<S::Op>>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();
        // Addresses of freed blocks that have not been handed out again.
        let mut freed: Vec<NonNull<u8>> = Vec::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();
            let fail = |completed, kind| Failed {
                completed,
                failed_op: op.clone(),
                kind,
            };

            match op.clone() {
                AllocatorOp::Alloc(size) => {
                    let ptr = match self.subject.allocate(size) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };

                    // The new block may start where a freed one did.
                    freed.retain(|&f| f != ptr.cast::<u8>());

                    let block = unsafe { Block::init(ptr, op_id) };
                    blocks.push(block);
                }

                AllocatorOp::Dealloc(raw_idx) => {
                    let block = match blocks.remove_modulo(raw_idx) {
                        Some(b) => b,
                        None => continue,
                    };

                    if !block.verify() {
                        return Err(fail(completed, FailureKind::Clobbered));
                    }

                    if let Err(e) = self.subject.deallocate(block.ptr()) {
                        return Err(fail(completed, FailureKind::DeallocRefused(format!("{e:?}"))));
                    }

                    freed.push(block.ptr());
                }

                AllocatorOp::Refree(raw_idx) => {
                    if freed.is_empty() {
                        continue;
                    }

                    let ptr = freed[raw_idx % freed.len()];

                    if self.subject.deallocate(ptr).is_ok() {
                        return Err(fail(completed, FailureKind::RefreeAccepted));
                    }
                }

                AllocatorOp::Custom(custom) => self.subject.handle_custom_op(custom),
            }

            completed.push(op);
        }

        for block in blocks {
            if !block.verify() {
                return Err(Failed {
                    failed_op: AllocatorOp::Dealloc(0),
                    completed,
                    kind: FailureKind::Clobbered,
                });
            }

            if let Err(e) = self.subject.deallocate(block.ptr()) {
                return Err(Failed {
                    failed_op: AllocatorOp::Dealloc(0),
                    completed,
                    kind: FailureKind::DeallocRefused(format!("{e:?}")),
                });
            }
        }

        Ok(())
    }
}
