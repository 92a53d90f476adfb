//! The pool allocator core
use core::{
    cell::Cell,
    fmt,
    iter::FusedIterator,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::Range,
    ptr::{self, NonNull},
    slice,
};

use crate::{Allocator, Init};

mod layout;
pub use self::layout::{LayoutError, PoolLayout, BLOCK_SIZE_MULTIPLE};

/// The largest number of blocks a single allocation can span. A run's length
/// is stored in one metadata byte.
pub const MAX_RUN_BLOCKS: usize = u8::MAX as usize;

#[doc = svgbobdoc::transform!(
/// A first-fit block allocator over a caller-supplied memory region.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///                          data segment                          metadata
///   ,--------+--------+--------+--------+--------+--------, ,---+---+---+---+---+---,
///   | blk 0  | blk 1  | blk 2  | blk 3  | blk 4  | blk 5  | | 1 | 3 | 0 | 0 | 0 | 0 |
///   '--------+--------+--------+--------+--------+--------' '-+-+-+-+---+---+---+---'
///    \______/ \______________________/ \_______________/      |   |
///      used            used                  free             |   '-- run of 3 at blk 1
///                                                             '------ run of 1 at blk 0
///   |<---------- block_size * block_count ---------------->|<-- block_count -->|
/// ```
/// </center>
///
/// The region is divided into `block_count = len / (block_size + 1)` blocks.
/// The data segment comes first, followed by one metadata byte per block.
///
/// A metadata byte holding `n > 0` marks the *head* of an allocation spanning
/// `n` blocks. The bytes of the other blocks in that run stay `0`, so a zero
/// byte alone doesn't mean the block is free; the scan in [`Self::allocate`]
/// jumps over every run by its head's length.
///
/// # Properties
///
/// - Every returned address is `block_size`-aligned relative to the start of
///   the region.
/// - An allocation spans at most [`MAX_RUN_BLOCKS`] blocks.
/// - The type is `Send` but not `Sync`. Wrap it in a lock to share it between
///   threads.
///
)]
pub struct PoolAllocator<'pool> {
    data: NonNull<u8>,
    meta: NonNull<Cell<u8>>,
    layout: PoolLayout,
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: The region is exclusively borrowed by the pool for `'pool`, and the
//         metadata is only ever reached through `&self`, which `!Sync`
//         confines to one thread at a time.
unsafe impl Send for PoolAllocator<'_> {}

impl Default for PoolAllocator<'_> {
    fn default() -> Self {
        Self::INIT
    }
}

impl Init for PoolAllocator<'_> {
    const INIT: Self = Self::INIT;
}

impl const_default1::ConstDefault for PoolAllocator<'_> {
    const DEFAULT: Self = Self::INIT;
}

impl<'pool> PoolAllocator<'pool> {
    /// A pool without any blocks. Every allocation fails.
    pub const INIT: Self = Self {
        data: NonNull::dangling(),
        meta: NonNull::dangling(),
        layout: PoolLayout::EMPTY,
        _phantom: PhantomData,
    };

    /// Construct a pool over `pool`, dividing it into `block_size`-byte
    /// blocks.
    ///
    /// Only the metadata segment is initialized. The contents of the data
    /// segment are left as they are.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::PoolAllocator;
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::uninit(); 1024];
    /// let alloc = PoolAllocator::new(&mut pool, 16);
    /// assert_eq!(alloc.block_count(), 60);
    /// ```
    ///
    /// The region must outlive the pool:
    ///
    /// ```rust,compile_fail
    /// use runpool::PoolAllocator;
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::uninit(); 1024];
    /// let alloc = PoolAllocator::new(&mut pool, 16);
    /// drop(pool); // dropping the region first is not allowed
    /// drop(alloc);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or not a multiple of
    /// [`BLOCK_SIZE_MULTIPLE`]. Use [`Self::try_new`] to handle this case.
    pub fn new(pool: &'pool mut [MaybeUninit<u8>], block_size: usize) -> Self {
        match Self::try_new(pool, block_size) {
            Ok(this) => this,
            Err(e) => panic!("invalid pool configuration: {}", e),
        }
    }

    /// Like [`Self::new`] but reports an invalid block size instead of
    /// panicking.
    pub fn try_new(
        pool: &'pool mut [MaybeUninit<u8>],
        block_size: usize,
    ) -> Result<Self, LayoutError> {
        let layout = PoolLayout::new(pool.len(), block_size)?;
        // Safety: `pool` is a mutable reference, which guarantees the absence
        // of aliasing references. Being `'pool` means it will outlive `self`.
        Ok(unsafe { Self::with_layout(NonNull::from(pool).cast(), layout) })
    }

    /// Construct a pool over the region specified by a slice pointer.
    ///
    /// # Safety
    ///
    /// The region will be considered owned by `self`. It must be valid for
    /// reads and writes, must outlive `self`, and must not be accessed by
    /// anything else except through pointers returned by `self`.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero or not a multiple of
    /// [`BLOCK_SIZE_MULTIPLE`].
    pub unsafe fn from_raw(pool: NonNull<[u8]>, block_size: usize) -> Self {
        match PoolLayout::new(pool.len(), block_size) {
            Ok(layout) => Self::with_layout(pool.cast(), layout),
            Err(e) => panic!("invalid pool configuration: {}", e),
        }
    }

    /// # Safety
    ///
    /// `start` must be valid for writes of `layout.pool_size()` bytes for
    /// `'pool`.
    unsafe fn with_layout(start: NonNull<u8>, layout: PoolLayout) -> Self {
        let meta = start.as_ptr().add(layout.data_size());

        // All blocks start out free
        ptr::write_bytes(meta, 0, layout.meta_size());

        trace!(
            "pool at {:p}: {} blocks of {} bytes",
            start,
            layout.block_count(),
            layout.block_size()
        );

        Self {
            data: start,
            // Safety: `meta` is derived from a non-null pointer by an
            //         in-bounds offset. `Cell<u8>` has the same layout as `u8`.
            meta: NonNull::new_unchecked(meta).cast(),
            layout,
            _phantom: PhantomData,
        }
    }

    #[inline]
    fn meta(&self) -> &[Cell<u8>] {
        // Safety: `meta` points to `block_count` initialized bytes owned by
        //         `self`. Client allocations never overlap them.
        unsafe { slice::from_raw_parts(self.meta.as_ptr(), self.layout.block_count()) }
    }

    /// The size of each block in bytes.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.block_size()
    }

    /// The number of blocks in the pool.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.layout.block_count()
    }

    /// The geometry of the pool.
    #[inline]
    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    /// The number of blocks needed to hold `size` bytes, or `None` if that
    /// exceeds [`MAX_RUN_BLOCKS`]. Zero-sized requests still take a block so
    /// that every allocation has a distinct, releasable address.
    #[inline]
    fn blocks_for(&self, size: usize) -> Option<usize> {
        let block_size = self.block_size();
        let blocks = size / block_size + (size % block_size != 0) as usize;
        let blocks = blocks.max(1);
        if blocks > MAX_RUN_BLOCKS {
            trace!("{} bytes span more than {} blocks", size, MAX_RUN_BLOCKS);
            None
        } else {
            Some(blocks)
        }
    }

    /// Find the lowest-addressed free run of `blocks_needed` blocks.
    fn find_free_run(&self, blocks_needed: usize) -> Option<usize> {
        debug_assert!(blocks_needed > 0);
        let meta = self.meta();

        // A run can't start past this point
        let limit = meta.len().checked_sub(blocks_needed)?;

        let mut pos = 0;
        while pos <= limit {
            let run_len = meta[pos].get() as usize;
            if run_len != 0 {
                // Skip the whole allocated run
                pos += run_len;
                continue;
            }

            // `pos` is free. The remaining blocks of the candidate run must be
            // free too, i.e., no run may start among them. Resume at the
            // first such head so the next iteration skips its run.
            match meta[pos + 1..pos + blocks_needed]
                .iter()
                .position(|m| m.get() != 0)
            {
                Some(i) => pos += i + 1,
                None => return Some(pos),
            }
        }

        None
    }

    /// Attempt to allocate at least `size` bytes.
    ///
    /// Returns the starting address of the allocated memory block on success;
    /// `None` otherwise.
    ///
    /// The request is rounded up to a whole number of blocks and placed at
    /// the lowest-addressed free run that is long enough. Requests spanning
    /// more than [`MAX_RUN_BLOCKS`] blocks always fail.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in time linear to the number of runs
    /// scanned.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let blocks_needed = self.blocks_for(size)?;
        let head = if let Some(head) = self.find_free_run(blocks_needed) {
            head
        } else {
            trace!("allocate({}): no free run of {} blocks", size, blocks_needed);
            return None;
        };

        self.meta()[head].set(blocks_needed as u8);
        trace!("allocate({}) = blocks {}..{}", size, head, head + blocks_needed);

        // Safety: `head < block_count`, so the address is within the data
        //         segment, which starts at a non-null address
        Some(unsafe { NonNull::new_unchecked(self.data.as_ptr().add(head * self.block_size())) })
    }

    /// Map an address to the index of the block starting there.
    #[inline]
    fn block_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.data.as_ptr() as usize)?;
        let block = offset / self.block_size();
        (offset % self.block_size() == 0 && block < self.block_count()).then(|| block)
    }

    /// Deallocate a previously allocated memory block.
    ///
    /// Addresses that are not the start of a block in this pool are ignored,
    /// as is an address whose block doesn't head an allocation (e.g., one
    /// that was already deallocated). This method never panics.
    ///
    /// # Safety
    ///
    ///  - If `ptr` heads a live allocation of `self`, the caller must own
    ///    that allocation. Releasing memory that something else (such as a
    ///    [`PoolBox`]) still uses lets the pool hand it out twice.
    ///  - The memory block must not be accessed after this call.
    ///
    /// Addresses that don't head a live allocation are tolerated, but that
    /// doesn't make the call safe in general.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// [`PoolBox`]: crate::PoolBox
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let block = if let Some(block) = self.block_index(ptr) {
            block
        } else {
            warn!("deallocate({:?}): not a block of this pool", ptr);
            return;
        };

        let head = &self.meta()[block];
        if head.get() == 0 {
            warn!("deallocate({:?}): block {} is not allocated", ptr, block);
        }
        head.set(0);
        trace!("deallocate({:?}) = block {}", ptr, block);
    }

    /// Shrink or grow a previously allocated memory block.
    ///
    /// Returns the new starting address of the memory block on success;
    /// `None` otherwise, in which case the original allocation is left
    /// untouched.
    ///
    /// Shrinking and growing into free blocks that immediately follow the
    /// allocation keep the address. Otherwise a new run is allocated, the
    /// contents are copied, and the old run is released.
    ///
    /// # Safety
    ///
    /// If `ptr` is a live allocation of `self`, no references to its
    /// contents may exist for the duration of the call.
    pub unsafe fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let head = self.block_index(ptr)?;
        let meta = self.meta();
        let old_blocks = meta[head].get() as usize;
        if old_blocks == 0 {
            warn!("reallocate({:?}): block {} is not allocated", ptr, head);
            return None;
        }

        let new_blocks = self.blocks_for(new_size)?;

        // Shrink, or grow toward the end
        let new_end = head + new_blocks;
        if new_blocks <= old_blocks
            || (new_end <= meta.len()
                && meta[head + old_blocks..new_end]
                    .iter()
                    .all(|m| m.get() == 0))
        {
            meta[head].set(new_blocks as u8);
            trace!(
                "reallocate({:?}, {}): {} -> {} blocks in place",
                ptr,
                new_size,
                old_blocks,
                new_blocks
            );
            return Some(ptr);
        }

        // Move. The old run stays allocated until the copy is done.
        let new_ptr = self.allocate(new_size)?;
        ptr::copy_nonoverlapping(
            ptr.as_ptr(),
            new_ptr.as_ptr(),
            old_blocks * self.block_size(),
        );
        meta[head].set(0);
        trace!("reallocate({:?}, {}) = {:?}", ptr, new_size, new_ptr);

        Some(new_ptr)
    }

    /// Check whether `ptr` is the start of a block in this pool.
    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block_index(ptr).is_some()
    }

    /// Get the number of bytes usable through a live allocation, which is
    /// its size rounded up to whole blocks.
    ///
    /// Returns `None` if `ptr` doesn't denote a live allocation.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let block = self.block_index(ptr)?;
        match self.meta()[block].get() {
            0 => None,
            n => Some(n as usize * self.block_size()),
        }
    }

    /// Iterate over the runs partitioning the pool, in address order.
    ///
    /// Adjacent free blocks are reported as one run.
    pub fn runs(&self) -> Runs<'_> {
        Runs {
            meta: self.meta(),
            pos: 0,
        }
    }

    /// The raw metadata bytes, one per block.
    pub fn metadata(&self) -> impl ExactSizeIterator<Item = u8> + '_ {
        self.meta().iter().map(Cell::get)
    }

    /// The number of blocks not covered by any allocation.
    pub fn free_blocks(&self) -> usize {
        self.runs()
            .filter(|run| run.state == RunState::Free)
            .map(|run| run.len)
            .sum()
    }

    /// The number of blocks covered by allocations.
    pub fn allocated_blocks(&self) -> usize {
        self.block_count() - self.free_blocks()
    }

    /// The length in blocks of the longest free run. An allocation of up to
    /// `largest_free_run() * block_size()` bytes will succeed.
    pub fn largest_free_run(&self) -> usize {
        self.runs()
            .filter(|run| run.state == RunState::Free)
            .map(|run| run.len)
            .max()
            .unwrap_or(0)
    }
}

impl Allocator for PoolAllocator<'_> {
    #[inline]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        PoolAllocator::allocate(self, size)
    }

    /// Forwards to [`PoolAllocator::deallocate`], which ignores addresses
    /// that don't head a live allocation.
    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        PoolAllocator::deallocate(self, ptr)
    }
}

impl fmt::Debug for PoolAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("data", &self.data)
            .field("block_size", &self.block_size())
            .field("block_count", &self.block_count())
            .field("runs", &self.runs())
            .finish()
    }
}

/// Whether a [`Run`] belongs to an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Free,
    Allocated,
}

/// A maximal span of free blocks, or the blocks of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Run {
    /// The index of the first block.
    pub start: usize,
    /// The number of blocks.
    pub len: usize,
    pub state: RunState,
}

impl Run {
    /// The block indices covered by this run.
    #[inline]
    pub fn blocks(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

/// An iterator over the runs of a [`PoolAllocator`], created by
/// [`PoolAllocator::runs`].
#[derive(Clone)]
pub struct Runs<'a> {
    meta: &'a [Cell<u8>],
    pos: usize,
}

impl Iterator for Runs<'_> {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        let start = self.pos;
        let rest = self.meta.get(start..)?;
        let (len, state) = match rest.first()?.get() as usize {
            0 => {
                let len = rest
                    .iter()
                    .position(|m| m.get() != 0)
                    .unwrap_or(rest.len());
                (len, RunState::Free)
            }
            n => (n.min(rest.len()), RunState::Allocated),
        };
        self.pos += len;
        Some(Run { start, len, state })
    }
}

impl FusedIterator for Runs<'_> {}

impl fmt::Debug for Runs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}
