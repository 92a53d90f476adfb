//! The allocation capability shared by every allocator in this crate
use core::{
    alloc::{GlobalAlloc, Layout},
    mem,
    ptr::NonNull,
};

use crate::Init;

/// A source of memory that data structures can be parameterized over.
///
/// The contract is deliberately small: [`Self::allocate`] hands out at least
/// `size` contiguous bytes, [`Self::deallocate`] takes them back. Neither
/// method panics on exhaustion; callers are expected to handle `None` as an
/// ordinary outcome.
///
/// Only "enough contiguous bytes" is promised. A caller that stores a value
/// with an alignment requirement must check the returned address itself (as
/// [`PoolBox`] does).
///
/// [`PoolBox`]: crate::PoolBox
pub trait Allocator {
    /// Attempt to allocate at least `size` bytes.
    ///
    /// Returns the starting address of the memory block on success; `None`
    /// otherwise.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a memory block previously returned by [`Self::allocate`].
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a live memory block previously allocated via
    ///    `self`.
    ///  - The memory block must not be accessed after this call.
    ///
    /// Implementations may relax these requirements and document which
    /// pointers they tolerate.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        (**self).deallocate(ptr)
    }
}

/// Wraps a [`GlobalAlloc`] to provide an [`Allocator`].
///
/// `GlobalAlloc::dealloc` needs the original [`Layout`] but
/// [`Allocator::deallocate`] only receives a pointer, so every allocation is
/// prefixed by a hidden header of [`Self::ALIGN`] bytes recording its size.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalAllocAsAllocator<T> {
    inner: T,
}

impl<T> GlobalAllocAsAllocator<T> {
    /// The alignment of every memory block returned by this allocator. It's
    /// also the size of the hidden header.
    pub const ALIGN: usize = mem::size_of::<usize>() * 2;

    /// Wrap `inner`.
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Get a reference to the wrapped allocator.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    #[inline]
    fn layout_for(size: usize) -> Option<Layout> {
        let size = size.checked_add(Self::ALIGN)?;
        Layout::from_size_align(size, Self::ALIGN).ok()
    }
}

impl<T: Init> Init for GlobalAllocAsAllocator<T> {
    const INIT: Self = Self { inner: T::INIT };
}

impl<T: GlobalAlloc> Allocator for GlobalAllocAsAllocator<T> {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(size)?;
        // Safety: `layout` is never zero-sized because of the header
        let base = NonNull::new(unsafe { self.inner.alloc(layout) })?;
        unsafe {
            // Safety: The header is `ALIGN` bytes long and `base` is aligned
            //         to `ALIGN`, so it can hold a `usize`
            base.cast::<usize>().as_ptr().write(size);
            Some(NonNull::new_unchecked(base.as_ptr().add(Self::ALIGN)))
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        // Safety: `ptr` came from `allocate`, which placed the header just
        //         before it
        let base = ptr.as_ptr().sub(Self::ALIGN);
        let size = base.cast::<usize>().read();
        let layout = if let Some(layout) = Self::layout_for(size) {
            layout
        } else {
            // The header was overwritten. Leak the block rather than hand
            // `dealloc` a layout it never allocated with.
            debug_assert!(false, "corrupted allocation header: size = {}", size);
            return;
        };
        self.inner.dealloc(base, layout);
    }
}

/// [`GlobalAllocAsAllocator`] over the operating system's allocator.
#[cfg(any(test, feature = "std"))]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
pub type SystemAllocator = GlobalAllocAsAllocator<std::alloc::System>;
