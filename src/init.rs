/// Types with a value that can be produced in a `const` context.
///
/// An allocator that implements this can be placed in a `static` and set up
/// later. For [`PoolAllocator`] the value is an empty pool: it owns no
/// region, every allocation fails, and releasing any address is a no-op.
///
/// ```
/// use runpool::{Allocator, Init, PoolAllocator};
///
/// const EMPTY: PoolAllocator<'static> = <PoolAllocator as Init>::INIT;
/// assert_eq!(EMPTY.block_count(), 0);
/// assert!(Allocator::allocate(&EMPTY, 1).is_none());
/// ```
///
/// [`PoolAllocator`]: crate::PoolAllocator
pub trait Init {
    /// The value a fresh allocator starts from.
    const INIT: Self;
}

#[cfg(any(test, feature = "std"))]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl Init for std::alloc::System {
    const INIT: Self = Self;
}
