//! An owning pointer to a value placed in memory from an [`Allocator`]
use core::{
    fmt,
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use crate::Allocator;

/// A pointer type that owns a `T` stored in memory obtained from an
/// [`Allocator`], releasing the memory when dropped.
///
/// `T` can be a slice, in which case every element is dropped before the
/// memory is released (see [`PoolBox::from_fn_in`]).
///
/// # Examples
///
/// ```
/// use runpool::{PoolAllocator, PoolBox};
/// use std::mem::MaybeUninit;
///
/// #[repr(align(8))]
/// struct Aligned([MaybeUninit<u8>; 100]);
///
/// let mut pool = Aligned([MaybeUninit::uninit(); 100]);
/// let alloc = PoolAllocator::new(&mut pool.0, 8);
///
/// let boxed = PoolBox::new_in([1u32; 4], &alloc).ok().unwrap();
/// assert_eq!(boxed.iter().sum::<u32>(), 4);
/// assert_eq!(alloc.allocated_blocks(), 2);
///
/// assert_eq!(PoolBox::into_inner(boxed), [1; 4]);
/// assert_eq!(alloc.allocated_blocks(), 0);
/// ```
///
/// The memory of a live `PoolBox` can't be released behind its back without
/// `unsafe`:
///
/// ```rust,compile_fail,E0133
/// use runpool::{PoolAllocator, PoolBox};
/// use std::{mem::MaybeUninit, ptr::NonNull};
///
/// let mut pool = [MaybeUninit::uninit(); 100];
/// let alloc = PoolAllocator::new(&mut pool, 4);
/// let boxed = PoolBox::new_in(1u32, &alloc).ok().unwrap();
/// alloc.deallocate(NonNull::from(&*boxed).cast());
/// ```
pub struct PoolBox<'a, T: ?Sized, A: Allocator + ?Sized> {
    ptr: NonNull<T>,
    alloc: &'a A,
    _phantom: PhantomData<T>,
}

/// Allocate `size` bytes for values aligned to `align`. Misaligned memory is
/// given back to `alloc`.
fn allocate_aligned<A: Allocator + ?Sized>(
    alloc: &A,
    size: usize,
    align: usize,
) -> Option<NonNull<u8>> {
    let ptr = alloc.allocate(size)?;

    if ptr.as_ptr() as usize % align != 0 {
        // Safety: `ptr` was just returned by `alloc`
        unsafe { alloc.deallocate(ptr) };
        return None;
    }

    Some(ptr)
}

impl<'a, T, A: Allocator + ?Sized> PoolBox<'a, T, A> {
    /// Move `value` into memory allocated from `alloc`.
    ///
    /// `value` is given back if the allocation fails or if the allocator
    /// returns an address not aligned for `T`.
    pub fn new_in(value: T, alloc: &'a A) -> Result<Self, T> {
        let ptr = match allocate_aligned(alloc, mem::size_of::<T>(), mem::align_of::<T>()) {
            Some(ptr) => ptr.cast::<T>(),
            None => return Err(value),
        };

        // Safety: `ptr` is valid for writes of `size_of::<T>()` bytes and
        //         properly aligned
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self {
            ptr,
            alloc,
            _phantom: PhantomData,
        })
    }

    /// Move the value out, releasing its memory.
    pub fn into_inner(this: Self) -> T {
        let this = mem::ManuallyDrop::new(this);
        // Safety: `ptr` holds an initialized `T`, which is moved out exactly
        //         once because `this` won't be dropped
        unsafe {
            let value = ptr::read(this.ptr.as_ptr());
            this.alloc.deallocate(this.ptr.cast());
            value
        }
    }
}

impl<'a, T, A: Allocator + ?Sized> PoolBox<'a, [T], A> {
    /// Allocate a slice of `len` elements from `alloc`, initializing the
    /// element at index `i` with `f(i)`.
    ///
    /// Returns `None` without calling `f` if `len * size_of::<T>()`
    /// overflows, if the allocation fails, or if the allocator returns an
    /// address not aligned for `T`.
    ///
    /// If `f` panics, the elements constructed so far are dropped and the
    /// memory is released.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::{PoolAllocator, PoolBox};
    /// use std::mem::MaybeUninit;
    ///
    /// #[repr(align(4))]
    /// struct Aligned([MaybeUninit<u8>; 100]);
    ///
    /// let mut pool = Aligned([MaybeUninit::uninit(); 100]);
    /// let alloc = PoolAllocator::new(&mut pool.0, 8);
    ///
    /// let squares = PoolBox::from_fn_in(5, &alloc, |i| (i * i) as u32).unwrap();
    /// assert_eq!(*squares, [0, 1, 4, 9, 16]);
    /// assert_eq!(alloc.allocated_blocks(), 3);
    /// ```
    pub fn from_fn_in(len: usize, alloc: &'a A, mut f: impl FnMut(usize) -> T) -> Option<Self> {
        let size = mem::size_of::<T>().checked_mul(len)?;
        let start = allocate_aligned(alloc, size, mem::align_of::<T>())?.cast::<T>();

        // Releases the partially-built slice if `f` panics
        struct Guard<'g, T, A: Allocator + ?Sized> {
            start: NonNull<T>,
            init: usize,
            alloc: &'g A,
        }

        impl<T, A: Allocator + ?Sized> Drop for Guard<'_, T, A> {
            fn drop(&mut self) {
                unsafe {
                    ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                        self.start.as_ptr(),
                        self.init,
                    ));
                    self.alloc.deallocate(self.start.cast());
                }
            }
        }

        let mut guard = Guard {
            start,
            init: 0,
            alloc,
        };

        while guard.init < len {
            // Safety: `start` has room for `len` elements
            unsafe { start.as_ptr().add(guard.init).write(f(guard.init)) };
            guard.init += 1;
        }

        mem::forget(guard);

        Some(Self {
            ptr: NonNull::slice_from_raw_parts(start, len),
            alloc,
            _phantom: PhantomData,
        })
    }

    /// Allocate a slice of `len` default-initialized elements from `alloc`.
    ///
    /// See [`Self::from_fn_in`] for when this returns `None`.
    pub fn new_slice_in(len: usize, alloc: &'a A) -> Option<Self>
    where
        T: Default,
    {
        Self::from_fn_in(len, alloc, |_| T::default())
    }
}

impl<'a, T: ?Sized, A: Allocator + ?Sized> PoolBox<'a, T, A> {
    /// Get the allocator `this` is stored in.
    ///
    /// This is an associated function so that it doesn't shadow a method of
    /// `T`.
    pub fn allocator(this: &Self) -> &'a A {
        this.alloc
    }
}

impl<T: ?Sized, A: Allocator + ?Sized> Drop for PoolBox<'_, T, A> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.alloc.deallocate(self.ptr.cast());
        }
    }
}

impl<T: ?Sized, A: Allocator + ?Sized> Deref for PoolBox<'_, T, A> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: `ptr` holds an initialized `T` owned by `self`
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized, A: Allocator + ?Sized> DerefMut for PoolBox<'_, T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: `ptr` holds an initialized `T` owned by `self`
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug + ?Sized, A: Allocator + ?Sized> fmt::Debug for PoolBox<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
