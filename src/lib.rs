//! This crate implements a fixed-arena block allocator for targets without a
//! general-purpose heap.
//!
//!  - **The memory pool is provided by an application.** The allocator is a
//!    view over a caller-owned buffer (a `static` array, a stack array, a
//!    region carved out of another allocator) and never obtains memory for
//!    itself.
//!
//!  - **One byte of metadata per block.** The buffer is split into equal-size
//!    blocks followed by a metadata segment. An allocation is a run of
//!    contiguous blocks whose length is stored once, in the metadata byte of
//!    its first block.
//!
//!  - **Deterministic first fit.** The lowest-addressed free run that is long
//!    enough always wins. The scan skips whole allocated runs at once, so it
//!    is linear in the number of runs rather than the number of blocks.
//!
//!  - **Failure is a value.** Exhaustion yields `None`, and releasing a bogus
//!    pointer is a no-op. Neither path panics.
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! # Examples
//!
//! ## `PoolAllocator`: Core API
//!
//! ```rust
//! use runpool::{Allocator, PoolAllocator};
//! use std::mem::MaybeUninit;
//!
//! // 20 bytes with 4-byte blocks: 4 blocks of data plus 4 bytes of metadata
//! let mut pool = [MaybeUninit::uninit(); 20];
//! let alloc = PoolAllocator::new(&mut pool, 4);
//! assert_eq!(alloc.block_count(), 4);
//!
//! let a = alloc.allocate(4).unwrap(); // block 0
//! let b = alloc.allocate(9).unwrap(); // blocks 1..=3
//! assert!(alloc.allocate(1).is_none());
//!
//! unsafe { alloc.deallocate(a) };
//! assert_eq!(alloc.allocate(4), Some(a));
//! # let _ = b;
//! ```
//!
//! ## `PoolBox`: Owning Values
//!
//! ```rust
//! use runpool::{PoolAllocator, PoolBox};
//! use std::mem::MaybeUninit;
//!
//! #[repr(align(8))]
//! struct Aligned([MaybeUninit<u8>; 256]);
//!
//! let mut pool = Aligned([MaybeUninit::uninit(); 256]);
//! let alloc = PoolAllocator::new(&mut pool.0, 8);
//!
//! let mut value = PoolBox::new_in(41u64, &alloc).ok().unwrap();
//! *value += 1;
//! assert_eq!(*value, 42);
//! drop(value);
//! assert_eq!(alloc.allocated_blocks(), 0);
//! ```
//!
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

cfg_if::cfg_if! {
    if #[cfg(feature = "log")] {
        macro_rules! trace {
            ($($tt:tt)*) => { log::trace!($($tt)*) };
        }
        macro_rules! warn {
            ($($tt:tt)*) => { log::warn!($($tt)*) };
        }
    } else {
        // Keep the arguments type-checked so that both configurations accept
        // the same call sites.
        macro_rules! trace {
            ($($tt:tt)*) => {
                if false {
                    let _ = format_args!($($tt)*);
                }
            };
        }
        macro_rules! warn {
            ($($tt:tt)*) => {
                if false {
                    let _ = format_args!($($tt)*);
                }
            };
        }
    }
}

mod allocator;
mod boxed;
mod init;
mod pool;
pub use self::{
    allocator::*,
    boxed::PoolBox,
    init::*,
    pool::{
        LayoutError, PoolAllocator, PoolLayout, Run, RunState, Runs, BLOCK_SIZE_MULTIPLE,
        MAX_RUN_BLOCKS,
    },
};

#[cfg(any(test, feature = "std"))]
extern crate std;
