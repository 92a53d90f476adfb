//! Region geometry. Splits a byte count into a data segment and a metadata
//! segment.
use thiserror::Error;

/// Every block size must be a multiple of this value. Keeps block starts
/// word-aligned on 32-bit targets whenever the region itself is.
pub const BLOCK_SIZE_MULTIPLE: usize = 4;

/// A pool configuration that cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("block size must not be zero")]
    ZeroBlockSize,
    #[error("block size {block_size} is not a multiple of {}", BLOCK_SIZE_MULTIPLE)]
    BlockSizeNotMultiple { block_size: usize },
    #[error("pool size does not fit in `usize`")]
    TooLarge,
}

/// The geometry of a pool: how many blocks of which size, and where the
/// metadata segment starts.
///
/// Each block costs `block_size + 1` bytes of the region, one of which is its
/// metadata byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    block_size: usize,
    block_count: usize,
}

impl PoolLayout {
    /// A layout without blocks.
    pub(crate) const EMPTY: Self = Self {
        block_size: BLOCK_SIZE_MULTIPLE,
        block_count: 0,
    };

    /// Compute the layout of a `pool_size`-byte region divided into
    /// `block_size`-byte blocks.
    ///
    /// Bytes left over by the division are never used.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::PoolLayout;
    /// let layout = PoolLayout::new(20, 4).unwrap();
    /// assert_eq!(layout.block_count(), 4);
    /// assert_eq!(layout.data_size(), 16);
    /// assert_eq!(layout.meta_size(), 4);
    /// ```
    pub const fn new(pool_size: usize, block_size: usize) -> Result<Self, LayoutError> {
        if let Err(e) = Self::check_block_size(block_size) {
            return Err(e);
        }
        Ok(Self {
            block_size,
            // `block_size + 1` can't overflow: `block_size` is a multiple of 4
            block_count: pool_size / (block_size + 1),
        })
    }

    /// The layout of the smallest region holding `block_count` blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::PoolLayout;
    /// let layout = PoolLayout::for_blocks(16, 10).unwrap();
    /// assert_eq!(layout.pool_size(), 170);
    /// assert_eq!(PoolLayout::new(layout.pool_size(), 16), Ok(layout));
    /// ```
    pub const fn for_blocks(block_size: usize, block_count: usize) -> Result<Self, LayoutError> {
        if let Err(e) = Self::check_block_size(block_size) {
            return Err(e);
        }
        if block_count.checked_mul(block_size + 1).is_none() {
            return Err(LayoutError::TooLarge);
        }
        Ok(Self {
            block_size,
            block_count,
        })
    }

    const fn check_block_size(block_size: usize) -> Result<(), LayoutError> {
        if block_size == 0 {
            Err(LayoutError::ZeroBlockSize)
        } else if block_size % BLOCK_SIZE_MULTIPLE != 0 {
            Err(LayoutError::BlockSizeNotMultiple { block_size })
        } else {
            Ok(())
        }
    }

    /// The size of each block in bytes.
    #[inline]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// The number of blocks.
    #[inline]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// The size of the data segment, which starts at the beginning of the
    /// region.
    #[inline]
    pub const fn data_size(&self) -> usize {
        self.block_size * self.block_count
    }

    /// The size of the metadata segment, which immediately follows the data
    /// segment.
    #[inline]
    pub const fn meta_size(&self) -> usize {
        self.block_count
    }

    /// The number of bytes of the region actually used.
    #[inline]
    pub const fn pool_size(&self) -> usize {
        self.data_size() + self.meta_size()
    }
}
