//! Indirect block pointer trees.
//!
//! See <https://www.nongnu.org/ext2-doc/ext2.html#i-block>
//!
//! The first 12 logical blocks of a file are addressed directly from the
//! inode. The next `n` (with `n = block_size / 4`) go through the singly
//! indirect block, the next `n^2` through the doubly indirect block and the
//! next `n^3` through the triply indirect block.

use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::inode::DIRECT_BLOCKS;
use crate::superblock::BlockAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndirectLevel {
    Single = 1,
    Double = 2,
    Triple = 3,
}

impl IndirectLevel {
    pub const ALL: [Self; 3] = [Self::Single, Self::Double, Self::Triple];

    pub fn depth(self) -> usize {
        self as usize
    }

    /// The level of the blocks this level points to, if they are pointer
    /// blocks themselves.
    pub fn child(self) -> Option<Self> {
        match self {
            Self::Single => None,
            Self::Double => Some(Self::Single),
            Self::Triple => Some(Self::Double),
        }
    }

    /// Logical offset of the first data block reachable through the
    /// inode's pointer slot for this level.
    pub fn base_offset(self, entries_per_block: u32) -> u64 {
        let n = u64::from(entries_per_block);
        let direct = DIRECT_BLOCKS as u64;
        match self {
            Self::Single => direct,
            Self::Double => direct + n,
            Self::Triple => direct + n + n * n,
        }
    }

    /// Number of logical blocks covered by one pointer at this level.
    pub fn stride(self, entries_per_block: u32) -> u64 {
        let n = u64::from(entries_per_block);
        match self {
            Self::Single => 1,
            Self::Double => n,
            Self::Triple => n * n,
        }
    }
}

impl TryFrom<u8> for IndirectLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            1 => Ok(Self::Single),
            2 => Ok(Self::Double),
            3 => Ok(Self::Triple),
            _ => Err(Error::InvalidIndirectionLevel(level)),
        }
    }
}

impl From<IndirectLevel> for u8 {
    fn from(level: IndirectLevel) -> Self {
        level as Self
    }
}

/// A block holding nothing but little-endian 32-bit block numbers.
#[derive(Debug, Clone, Copy)]
pub struct PointerBlock<'a>(pub &'a [u8]);

impl<'a> PointerBlock<'a> {
    /// Slot index and target of every non-null pointer, in slot order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, BlockAddress)> + 'a {
        self.0
            .chunks_exact(4)
            .zip(0u32..)
            .filter_map(|(chunk, index)| {
                let address = BlockAddress::read_from(chunk)?;
                (!address.is_null()).then_some((index, address))
            })
    }
}
