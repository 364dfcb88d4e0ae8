use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::superblock::BlockAddress;

/// See <https://www.nongnu.org/ext2-doc/ext2.html#block-group-descriptor-structure>
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: BlockAddress,
    pub inode_bitmap: BlockAddress,
    pub inode_table: BlockAddress,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    _pad: u16,
    _reserved: [u8; 12],
}

impl BlockGroupDescriptor {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// Index for a given block group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupIndex(pub u32);

/// How many blocks and inodes a group really holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GroupExtent {
    pub blocks: u32,
    pub inodes: u32,
}

/// Which kind of unit a bitmap tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitmapKind {
    Block,
    Inode,
}

/// See <https://www.nongnu.org/ext2-doc/ext2.html#block-bitmap> and
/// <https://www.nongnu.org/ext2-doc/ext2.html#inode-bitmap>
///
/// Each bit represent the current state of a unit within the block group,
/// where 1 means "used" and 0 "free/available". The first unit of the group
/// is represented by bit 0 of byte 0, the second by bit 1 of byte 0. The 8th
/// unit is represented by bit 7 (most significant bit) of byte 0 while the
/// 9th unit is represented by bit 0 (least significant bit) of byte 1.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap<'a>(pub &'a [u8]);

impl<'a> Bitmap<'a> {
    /// Number of units the bitmap has room for.
    pub fn capacity(&self) -> u32 {
        u32::try_from(self.0.len() * 8).unwrap_or(u32::MAX)
    }

    #[cfg(test)]
    fn is_used(&self, index: u32) -> Option<bool> {
        let byte = self.0.get((index / 8) as usize)?;
        let mask = 1 << (index % 8);
        Some(byte & mask != 0)
    }

    /// Zero-based indices of the free units among the first `count` units,
    /// in ascending order. Bits past `count` in the last byte are padding
    /// and are never reported.
    pub fn free_units(&self, count: u32) -> impl Iterator<Item = u32> + 'a {
        let count = count.min(self.capacity());
        let bytes = self.0;
        bytes
            .iter()
            .take(count.div_ceil(8) as usize)
            .enumerate()
            .flat_map(|(byte_index, &byte)| {
                (0..8u32)
                    .filter(move |&bit| byte & (1 << bit) == 0)
                    .map(move |bit| byte_index as u32 * 8 + bit)
            })
            .take_while(move |&index| index < count)
    }
}
