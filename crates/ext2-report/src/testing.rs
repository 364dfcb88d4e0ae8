//! Synthetic images for tests, assembled in memory.

use std::io::Cursor;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block_group::BlockGroupDescriptor;
use crate::inode::Inode;
use crate::superblock::{BlockAddress, Superblock};

/// `drwxr-xr-x`
pub const DIR_MODE: u16 = 0x41ED;

/// `-rw-r--r--`
pub const FILE_MODE: u16 = 0x81A4;

const BLOCK_SIZE: usize = 1024;

pub struct ImageBuilder {
    bytes: Vec<u8>,
}

impl ImageBuilder {
    fn new(blocks: u32, inodes: u32, blocks_per_group: u32, inodes_per_group: u32) -> Self {
        let mut image = Self {
            bytes: vec![0; blocks as usize * BLOCK_SIZE],
        };
        image.superblock(|sb| {
            sb.inodes_count = inodes;
            sb.blocks_count = blocks;
            sb.first_data_block = BlockAddress(1);
            sb.log_block_size = 0;
            sb.blocks_per_group = blocks_per_group;
            sb.inodes_per_group = inodes_per_group;
            sb.magic = Superblock::MAGIC;
            sb.rev_level = 1;
            sb.first_ino = 11;
            sb.inode_size = 128;
        });
        image
    }

    /// One group of 64 blocks and 8 inodes. The descriptor table is in block
    /// 2, the bitmaps in blocks 3 and 4 and the inode table in block 5. Every
    /// block and inode starts out used and every inode record is zero.
    pub fn minimal() -> Self {
        let mut image = Self::new(64, 8, 8192, 8);
        image.descriptor(0, 3, 4, 5, 2, 0);
        image.block_mut(3)[..8].fill(0xFF);
        image.block_mut(4)[0] = 0xFF;
        image
    }

    /// 20 blocks in groups of 8, so the last group only has 4. Each group has
    /// 4 inodes. Group `g` keeps its bitmaps and inode table in blocks
    /// `3 + 3g` through `5 + 3g`.
    ///
    /// Free blocks: the last one of group 1 and the second and fourth of
    /// group 2.
    pub fn three_groups() -> Self {
        let mut image = Self::new(20, 12, 8, 4);
        for group in 0..3 {
            let first = 3 + 3 * group;
            image.descriptor(group as usize, first, first + 1, first + 2, 0, 0);
            image.block_mut(first + 1)[0] = 0xFF;
        }
        image.block_mut(3)[0] = 0xFF;
        image.block_mut(6)[0] = 0b0111_1111;
        image.block_mut(9)[0] = 0b0000_0101;
        image
    }

    pub fn superblock(&mut self, f: impl FnOnce(&mut Superblock)) {
        let range = 1024..1024 + core::mem::size_of::<Superblock>();
        let mut sb = Superblock::read_from(&self.bytes[range.clone()]).unwrap();
        f(&mut sb);
        self.bytes[range].copy_from_slice(sb.as_bytes());
    }

    pub fn descriptor(
        &mut self,
        group: usize,
        block_bitmap: u32,
        inode_bitmap: u32,
        inode_table: u32,
        free_blocks: u16,
        free_inodes: u16,
    ) {
        let mut descriptor = BlockGroupDescriptor::new_zeroed();
        descriptor.block_bitmap = BlockAddress(block_bitmap);
        descriptor.inode_bitmap = BlockAddress(inode_bitmap);
        descriptor.inode_table = BlockAddress(inode_table);
        descriptor.free_blocks_count = free_blocks;
        descriptor.free_inodes_count = free_inodes;

        let start = 2 * BLOCK_SIZE + group * BlockGroupDescriptor::SIZE;
        self.bytes[start..start + BlockGroupDescriptor::SIZE].copy_from_slice(descriptor.as_bytes());
    }

    pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
        let start = block as usize * BLOCK_SIZE;
        &mut self.bytes[start..start + BLOCK_SIZE]
    }

    /// Writes a little-endian block pointer into slot `slot` of `block`.
    pub fn put_u32(&mut self, block: u32, slot: usize, value: u32) {
        self.block_mut(block)[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes record `local_index` of the inode table starting at
    /// `table_block`.
    pub fn inode(
        &mut self,
        table_block: u32,
        local_index: usize,
        mode: u16,
        links_count: u16,
        f: impl FnOnce(&mut Inode),
    ) {
        let mut inode = Inode::new_zeroed();
        inode.mode = mode;
        inode.links_count = links_count;
        f(&mut inode);

        let start = table_block as usize * BLOCK_SIZE + local_index * Inode::SIZE;
        self.bytes[start..start + Inode::SIZE].copy_from_slice(inode.as_bytes());
    }

    pub fn dir_entry(&mut self, block: u32, offset: usize, inode: u32, rec_len: u16, name: &str) {
        let entry = &mut self.block_mut(block)[offset..];
        entry[0..4].copy_from_slice(&inode.to_le_bytes());
        entry[4..6].copy_from_slice(&rec_len.to_le_bytes());
        entry[6] = name.len() as u8;
        entry[7] = 0;
        entry[8..8 + name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn into_cursor(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.bytes)
    }
}
