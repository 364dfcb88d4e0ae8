use core::ops::Add;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block_group::{BlockGroupDescriptor, GroupExtent, GroupIndex};
use crate::error::{Error, Result};

/// See <https://www.nongnu.org/ext2-doc/ext2.html#superblock>
///
/// Only the leading part of the record is decoded. Everything after the
/// volume name is irrelevant for a structural walk.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: BlockAddress,
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mount_time: u32,
    pub write_time: u32,
    pub mount_count: u16,
    pub max_mount_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,

    // EXT2_DYNAMIC_REV Specific
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: FeatureCompatFlags,
    pub feature_incompat: FeatureIncompatFlags,
    pub feature_ro_compat: FeatureReadOnlyCompatFlags,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
}

impl Superblock {
    /// The superblock is always located at byte offset 1024 from the beginning of
    /// the file, block device or partition formatted with Ext2 and later variants
    /// (Ext3, Ext4).
    pub const OFFSET_BYTES: OffsetBytes = OffsetBytes(1024);

    /// The superblock region is 1024 bytes long regardless of block size.
    pub const REGION_END: OffsetBytes = OffsetBytes(2048);

    /// 16bit value identifying the file system as Ext2. The value is currently
    /// fixed to EXT2_SUPER_MAGIC of value 0xEF53.
    /// <https://www.nongnu.org/ext2-doc/ext2.html#s-magic>
    pub const MAGIC: u16 = 0xEF53;

    /// Largest supported value of `s_log_block_size` (1024 << 6 = 64KiB).
    pub const MAX_LOG_BLOCK_SIZE: u32 = 6;

    /// Revision 0 file systems have fixed 128 byte inodes and leave
    /// `s_inode_size` at zero.
    pub const GOOD_OLD_INODE_SIZE: u16 = 128;

    pub fn magic_valid(&self) -> bool {
        self.magic == Self::MAGIC
    }

    /// The block size is computed using this 32bit value as the number of bits
    /// to shift left the value 1024. This value may only be non-negative.
    ///
    /// ```text
    /// block size = 1024 << s_log_block_size;
    /// ```
    pub fn block_size(&self) -> Result<BlockSize> {
        let log_block_size = self.log_block_size;
        if log_block_size > Self::MAX_LOG_BLOCK_SIZE {
            return Err(Error::UnsupportedBlockSize { log_block_size });
        }
        Ok(BlockSize(BlockSize::MIN.0 << log_block_size))
    }

    /// Stride between consecutive records in an inode table.
    pub fn inode_record_size(&self, block_size: BlockSize) -> Result<u32> {
        let size = match self.inode_size {
            0 => Self::GOOD_OLD_INODE_SIZE,
            size => size,
        };
        if size < Self::GOOD_OLD_INODE_SIZE
            || !size.is_power_of_two()
            || u32::from(size) > block_size.0
        {
            return Err(Error::UnsupportedInodeSize(size));
        }
        Ok(u32::from(size))
    }

    /// Incompatible features this analyzer does not interpret. Their
    /// presence means the transcript may not describe the whole layout.
    pub fn uninterpreted_features(&self) -> FeatureIncompatFlags {
        let incompat = self.feature_incompat;
        incompat.intersection(
            FeatureIncompatFlags::COMPRESSION
                | FeatureIncompatFlags::JOURNAL_DEV
                | FeatureIncompatFlags::META_BG
                | FeatureIncompatFlags::EXTENTS
                | FeatureIncompatFlags::SIXTY_FOUR_BIT
                | FeatureIncompatFlags::FLEX_BG,
        )
    }

    pub fn has_journal(&self) -> bool {
        let compat = self.feature_compat;
        compat.contains(FeatureCompatFlags::HAS_JOURNAL)
    }

    /// Derives the read-only context used for the rest of the walk.
    pub fn geometry(&self) -> Result<Geometry> {
        let block_size = self.block_size()?;
        let inode_record_size = self.inode_record_size(block_size)?;
        Geometry::new(
            block_size,
            inode_record_size,
            self.blocks_count,
            self.inodes_count,
            self.blocks_per_group,
            self.inodes_per_group,
        )
    }
}

/// Size of a file system block in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockSize(pub u32);

impl BlockSize {
    pub const MIN: Self = Self(1024);
    pub const MAX: Self = Self(1024 << Superblock::MAX_LOG_BLOCK_SIZE);
}

/// Address of a block in the filesystem.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockAddress(pub u32);

impl BlockAddress {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Address in bytes from the start of the disk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetBytes(pub u64);

impl Add<Self> for OffsetBytes {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

/// "Global" inode number within the filesystem. Numbering starts at 1.
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct InodeNumber(pub u32);

/// Values derived once from the superblock and shared, read-only, by every
/// decoding step of a walk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    block_size: BlockSize,
    inode_record_size: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    group_count: u32,
    last_group: GroupExtent,
}

impl Geometry {
    pub fn new(
        block_size: BlockSize,
        inode_record_size: u32,
        blocks_count: u32,
        inodes_count: u32,
        blocks_per_group: u32,
        inodes_per_group: u32,
    ) -> Result<Self> {
        if block_size.0 < BlockSize::MIN.0
            || block_size.0 > BlockSize::MAX.0
            || !block_size.0.is_power_of_two()
        {
            return Err(Error::UnsupportedBlockSize {
                log_block_size: block_size.0.checked_ilog2().unwrap_or(0).saturating_sub(10),
            });
        }
        if blocks_per_group == 0 {
            return Err(Error::InvalidGeometry("blocks per group is zero"));
        }
        if inodes_per_group == 0 {
            return Err(Error::InvalidGeometry("inodes per group is zero"));
        }

        // Each group is described by one block bitmap and one inode bitmap,
        // which bounds every per-group read by the block size.
        let bitmap_capacity = u64::from(block_size.0) * 8;
        if u64::from(blocks_per_group) > bitmap_capacity {
            return Err(Error::InvalidGeometry(
                "blocks per group exceeds what one bitmap block can describe",
            ));
        }
        if u64::from(inodes_per_group) > bitmap_capacity {
            return Err(Error::InvalidGeometry(
                "inodes per group exceeds what one bitmap block can describe",
            ));
        }

        let group_count = blocks_count.div_ceil(blocks_per_group);
        let full_groups = group_count.saturating_sub(1);

        // The last group holds whatever the full groups leave over.
        let last_blocks =
            u64::from(blocks_count) - u64::from(blocks_per_group) * u64::from(full_groups);
        let last_inodes = u64::from(inodes_count)
            .checked_sub(u64::from(inodes_per_group) * u64::from(full_groups))
            .ok_or(Error::InvalidGeometry(
                "inode count is too small for the number of groups",
            ))?;
        if last_inodes > u64::from(inodes_per_group) {
            return Err(Error::InvalidGeometry(
                "inode count is too large for the number of groups",
            ));
        }

        Ok(Self {
            block_size,
            inode_record_size,
            blocks_per_group,
            inodes_per_group,
            group_count,
            last_group: GroupExtent {
                blocks: last_blocks as u32,
                inodes: last_inodes as u32,
            },
        })
    }

    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Number of 32-bit block pointers that fit in one block.
    pub fn entries_per_block(&self) -> u32 {
        self.block_size.0 / 4
    }

    pub fn inode_record_size(&self) -> u32 {
        self.inode_record_size
    }

    pub fn blocks_per_group(&self) -> u32 {
        self.blocks_per_group
    }

    pub fn inodes_per_group(&self) -> u32 {
        self.inodes_per_group
    }

    /// `ceil(blocks_count / blocks_per_group)`.
    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    pub fn groups(&self) -> impl Iterator<Item = GroupIndex> {
        (0..self.group_count).map(GroupIndex)
    }

    /// Units actually present in a group. Every group is full except the
    /// last one, which may be short.
    pub fn group_extent(&self, group: GroupIndex) -> GroupExtent {
        if group.0 + 1 == self.group_count {
            self.last_group
        } else {
            GroupExtent {
                blocks: self.blocks_per_group,
                inodes: self.inodes_per_group,
            }
        }
    }

    pub fn block_address_bytes(&self, block: BlockAddress) -> OffsetBytes {
        OffsetBytes(u64::from(block.0) * u64::from(self.block_size.0))
    }

    /// The descriptor table starts at the first block boundary after the
    /// superblock region: block 2 for 1KiB blocks, block 1 otherwise.
    pub fn descriptor_table_offset(&self) -> OffsetBytes {
        OffsetBytes(
            Superblock::REGION_END
                .0
                .next_multiple_of(u64::from(self.block_size.0)),
        )
    }

    /// Descriptors sit back to back in the table, one per group.
    pub fn descriptor_offset(&self, group: GroupIndex) -> OffsetBytes {
        self.descriptor_table_offset()
            + OffsetBytes(u64::from(group.0) * BlockGroupDescriptor::SIZE as u64)
    }

    /// Convert from a group-local inode index to the global inode number.
    pub fn inode_number(&self, group: GroupIndex, local_index: u32) -> InodeNumber {
        InodeNumber(group.0 * self.inodes_per_group + local_index + 1)
    }
}

/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-compat>
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct FeatureCompatFlags(u32);

bitflags! {
    impl FeatureCompatFlags: u32 {
        /// Block pre-allocation for new directories
        const DIR_PREALLOC = 0x0001;

        const IMAGIC_INODES = 0x0002;

        /// An Ext3 journal exists
        const HAS_JOURNAL = 0x0004;

        /// Extended inode attributes are present
        const EXT_ATTR = 0x0008;

        const RESIZE_INODE = 0x0010;

        /// Directory indexing (HTree)
        const DIR_INDEX = 0x0020;
    }
}

/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-incompat>
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct FeatureIncompatFlags(u32);

bitflags! {
    impl FeatureIncompatFlags: u32 {
        /// Disk/File compression is used
        const COMPRESSION = 0x0001;
        const FILETYPE = 0x0002;
        const RECOVER = 0x0004;
        const JOURNAL_DEV = 0x0008;
        const META_BG = 0x0010;
        const EXTENTS = 0x0040;
        const SIXTY_FOUR_BIT = 0x0080;
        const FLEX_BG = 0x0200;
    }
}

/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-ro-compat>
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct FeatureReadOnlyCompatFlags(u32);

bitflags! {
    impl FeatureReadOnlyCompatFlags: u32 {
        /// Sparse Superblock
        const SPARSE_SUPER = 0x0001;

        /// Filesystem uses a 64bit file size
        const LARGE_FILE = 0x0002;

        /// Binary tree sorted directory files
        const BTREE_DIR = 0x0004;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn superblock() -> Superblock {
        let mut sb = Superblock::new_zeroed();
        sb.blocks_count = 64;
        sb.inodes_count = 16;
        sb.blocks_per_group = 8192;
        sb.inodes_per_group = 16;
        sb.inode_size = 128;
        sb.magic = Superblock::MAGIC;
        sb
    }

    #[test]
    fn record_layout() {
        assert_eq!(core::mem::size_of::<Superblock>(), 136);

        let mut bytes = [0u8; 136];
        bytes[56] = 0x53;
        bytes[57] = 0xEF;
        bytes[88] = 0x00;
        bytes[89] = 0x01;
        let sb = Superblock::read_from_prefix(&bytes).unwrap();
        assert!(sb.magic_valid());
        assert_eq!({ sb.inode_size }, 256);
    }

    #[test]
    fn block_size_is_shifted_minimum() {
        let mut sb = superblock();
        for (log, expected) in [(0, 1024), (1, 2048), (2, 4096), (6, 65536)] {
            sb.log_block_size = log;
            assert_eq!(sb.block_size().unwrap(), BlockSize(expected));
        }
    }

    #[test]
    fn oversized_block_size_is_rejected() {
        let mut sb = superblock();
        sb.log_block_size = 7;
        assert!(matches!(
            sb.block_size(),
            Err(Error::UnsupportedBlockSize { log_block_size: 7 })
        ));
        sb.log_block_size = 40;
        assert!(sb.geometry().is_err());
    }

    #[test]
    fn revision_zero_inode_size() {
        let mut sb = superblock();
        sb.inode_size = 0;
        assert_eq!(sb.inode_record_size(BlockSize::MIN).unwrap(), 128);
        sb.inode_size = 100;
        assert!(matches!(
            sb.inode_record_size(BlockSize::MIN),
            Err(Error::UnsupportedInodeSize(100))
        ));
        sb.inode_size = 2048;
        assert!(sb.inode_record_size(BlockSize::MIN).is_err());
    }

    #[test]
    fn group_count_rounds_up() {
        let geometry = Geometry::new(BlockSize(1024), 128, 20_000, 5_000, 8192, 2_000).unwrap();
        assert_eq!(geometry.group_count(), 3);
        assert_eq!(
            geometry.group_extent(GroupIndex(0)),
            GroupExtent { blocks: 8192, inodes: 2000 }
        );
        assert_eq!(
            geometry.group_extent(GroupIndex(2)),
            GroupExtent { blocks: 20_000 - 2 * 8192, inodes: 1000 }
        );
    }

    #[test]
    fn exact_multiple_has_full_last_group() {
        let geometry = Geometry::new(BlockSize(1024), 128, 16_384, 4_000, 8192, 2_000).unwrap();
        assert_eq!(geometry.group_count(), 2);
        assert_eq!(
            geometry.group_extent(GroupIndex(1)),
            GroupExtent { blocks: 8192, inodes: 2000 }
        );
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert!(matches!(
            Geometry::new(BlockSize(1024), 128, 100, 10, 0, 10),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            Geometry::new(BlockSize(1024), 128, 100, 10, 10, 0),
            Err(Error::InvalidGeometry(_))
        ));
        // Ten groups of blocks but only enough inodes for five groups.
        assert!(matches!(
            Geometry::new(BlockSize(1024), 128, 100, 50, 10, 10),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn per_group_counts_are_bounded_by_one_bitmap_block() {
        assert!(Geometry::new(BlockSize(1024), 128, 8192, 8192, 8192, 8192).is_ok());
        assert!(matches!(
            Geometry::new(BlockSize(1024), 128, 8193, 8, 8193, 8),
            Err(Error::InvalidGeometry(_))
        ));
        // One group claiming billions of inodes.
        assert!(matches!(
            Geometry::new(BlockSize(1024), 128, 64, 0xF000_0000, 8192, 0xF000_0000),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(Geometry::new(BlockSize(4096), 256, 32_768, 32_768, 32_768, 32_768).is_ok());
    }

    #[test]
    fn descriptors_are_contiguous() {
        let geometry = Geometry::new(BlockSize(4096), 128, 100_000, 40, 32_768, 10).unwrap();
        assert_eq!(geometry.descriptor_offset(GroupIndex(0)), OffsetBytes(4096));
        assert_eq!(geometry.descriptor_offset(GroupIndex(3)), OffsetBytes(4096 + 3 * 32));
    }

    #[test]
    fn descriptor_table_follows_superblock_region() {
        let at = |block_size| {
            Geometry::new(BlockSize(block_size), 128, 64, 16, 8192, 16)
                .unwrap()
                .descriptor_table_offset()
        };
        assert_eq!(at(1024), OffsetBytes(2048));
        assert_eq!(at(2048), OffsetBytes(2048));
        assert_eq!(at(4096), OffsetBytes(4096));
    }

    #[test]
    fn derived_context() {
        let geometry = superblock().geometry().unwrap();
        assert_eq!(geometry.entries_per_block(), 256);
        assert_eq!(geometry.group_count(), 1);
        assert_eq!(geometry.inode_number(GroupIndex(0), 0), InodeNumber(1));
        assert_eq!(
            geometry.block_address_bytes(BlockAddress(5)),
            OffsetBytes(5 * 1024)
        );
    }

    #[test]
    fn uninterpreted_features_are_detected() {
        let mut sb = superblock();
        sb.feature_incompat = FeatureIncompatFlags::FILETYPE;
        assert!(sb.uninterpreted_features().is_empty());
        sb.feature_incompat = FeatureIncompatFlags::FILETYPE | FeatureIncompatFlags::EXTENTS;
        assert_eq!(sb.uninterpreted_features(), FeatureIncompatFlags::EXTENTS);
        assert!(!sb.has_journal());
    }

    proptest! {
        #[test]
        fn group_extents_add_up_to_totals(
            blocks_per_group in 1..=8192_u32,
            inodes_per_group in 1..2_000_u32,
            blocks_count in 1..100_000_u32,
            last_inodes in 0..2_000_u32,
        ) {
            let groups = blocks_count.div_ceil(blocks_per_group);
            let last_inodes = last_inodes.min(inodes_per_group);
            let inodes_count = (groups - 1) * inodes_per_group + last_inodes;
            let geometry = Geometry::new(
                BlockSize(1024),
                128,
                blocks_count,
                inodes_count,
                blocks_per_group,
                inodes_per_group,
            )
            .unwrap();

            let extents: Vec<_> = geometry.groups().map(|g| geometry.group_extent(g)).collect();
            prop_assert_eq!(extents.len() as u32, groups);
            prop_assert_eq!(extents.iter().map(|e| u64::from(e.blocks)).sum::<u64>(), u64::from(blocks_count));
            prop_assert_eq!(extents.iter().map(|e| u64::from(e.inodes)).sum::<u64>(), u64::from(inodes_count));
            prop_assert!(extents.iter().all(|e| e.blocks >= 1 && e.blocks <= blocks_per_group));
        }
    }
}
