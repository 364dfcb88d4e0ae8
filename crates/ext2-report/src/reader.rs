use std::io::{self, Read, Seek, SeekFrom};

use log::{debug, trace, warn};
use zerocopy::FromBytes;

use crate::block_group::{Bitmap, BitmapKind, BlockGroupDescriptor, GroupIndex};
use crate::directory::DirectoryBlock;
use crate::error::{Error, Result};
use crate::indirect::{IndirectLevel, PointerBlock};
use crate::inode::Inode;
use crate::report::{
    DirectoryEntrySummary, GroupSummary, IndirectMapping, InodeSummary, Record, ReportSink,
    SuperblockSummary,
};
use crate::superblock::{BlockAddress, Geometry, InodeNumber, OffsetBytes, Superblock};

/// Walks every structure of an image and hands one [`Record`] per object to
/// a [`ReportSink`]. Nothing is cached: each structure is read when it is
/// reached.
#[derive(Debug)]
pub struct FilesystemReader<R> {
    superblock: Superblock,
    geometry: Geometry,
    block_reader: R,
}

impl<R: BlockReader> FilesystemReader<R> {
    pub fn read(mut block_reader: R) -> Result<Self> {
        let superblock: Superblock = block_reader.read_bytes(Superblock::OFFSET_BYTES)?;
        if !superblock.magic_valid() {
            let magic = superblock.magic;
            warn!("superblock magic is {magic:#06X}, expected {:#06X}", Superblock::MAGIC);
        }
        let uninterpreted = superblock.uninterpreted_features();
        if !uninterpreted.is_empty() {
            warn!("image uses features that are not decoded: {uninterpreted:?}");
        }
        if superblock.has_journal() {
            warn!("image has a journal; it is reported as ordinary inodes and blocks");
        }

        let geometry = superblock.geometry()?;
        debug!(
            "block size {}, {} groups, {} byte inode records",
            geometry.block_size().0,
            geometry.group_count(),
            geometry.inode_record_size()
        );

        Ok(Self {
            superblock,
            geometry,
            block_reader,
        })
    }

    /// Emits the whole transcript: the superblock, then each group with its
    /// free lists, inodes, directory entries and indirect blocks.
    pub fn report<S: ReportSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.report_superblock(sink)?;

        for group in self.geometry.groups() {
            let descriptor = self.read_group_descriptor(group)?;
            self.report_group(group, &descriptor, sink)?;
        }
        Ok(())
    }

    pub fn report_superblock<S: ReportSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        let sb = &self.superblock;
        sink.emit(Record::Superblock(SuperblockSummary {
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            block_size: self.geometry.block_size().0,
            inode_size: sb.inode_size,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            first_ino: sb.first_ino,
        }))
    }

    /// Descriptors are read one at a time as their group is reached, so a
    /// corrupt group count fails on the first read past the image instead of
    /// sizing one huge buffer.
    pub fn read_group_descriptor(&mut self, group: GroupIndex) -> Result<BlockGroupDescriptor> {
        self.block_reader.read_bytes(self.geometry.descriptor_offset(group))
    }

    pub fn report_group<S: ReportSink + ?Sized>(
        &mut self,
        group: GroupIndex,
        descriptor: &BlockGroupDescriptor,
        sink: &mut S,
    ) -> Result<()> {
        let extent = self.geometry.group_extent(group);
        debug!("group {}: {} blocks, {} inodes", group.0, extent.blocks, extent.inodes);

        sink.emit(Record::Group(GroupSummary {
            index: group.0,
            blocks: extent.blocks,
            inodes: extent.inodes,
            free_blocks: descriptor.free_blocks_count,
            free_inodes: descriptor.free_inodes_count,
            block_bitmap: descriptor.block_bitmap,
            inode_bitmap: descriptor.inode_bitmap,
            inode_table: descriptor.inode_table,
        }))?;

        self.report_free_units(
            BitmapKind::Block,
            descriptor.block_bitmap,
            group,
            extent.blocks,
            sink,
        )?;
        self.report_free_units(
            BitmapKind::Inode,
            descriptor.inode_bitmap,
            group,
            extent.inodes,
            sink,
        )?;
        self.report_inode_table(group, descriptor.inode_table, extent.inodes, sink)
    }

    /// Emits a `BFREE` or `IFREE` record for every clear bit among the
    /// first `count` bits of the bitmap block.
    pub fn report_free_units<S: ReportSink + ?Sized>(
        &mut self,
        kind: BitmapKind,
        bitmap_block: BlockAddress,
        group: GroupIndex,
        count: u32,
        sink: &mut S,
    ) -> Result<()> {
        let buf = self.read_block(bitmap_block)?;
        let bitmap = Bitmap(&buf);

        let per_group = match kind {
            BitmapKind::Block => self.geometry.blocks_per_group(),
            BitmapKind::Inode => self.geometry.inodes_per_group(),
        };
        let first_id = u64::from(group.0) * u64::from(per_group) + 1;
        for index in bitmap.free_units(count) {
            let id = first_id + u64::from(index);
            sink.emit(match kind {
                BitmapKind::Block => Record::FreeBlock(id),
                BitmapKind::Inode => Record::FreeInode(id),
            })?;
        }
        Ok(())
    }

    /// Decodes the group's inode records, emitting an `INODE` record for
    /// every one in use. Directory entries and indirect blocks are walked for
    /// every record, in use or not, since they are driven by the raw pointer
    /// fields.
    pub fn report_inode_table<S: ReportSink + ?Sized>(
        &mut self,
        group: GroupIndex,
        inode_table: BlockAddress,
        count: u32,
        sink: &mut S,
    ) -> Result<()> {
        let block_size = self.geometry.block_size().0;
        let stride = self.geometry.inode_record_size();
        let per_block = block_size / stride;
        let table_start = self.geometry.block_address_bytes(inode_table);

        // One block of records at a time.
        for table_block in 0..count.div_ceil(per_block) {
            let buf = self.block_reader.read_num_bytes(
                table_start + OffsetBytes(u64::from(table_block) * u64::from(block_size)),
                block_size as usize,
            )?;
            let first = table_block * per_block;
            for (local_index, record) in (first..count).zip(buf.chunks_exact(stride as usize)) {
                let Some(inode) = Inode::read_from_prefix(record) else {
                    continue;
                };
                let number = self.geometry.inode_number(group, local_index);
                if inode.is_in_use() {
                    sink.emit(Record::Inode(InodeSummary::new(number, &inode)?))?;
                }
                self.report_inode_blocks(number, &inode, sink)?;
            }
        }
        Ok(())
    }

    pub fn report_inode_blocks<S: ReportSink + ?Sized>(
        &mut self,
        number: InodeNumber,
        inode: &Inode,
        sink: &mut S,
    ) -> Result<()> {
        if inode.is_dir() {
            self.report_directory(number, inode, sink)?;
        }
        for level in IndirectLevel::ALL {
            self.report_indirect_tree(number, level, inode.indirect_block(level), sink)?;
        }
        Ok(())
    }

    /// Emits a `DIRENT` record for each entry in the directory's direct
    /// blocks. Slots holding a null pointer have no block to scan.
    pub fn report_directory<S: ReportSink + ?Sized>(
        &mut self,
        number: InodeNumber,
        inode: &Inode,
        sink: &mut S,
    ) -> Result<()> {
        for block in inode.direct_blocks() {
            if block.is_null() {
                continue;
            }
            trace!("inode {}: scanning directory block {}", number.0, block.0);

            let buf = self.read_block(block)?;
            for entry in DirectoryBlock(&buf).iter() {
                sink.emit(Record::DirectoryEntry(DirectoryEntrySummary {
                    parent: number,
                    offset: entry.offset,
                    inode: entry.inode_number(),
                    rec_len: entry.rec_len(),
                    name_len: entry.name_len(),
                    name: entry.name().into_owned(),
                }))?;
            }
        }
        Ok(())
    }

    /// Emits an `INDIRECT` record for every non-null pointer in the tree
    /// rooted at `root`. A null root means there is nothing to walk.
    pub fn report_indirect_tree<S: ReportSink + ?Sized>(
        &mut self,
        number: InodeNumber,
        level: IndirectLevel,
        root: BlockAddress,
        sink: &mut S,
    ) -> Result<()> {
        let base = level.base_offset(self.geometry.entries_per_block());
        self.walk_pointer_block(number, level, base, root, sink)
    }

    /// `base` is the logical offset of the first data block reachable
    /// through `block`. Slot `i` at level `L` starts `i * n^(L-1)` blocks
    /// later, and that offset becomes the base of the child walk.
    fn walk_pointer_block<S: ReportSink + ?Sized>(
        &mut self,
        number: InodeNumber,
        level: IndirectLevel,
        base: u64,
        block: BlockAddress,
        sink: &mut S,
    ) -> Result<()> {
        if block.is_null() {
            return Ok(());
        }
        trace!(
            "inode {}: level {} pointer block {} at logical offset {base}",
            number.0,
            level.depth(),
            block.0
        );

        let buf = self.read_block(block)?;
        let stride = level.stride(self.geometry.entries_per_block());
        for (index, target) in PointerBlock(&buf).entries() {
            let logical_offset = base + u64::from(index) * stride;
            sink.emit(Record::Indirect(IndirectMapping {
                inode: number,
                level,
                logical_offset,
                block,
                target,
            }))?;

            if let Some(child) = level.child() {
                self.walk_pointer_block(number, child, logical_offset, target, sink)?;
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block: BlockAddress) -> Result<Vec<u8>> {
        self.block_reader.read_num_bytes(
            self.geometry.block_address_bytes(block),
            self.geometry.block_size().0 as usize,
        )
    }
}

/// Something that knows how to read bytes from the image backing the
/// filesystem. Any short or failed read is an error.
pub trait BlockReader {
    fn read_num_bytes(&mut self, addr: OffsetBytes, num_bytes: usize) -> Result<Vec<u8>>;

    fn read_bytes<T: FromBytes>(&mut self, addr: OffsetBytes) -> Result<T> {
        let num_bytes = core::mem::size_of::<T>();
        let buf = self.read_num_bytes(addr, num_bytes)?;
        T::read_from_prefix(&buf).ok_or_else(|| Error::ImageRead {
            offset: addr.0,
            len: num_bytes,
            source: io::ErrorKind::UnexpectedEof.into(),
        })
    }
}

impl<T: Read + Seek> BlockReader for T {
    fn read_num_bytes(&mut self, addr: OffsetBytes, num_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; num_bytes];
        self.seek(SeekFrom::Start(addr.0))
            .and_then(|_| self.read_exact(&mut buf))
            .map_err(|source| Error::ImageRead {
                offset: addr.0,
                len: num_bytes,
                source,
            })?;
        Ok(buf)
    }
}
