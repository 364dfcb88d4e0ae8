//! Consistency audit over a transcript.
//!
//! The audit only looks at records, never at the image, so it can check a
//! transcript produced elsewhere. It cross-checks block pointers against the
//! free block list, inode records against the free inode list, and directory
//! entries against inode link counts.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::error::{Error, Result};
use crate::indirect::IndirectLevel;
use crate::inode::DIRECT_BLOCKS;
use crate::report::{
    DirectoryEntrySummary, GroupSummary, IndirectMapping, InodeSummary, Record, ReportSink,
    SuperblockSummary,
};
use crate::superblock::{BlockAddress, InodeNumber, Superblock};

/// The root directory is its own parent.
pub const ROOT_INODE: InodeNumber = InodeNumber(2);

/// Every record of one transcript, grouped by kind.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    superblock: Option<SuperblockSummary>,
    groups: Vec<GroupSummary>,
    free_blocks: BTreeSet<u64>,
    free_inodes: BTreeSet<u64>,
    inodes: Vec<InodeSummary>,
    entries: Vec<DirectoryEntrySummary>,
    mappings: Vec<IndirectMapping>,
}

impl Transcript {
    fn push(&mut self, record: Record) {
        match record {
            Record::Superblock(superblock) => self.superblock = Some(superblock),
            Record::Group(group) => self.groups.push(group),
            Record::FreeBlock(block) => {
                self.free_blocks.insert(block);
            }
            Record::FreeInode(inode) => {
                self.free_inodes.insert(inode);
            }
            Record::Inode(inode) => self.inodes.push(inode),
            Record::DirectoryEntry(entry) => self.entries.push(entry),
            Record::Indirect(mapping) => self.mappings.push(mapping),
        }
    }
}

impl ReportSink for Transcript {
    fn emit(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

impl FromIterator<Record> for Transcript {
    fn from_iter<I: IntoIterator<Item = Record>>(records: I) -> Self {
        let mut transcript = Self::default();
        for record in records {
            transcript.push(record);
        }
        transcript
    }
}

/// Where a block pointer was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReference {
    pub block: BlockAddress,
    pub inode: InodeNumber,
    /// Level of the pointer block the reference leads to. `None` for a data
    /// block.
    pub indirection: Option<IndirectLevel>,
    /// Logical offset of the first data block reached through the pointer.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// Points past the end of the file system.
    InvalidBlock(BlockReference),
    /// Points into the metadata at the start of the first group.
    ReservedBlock(BlockReference),
    /// One of several references to the same block.
    DuplicateBlock(BlockReference),
    AllocatedBlockOnFreelist(u64),
    /// Neither free nor referenced by any inode.
    UnreferencedBlock(u64),
    AllocatedInodeOnFreelist(InodeNumber),
    UnallocatedInodeNotOnFreelist(u64),
    LinkCount {
        inode: InodeNumber,
        references: u32,
        links_count: u16,
    },
    /// A `.` or `..` entry that points somewhere else.
    DirectoryLink {
        directory: InodeNumber,
        name: String,
        target: InodeNumber,
        expected: InodeNumber,
    },
    InvalidEntryInode {
        directory: InodeNumber,
        name: String,
        target: InodeNumber,
    },
    UnallocatedEntryInode {
        directory: InodeNumber,
        name: String,
        target: InodeNumber,
    },
}

impl fmt::Display for BlockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.indirection {
            None => "",
            Some(IndirectLevel::Single) => "INDIRECT ",
            Some(IndirectLevel::Double) => "DOUBLE INDIRECT ",
            Some(IndirectLevel::Triple) => "TRIPLE INDIRECT ",
        };
        write!(
            f,
            "{kind}BLOCK {} IN INODE {} AT OFFSET {}",
            self.block.0, self.inode.0, self.offset
        )
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBlock(reference) => write!(f, "INVALID {reference}"),
            Self::ReservedBlock(reference) => write!(f, "RESERVED {reference}"),
            Self::DuplicateBlock(reference) => write!(f, "DUPLICATE {reference}"),
            Self::AllocatedBlockOnFreelist(block) => {
                write!(f, "ALLOCATED BLOCK {block} ON FREELIST")
            }
            Self::UnreferencedBlock(block) => write!(f, "UNREFERENCED BLOCK {block}"),
            Self::AllocatedInodeOnFreelist(inode) => {
                write!(f, "ALLOCATED INODE {} ON FREELIST", inode.0)
            }
            Self::UnallocatedInodeNotOnFreelist(inode) => {
                write!(f, "UNALLOCATED INODE {inode} NOT ON FREELIST")
            }
            Self::LinkCount {
                inode,
                references,
                links_count,
            } => write!(
                f,
                "INODE {} HAS {references} LINKS BUT LINKCOUNT IS {links_count}",
                inode.0
            ),
            Self::DirectoryLink {
                directory,
                name,
                target,
                expected,
            } => write!(
                f,
                "DIRECTORY INODE {} NAME '{name}' LINK TO INODE {} SHOULD BE {}",
                directory.0, target.0, expected.0
            ),
            Self::InvalidEntryInode {
                directory,
                name,
                target,
            } => write!(
                f,
                "DIRECTORY INODE {} NAME '{name}' INVALID INODE {}",
                directory.0, target.0
            ),
            Self::UnallocatedEntryInode {
                directory,
                name,
                target,
            } => write!(
                f,
                "DIRECTORY INODE {} NAME '{name}' UNALLOCATED INODE {}",
                directory.0, target.0
            ),
        }
    }
}

fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

impl Transcript {
    /// Runs every check. Findings come in a fixed order: block checks, then
    /// inode allocation, then directory checks.
    pub fn audit(&self) -> Result<Vec<Inconsistency>> {
        let superblock = self
            .superblock
            .as_ref()
            .ok_or(Error::IncompleteTranscript("no SUPERBLOCK record"))?;
        let first_group = self
            .groups
            .first()
            .ok_or(Error::IncompleteTranscript("no GROUP record"))?;
        if superblock.block_size == 0 {
            return Err(Error::InvalidGeometry("block size is zero"));
        }

        let first_data_block = first_data_block(superblock, first_group);
        debug!("auditing with first data block {first_data_block}");

        let references = self.block_references(superblock.block_size / 4);
        let mut found = Vec::new();
        audit_block_pointers(superblock, first_data_block, &references, &mut found);
        self.audit_block_allocation(superblock, first_data_block, &references, &mut found);
        self.audit_inode_allocation(superblock, &mut found);
        self.audit_link_counts(&mut found);
        self.audit_directory_links(&mut found);
        self.audit_entry_targets(superblock, &mut found);
        Ok(found)
    }

    /// Every non-null pointer in an inode, then every target of a pointer
    /// block.
    pub fn block_references(&self, entries_per_block: u32) -> Vec<BlockReference> {
        let mut references = Vec::new();
        for inode in &self.inodes {
            for (slot, &block) in inode.block_pointers.iter().enumerate() {
                if block.is_null() {
                    continue;
                }
                let (indirection, offset) = match slot.checked_sub(DIRECT_BLOCKS) {
                    None => (None, slot as u64),
                    Some(depth) => {
                        let Some(&level) = IndirectLevel::ALL.get(depth) else {
                            continue;
                        };
                        (Some(level), level.base_offset(entries_per_block))
                    }
                };
                references.push(BlockReference {
                    block,
                    inode: inode.number,
                    indirection,
                    offset,
                });
            }
        }

        for mapping in &self.mappings {
            references.push(BlockReference {
                block: mapping.target,
                inode: mapping.inode,
                indirection: mapping.level.child(),
                offset: mapping.logical_offset,
            });
        }
        references
    }

    fn audit_block_allocation(
        &self,
        superblock: &SuperblockSummary,
        first_data_block: u64,
        references: &[BlockReference],
        found: &mut Vec<Inconsistency>,
    ) {
        let referenced: BTreeSet<u64> = references
            .iter()
            .map(|reference| u64::from(reference.block.0))
            .collect();

        for &block in &referenced {
            if self.free_blocks.contains(&block) {
                found.push(Inconsistency::AllocatedBlockOnFreelist(block));
            }
        }

        for block in first_data_block..u64::from(superblock.blocks_count) {
            if !self.free_blocks.contains(&block) && !referenced.contains(&block) {
                found.push(Inconsistency::UnreferencedBlock(block));
            }
        }
    }

    fn audit_inode_allocation(
        &self,
        superblock: &SuperblockSummary,
        found: &mut Vec<Inconsistency>,
    ) {
        let allocated: BTreeSet<u64> = self
            .inodes
            .iter()
            .map(|inode| u64::from(inode.number.0))
            .collect();

        for inode in &self.inodes {
            if self.free_inodes.contains(&u64::from(inode.number.0)) {
                found.push(Inconsistency::AllocatedInodeOnFreelist(inode.number));
            }
        }

        // Inodes below the first non-reserved one are allowed to be neither.
        for inode in u64::from(superblock.first_ino)..=u64::from(superblock.inodes_count) {
            if !self.free_inodes.contains(&inode) && !allocated.contains(&inode) {
                found.push(Inconsistency::UnallocatedInodeNotOnFreelist(inode));
            }
        }
    }

    fn audit_link_counts(&self, found: &mut Vec<Inconsistency>) {
        let mut references: BTreeMap<InodeNumber, u32> = BTreeMap::new();
        for entry in &self.entries {
            *references.entry(entry.inode).or_default() += 1;
        }

        for inode in &self.inodes {
            let count = references.get(&inode.number).copied().unwrap_or(0);
            if count != u32::from(inode.links_count) {
                found.push(Inconsistency::LinkCount {
                    inode: inode.number,
                    references: count,
                    links_count: inode.links_count,
                });
            }
        }
    }

    /// `.` must point at its own directory, `..` at the directory that holds
    /// the named entry for it. The root is its own parent.
    fn audit_directory_links(&self, found: &mut Vec<Inconsistency>) {
        let directories: BTreeSet<InodeNumber> =
            self.entries.iter().map(|entry| entry.parent).collect();
        let parents: BTreeMap<InodeNumber, InodeNumber> = self
            .entries
            .iter()
            .filter(|entry| directories.contains(&entry.inode) && !is_dot_entry(&entry.name))
            .map(|entry| (entry.inode, entry.parent))
            .collect();

        for entry in &self.entries {
            let expected = match entry.name.as_str() {
                "." => Some(entry.parent),
                ".." if entry.parent == ROOT_INODE => Some(ROOT_INODE),
                ".." => parents.get(&entry.parent).copied(),
                _ => None,
            };
            let Some(expected) = expected else {
                continue;
            };
            if entry.inode != expected {
                found.push(Inconsistency::DirectoryLink {
                    directory: entry.parent,
                    name: entry.name.clone(),
                    target: entry.inode,
                    expected,
                });
            }
        }
    }

    fn audit_entry_targets(&self, superblock: &SuperblockSummary, found: &mut Vec<Inconsistency>) {
        let allocated: BTreeSet<InodeNumber> =
            self.inodes.iter().map(|inode| inode.number).collect();

        for entry in &self.entries {
            if entry.inode.0 == 0 || entry.inode.0 > superblock.inodes_count {
                found.push(Inconsistency::InvalidEntryInode {
                    directory: entry.parent,
                    name: entry.name.clone(),
                    target: entry.inode,
                });
            } else if !is_dot_entry(&entry.name) && !allocated.contains(&entry.inode) {
                found.push(Inconsistency::UnallocatedEntryInode {
                    directory: entry.parent,
                    name: entry.name.clone(),
                    target: entry.inode,
                });
            }
        }
    }
}

fn audit_block_pointers(
    superblock: &SuperblockSummary,
    first_data_block: u64,
    references: &[BlockReference],
    found: &mut Vec<Inconsistency>,
) {
    let blocks_count = u64::from(superblock.blocks_count);
    for reference in references {
        if u64::from(reference.block.0) >= blocks_count {
            found.push(Inconsistency::InvalidBlock(*reference));
        }
    }
    for reference in references {
        if u64::from(reference.block.0) < first_data_block {
            found.push(Inconsistency::ReservedBlock(*reference));
        }
    }

    let mut by_block: BTreeMap<BlockAddress, Vec<BlockReference>> = BTreeMap::new();
    for reference in references {
        by_block.entry(reference.block).or_default().push(*reference);
    }
    for shared in by_block.into_values().filter(|refs| refs.len() > 1) {
        found.extend(shared.into_iter().map(Inconsistency::DuplicateBlock));
    }
}

/// First block after the first group's inode table. Everything before it is
/// superblock, descriptors, bitmaps or inode records.
fn first_data_block(superblock: &SuperblockSummary, first_group: &GroupSummary) -> u64 {
    let inode_size = match superblock.inode_size {
        0 => Superblock::GOOD_OLD_INODE_SIZE,
        size => size,
    };
    let table_bytes = u64::from(first_group.inodes) * u64::from(inode_size);
    u64::from(first_group.inode_table.0) + table_bytes.div_ceil(u64::from(superblock.block_size))
}
