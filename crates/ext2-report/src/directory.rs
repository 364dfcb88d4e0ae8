use std::borrow::Cow;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::superblock::InodeNumber;

/// See <https://www.nongnu.org/ext2-doc/ext2.html#linked-directories>
///
/// Entries are packed back to back and each one's `rec_len` says where the
/// next one starts. Iteration stops at the end of the block or at an entry
/// whose inode is 0, and never reads past the block whatever `rec_len` says.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryBlock<'a>(pub &'a [u8]);

impl<'a> DirectoryBlock<'a> {
    pub fn iter(&self) -> DirectoryBlockIterator<'a> {
        DirectoryBlockIterator {
            block: self.0,
            offset: 0,
            done: false,
        }
    }
}

pub struct DirectoryBlockIterator<'a> {
    block: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for DirectoryBlockIterator<'a> {
    type Item = DirectoryEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let header = self
            .block
            .get(self.offset..)
            .and_then(DirectoryEntryHeader::read_from_prefix);
        let Some(header) = header else {
            self.done = true;
            return None;
        };

        if header.inode.0 == 0 {
            self.done = true;
            return None;
        }

        let name_start = self.offset + DirectoryEntryHeader::SIZE;
        let name_end = (name_start + usize::from(header.name_len)).min(self.block.len());
        let entry = DirectoryEntry {
            offset: self.offset,
            header,
            name: &self.block[name_start..name_end],
        };

        let rec_len = usize::from(header.rec_len);
        let remaining = self.block.len() - self.offset;
        if rec_len == 0 {
            log::warn!(
                "directory entry at offset {} has a zero record length",
                self.offset
            );
            self.done = true;
        } else if rec_len > remaining {
            log::warn!(
                "directory entry at offset {} has record length {rec_len} but only {remaining} bytes remain in the block",
                self.offset
            );
            self.offset = self.block.len();
        } else {
            self.offset += rec_len;
        }

        Some(entry)
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry<'a> {
    /// Byte offset of the entry within its block.
    pub offset: usize,
    pub header: DirectoryEntryHeader,
    /// Up to `name_len` bytes, cut short if the block ends first.
    pub name: &'a [u8],
}

impl DirectoryEntry<'_> {
    pub fn inode_number(&self) -> InodeNumber {
        self.header.inode
    }

    pub fn rec_len(&self) -> u16 {
        self.header.rec_len
    }

    pub fn name_len(&self) -> u8 {
        self.header.name_len
    }

    /// The name as text. Invalid UTF-8 is replaced and control characters
    /// are escaped, so the name always fits on one line.
    pub fn name(&self) -> Cow<'_, str> {
        let name = String::from_utf8_lossy(self.name);
        if !name.chars().any(char::is_control) {
            return name;
        }

        let mut escaped = String::with_capacity(name.len() + 8);
        for c in name.chars() {
            if c.is_control() {
                escaped.extend(c.escape_default());
            } else {
                escaped.push(c);
            }
        }
        Cow::Owned(escaped)
    }
}

/// See <https://www.nongnu.org/ext2-doc/ext2.html#linked-directory-entry-structure>
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct DirectoryEntryHeader {
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

impl DirectoryEntryHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}
