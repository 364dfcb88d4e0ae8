//! The transcript: one comma separated line per decoded object, with the
//! record kind as the first field.

use core::fmt;
use core::str::FromStr;
use std::io::Write;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::indirect::IndirectLevel;
use crate::inode::{Inode, N_BLOCKS};
use crate::superblock::{BlockAddress, InodeNumber};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Superblock(SuperblockSummary),
    Group(GroupSummary),
    /// 1-based number of a free block.
    FreeBlock(u64),
    /// 1-based number of a free inode.
    FreeInode(u64),
    Inode(InodeSummary),
    DirectoryEntry(DirectoryEntrySummary),
    Indirect(IndirectMapping),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockSummary {
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub block_size: u32,
    pub inode_size: u16,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub first_ino: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub index: u32,
    pub blocks: u32,
    pub inodes: u32,
    pub free_blocks: u16,
    pub free_inodes: u16,
    pub block_bitmap: BlockAddress,
    pub inode_bitmap: BlockAddress,
    pub inode_table: BlockAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeSummary {
    pub number: InodeNumber,
    pub type_char: char,
    pub permissions: u16,
    pub uid: u16,
    pub gid: u16,
    pub links_count: u16,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub size: u32,
    pub blocks: u32,
    pub block_pointers: [BlockAddress; N_BLOCKS],
}

impl InodeSummary {
    pub fn new(number: InodeNumber, inode: &Inode) -> Result<Self> {
        Ok(Self {
            number,
            type_char: inode.file_format().type_char(),
            permissions: inode.permissions(),
            uid: inode.uid,
            gid: inode.gid,
            links_count: inode.links_count,
            ctime: Timestamp::from_epoch(inode.ctime)?,
            mtime: Timestamp::from_epoch(inode.mtime)?,
            atime: Timestamp::from_epoch(inode.atime)?,
            // Only the low 32 bits; size_high is not combined in.
            size: inode.size_low,
            blocks: inode.blocks,
            block_pointers: inode.block_pointers(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntrySummary {
    /// The directory the entry was found in.
    pub parent: InodeNumber,
    /// Byte offset of the entry within its block.
    pub offset: usize,
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub name: String,
}

/// One non-null slot of a pointer block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectMapping {
    pub inode: InodeNumber,
    pub level: IndirectLevel,
    /// Logical block offset, within the file, of the first data block this
    /// pointer leads to.
    pub logical_offset: u64,
    /// The pointer block holding the slot.
    pub block: BlockAddress,
    /// What the slot points to.
    pub target: BlockAddress,
}

/// An inode time stamp: seconds since the epoch, always shown in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// `mm/dd/yy HH:MM:SS`
    pub const FORMAT: &'static str = "%m/%d/%y %H:%M:%S";

    pub fn from_epoch(seconds: u32) -> Result<Self> {
        DateTime::<Utc>::from_timestamp(i64::from(seconds), 0)
            .map(Self)
            .ok_or(Error::TimestampConversion(seconds))
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    /// Two digit years read back as 1969 through 2068, which formats to the
    /// same text.
    fn from_str(s: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(s, Self::FORMAT)
            .map(|naive| Self(DateTime::from_naive_utc_and_offset(naive, Utc)))
            .map_err(|_| Error::MalformedRecord(s.to_owned()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superblock(sb) => write!(
                f,
                "SUPERBLOCK,{},{},{},{},{},{},{}",
                sb.blocks_count,
                sb.inodes_count,
                sb.block_size,
                sb.inode_size,
                sb.blocks_per_group,
                sb.inodes_per_group,
                sb.first_ino,
            ),
            Self::Group(group) => write!(
                f,
                "GROUP,{},{},{},{},{},{},{},{}",
                group.index,
                group.blocks,
                group.inodes,
                group.free_blocks,
                group.free_inodes,
                group.block_bitmap.0,
                group.inode_bitmap.0,
                group.inode_table.0,
            ),
            Self::FreeBlock(block) => write!(f, "BFREE,{block}"),
            Self::FreeInode(inode) => write!(f, "IFREE,{inode}"),
            Self::Inode(inode) => {
                write!(
                    f,
                    "INODE,{},{},{:o},{},{},{},{},{},{},{},{}",
                    inode.number.0,
                    inode.type_char,
                    inode.permissions,
                    inode.uid,
                    inode.gid,
                    inode.links_count,
                    inode.ctime,
                    inode.mtime,
                    inode.atime,
                    inode.size,
                    inode.blocks,
                )?;
                for pointer in &inode.block_pointers {
                    write!(f, ",{}", pointer.0)?;
                }
                Ok(())
            }
            Self::DirectoryEntry(entry) => write!(
                f,
                "DIRENT,{},{},{},{},{},'{}'",
                entry.parent.0,
                entry.offset,
                entry.inode.0,
                entry.rec_len,
                entry.name_len,
                entry.name,
            ),
            Self::Indirect(mapping) => write!(
                f,
                "INDIRECT,{},{},{},{},{}",
                mapping.inode.0,
                u8::from(mapping.level),
                mapping.logical_offset,
                mapping.block.0,
                mapping.target.0,
            ),
        }
    }
}

impl FromStr for Record {
    type Err = Error;

    /// Parses one transcript line, without its line terminator.
    fn from_str(line: &str) -> Result<Self> {
        let mut fields = Fields::new(line);
        let record = match fields.next_str()? {
            "SUPERBLOCK" => Self::Superblock(SuperblockSummary {
                blocks_count: fields.next()?,
                inodes_count: fields.next()?,
                block_size: fields.next()?,
                inode_size: fields.next()?,
                blocks_per_group: fields.next()?,
                inodes_per_group: fields.next()?,
                first_ino: fields.next()?,
            }),
            "GROUP" => Self::Group(GroupSummary {
                index: fields.next()?,
                blocks: fields.next()?,
                inodes: fields.next()?,
                free_blocks: fields.next()?,
                free_inodes: fields.next()?,
                block_bitmap: BlockAddress(fields.next()?),
                inode_bitmap: BlockAddress(fields.next()?),
                inode_table: BlockAddress(fields.next()?),
            }),
            "BFREE" => Self::FreeBlock(fields.next()?),
            "IFREE" => Self::FreeInode(fields.next()?),
            "INODE" => {
                let number = InodeNumber(fields.next()?);
                let type_char = fields.next()?;
                let permissions = u16::from_str_radix(fields.next_str()?, 8)
                    .map_err(|_| fields.malformed())?;
                let uid = fields.next()?;
                let gid = fields.next()?;
                let links_count = fields.next()?;
                let ctime = fields.next()?;
                let mtime = fields.next()?;
                let atime = fields.next()?;
                let size = fields.next()?;
                let blocks = fields.next()?;
                let mut block_pointers = [BlockAddress(0); N_BLOCKS];
                for pointer in &mut block_pointers {
                    *pointer = BlockAddress(fields.next()?);
                }
                Self::Inode(InodeSummary {
                    number,
                    type_char,
                    permissions,
                    uid,
                    gid,
                    links_count,
                    ctime,
                    mtime,
                    atime,
                    size,
                    blocks,
                    block_pointers,
                })
            }
            "DIRENT" => {
                let parent = InodeNumber(fields.next()?);
                let offset = fields.next()?;
                let inode = InodeNumber(fields.next()?);
                let rec_len = fields.next()?;
                let name_len = fields.next()?;
                // The name is last and may itself contain commas.
                let name = fields
                    .remainder()?
                    .strip_prefix('\'')
                    .and_then(|name| name.strip_suffix('\''))
                    .ok_or_else(|| fields.malformed())?;
                Self::DirectoryEntry(DirectoryEntrySummary {
                    parent,
                    offset,
                    inode,
                    rec_len,
                    name_len,
                    name: name.to_owned(),
                })
            }
            "INDIRECT" => Self::Indirect(IndirectMapping {
                inode: InodeNumber(fields.next()?),
                level: IndirectLevel::try_from(fields.next::<u8>()?)?,
                logical_offset: fields.next()?,
                block: BlockAddress(fields.next()?),
                target: BlockAddress(fields.next()?),
            }),
            _ => return Err(fields.malformed()),
        };
        fields.finish()?;
        Ok(record)
    }
}

/// Comma separated fields of one transcript line.
struct Fields<'a> {
    line: &'a str,
    rest: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            rest: Some(line),
        }
    }

    fn malformed(&self) -> Error {
        Error::MalformedRecord(self.line.to_owned())
    }

    fn next_str(&mut self) -> Result<&'a str> {
        let rest = self.rest.take().ok_or_else(|| self.malformed())?;
        Ok(match rest.split_once(',') {
            Some((field, rest)) => {
                self.rest = Some(rest);
                field
            }
            None => rest,
        })
    }

    fn next<T: FromStr>(&mut self) -> Result<T> {
        let field = self.next_str()?;
        field.parse().map_err(|_| self.malformed())
    }

    fn remainder(&mut self) -> Result<&'a str> {
        self.rest.take().ok_or_else(|| self.malformed())
    }

    fn finish(&self) -> Result<()> {
        match self.rest {
            Some(_) => Err(self.malformed()),
            None => Ok(()),
        }
    }
}

/// Where records go once decoded.
pub trait ReportSink {
    fn emit(&mut self, record: Record) -> Result<()>;
}

/// Collects records in memory.
impl ReportSink for Vec<Record> {
    fn emit(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Writes each record as one line of text. A line is fully formatted before
/// any of it is written.
#[derive(Debug)]
pub struct TextSink<W> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(Error::OutputWrite)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for TextSink<W> {
    fn emit(&mut self, record: Record) -> Result<()> {
        let line = format!("{record}\n");
        self.writer
            .write_all(line.as_bytes())
            .map_err(Error::OutputWrite)
    }
}
