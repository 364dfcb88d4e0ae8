use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::indirect::IndirectLevel;
use crate::superblock::BlockAddress;

/// Direct pointers come first in `i_block`.
pub const DIRECT_BLOCKS: usize = 12;

/// Direct pointers plus the singly, doubly and triply indirect pointers.
pub const N_BLOCKS: usize = 15;

/// See <https://www.nongnu.org/ext2-doc/ext2.html#inode-table>
///
/// This is the revision 0 layout. Larger records from dynamic revision file
/// systems start with the same 128 bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size_low: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// Number of 512 byte sectors, not file system blocks.
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub block: [BlockAddress; N_BLOCKS],
    pub generation: u32,
    pub file_acl: u32,
    /// High 32 bits of file size. This is dir_acl in revision 0.
    pub size_high: u32,
    pub faddr: u32,
    pub osd2: [u8; 12],
}

impl Inode {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const DIRECT_BLOCKS: usize = DIRECT_BLOCKS;
    pub const N_BLOCKS: usize = N_BLOCKS;

    pub fn mode(&self) -> InodeMode {
        InodeMode::from_bits_retain(self.mode)
    }

    /// Deleted and never-used records have a zero mode or no links left.
    pub fn is_in_use(&self) -> bool {
        self.mode != 0 && self.links_count != 0
    }

    pub fn file_format(&self) -> FileFormat {
        self.mode().file_format()
    }

    pub fn is_dir(&self) -> bool {
        self.file_format() == FileFormat::Directory
    }

    /// Access rights and the setuid/setgid/sticky bits.
    pub fn permissions(&self) -> u16 {
        self.mode().intersection(InodeMode::PERMISSIONS).bits()
    }

    /// All `i_block` slots, in on-disk order.
    pub fn block_pointers(&self) -> [BlockAddress; Self::N_BLOCKS] {
        self.block
    }

    pub fn direct_blocks(&self) -> [BlockAddress; Self::DIRECT_BLOCKS] {
        let mut direct = [BlockAddress(0); Self::DIRECT_BLOCKS];
        direct.copy_from_slice(&self.block_pointers()[..Self::DIRECT_BLOCKS]);
        direct
    }

    /// Root of the pointer tree for the given level of indirection.
    pub fn indirect_block(&self, level: IndirectLevel) -> BlockAddress {
        self.block_pointers()[Self::DIRECT_BLOCKS + level.depth() - 1]
    }
}

/// The file format part of `i_mode`, reduced to what the transcript
/// distinguishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileFormat {
    Directory,
    RegularFile,
    SymbolicLink,
    Other,
}

impl FileFormat {
    pub fn type_char(self) -> char {
        match self {
            Self::Directory => 'd',
            Self::RegularFile => 'f',
            Self::SymbolicLink => 's',
            Self::Other => '?',
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    /// <https://www.nongnu.org/ext2-doc/ext2.html#i-mode>
    pub struct InodeMode: u16 {
        // Access rights

        /// Others execute
        const IXOTH = 0x001;

        /// Others write
        const IWOTH = 0x002;

        /// Others read
        const IROTH = 0x004;

        /// Group execute
        const IXGRP = 0x008;

        /// Group write
        const IWGRP = 0x010;

        /// Group read
        const IRGRP = 0x020;

        /// User execute
        const IXUSR = 0x040;

        /// User write
        const IWUSR = 0x080;

        /// User read
        const IRUSR = 0x100;

        // Process execution user/group override

        /// Sticky bit
        const ISVTX = 0x200;

        /// Set process group id
        const ISGID = 0x400;

        /// Set process user id
        const ISUID = 0x800;

        /// Low 12 bits.
        const PERMISSIONS = 0x0FFF;

        // File format. These share the top nibble, so they are values, not
        // independent bits.

        /// FIFO
        const IFIFO = 0x1000;

        /// Character device
        const IFCHR = 0x2000;

        /// Directory
        const IFDIR = 0x4000;

        /// Block device
        const IFBLK = 0x6000;

        /// Regular file
        const IFREG = 0x8000;

        /// Symbolic link
        const IFLNK = 0xA000;

        /// Socket
        const IFSOCK = 0xC000;

        const IFMT = 0xF000;
    }
}

impl InodeMode {
    pub fn file_format(self) -> FileFormat {
        let format = self.intersection(Self::IFMT);
        if format == Self::IFDIR {
            FileFormat::Directory
        } else if format == Self::IFREG {
            FileFormat::RegularFile
        } else if format == Self::IFLNK {
            FileFormat::SymbolicLink
        } else {
            FileFormat::Other
        }
    }
}
