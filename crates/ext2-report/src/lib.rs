//! Structural analysis of ext2 images. Decodes the superblock, group
//! descriptors, bitmaps, inodes, directory blocks and indirect pointer trees
//! and reports each of them as one line of a transcript. A transcript can be
//! audited for inconsistencies between those structures.
//!
//! # Resources
//!
//! - <https://wiki.osdev.org/Ext2>
//! - <https://www.nongnu.org/ext2-doc/ext2.html>
//! - <https://en.wikipedia.org/wiki/Ext2>

#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cargo_common_metadata,
    clippy::doc_markdown,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::redundant_pub_crate
)]

pub mod audit;
pub mod block_group;
pub mod directory;
pub mod error;
pub mod indirect;
pub mod inode;
pub mod logging;
pub mod reader;
pub mod report;
pub mod superblock;

#[cfg(test)]
mod testing;

pub use audit::*;
pub use block_group::*;
pub use directory::*;
pub use error::{Error, Result};
pub use indirect::*;
pub use inode::*;
pub use reader::*;
pub use report::*;
pub use superblock::*;
