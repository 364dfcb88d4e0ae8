use std::io;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can stop a walk over an image. None of these are
/// recoverable: the caller reports the error once and exits.
#[derive(Debug, Error)]
pub enum Error {
    /// A short or failed read from the backing image.
    #[error("failed to read {len} bytes at offset {offset} from the file system image: {source}")]
    ImageRead {
        offset: u64,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("block size of 1024 << {log_block_size} bytes is not supported")]
    UnsupportedBlockSize { log_block_size: u32 },

    #[error("inode record size of {0} bytes is not supported")]
    UnsupportedInodeSize(u16),

    #[error("invalid file system geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("timestamp {0} cannot be converted to a calendar time")]
    TimestampConversion(u32),

    /// Only levels 1, 2 and 3 exist. Seeing anything else is a bug in the
    /// caller, not a property of the image.
    #[error("invalid level of indirection {0}")]
    InvalidIndirectionLevel(u8),

    #[error("failed to write to the report output: {0}")]
    OutputWrite(#[source] io::Error),

    #[error("malformed transcript line: {0:?}")]
    MalformedRecord(String),

    /// A transcript is missing a record every audit depends on.
    #[error("incomplete transcript: {0}")]
    IncompleteTranscript(&'static str),
}
