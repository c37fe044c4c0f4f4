use thiserror::Error;

use crate::ObjectKind;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of stream while reading a {0}")]
    ShortRead(&'static str),

    #[error("object tag {0} does not match the expected kind {1:?}")]
    TagMismatch(u8, ObjectKind),

    #[error("unrecognized object tag {0}")]
    UnknownTag(u8),

    #[error("object size {0} would overflow a seek offset")]
    SizeOverflow(u64),

    #[error("skipping {size} bytes from offset {from} would overshoot the end of the log")]
    SkipOvershoot { from: u64, size: u64 },

    #[error("log magic {0:#010x} does not match the expected magic {expected:#010x}", expected = crate::MAGIC)]
    BadMagic(u32),

    #[error("log was written by architecture {written}, this reader is {reader}")]
    ArchMismatch { written: u16, reader: u16 },

    #[error("unsupported log version {0}")]
    UnsupportedVersion(u16),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
