//! Errors produced while reading or writing slice files.

use std::io;

use thiserror::Error;

use crate::rle::RleError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The file's magic number was not recognized. This gets priority over
    /// other parse errors to provide better feedback if you try to parse
    /// garbage.
    #[error("unsupported format: bad magic 0x{0:08x}")]
    UnsupportedFormat(u32),

    /// The file ended before a record it claims to contain.
    #[error(
        "file truncated: {what} at offset {offset} needs {len} bytes, \
         file has {file_len}"
    )]
    TruncatedFile {
        what: &'static str,
        offset: u64,
        len: u64,
        file_len: u64,
    },

    /// A record's contents contradict each other or the file.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Layer data could not be decoded. Only produced in strict mode; by
    /// default bad runs are logged and skipped.
    #[error("corrupted RLE data in layer {layer}: {source}")]
    CorruptedRleData {
        layer: u32,
        #[source]
        source: RleError,
    },

    /// Caller-supplied settings or images cannot produce a valid file.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A layer index past the end of the layer list.
    #[error("layer {index} out of range ({count} layers)")]
    LayerIndex { index: u32, count: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}
