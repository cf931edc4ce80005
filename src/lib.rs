//! Reading and writing resin (masked-SLA) printer slice files.
//!
//! Three closely related container formats are supported:
//!
//! - `cbddlp`: bilevel layer masks in the `RLE1` scheme, optionally repeated
//!   at several thresholds to fake antialiasing.
//! - `ctb`: 7-bit grayscale layer masks in the `RLE7` scheme, optionally
//!   scrambled with a per-layer keystream.
//! - `phz`: same idea as `ctb`, with a reshuffled header, the `RLE7a` scheme
//!   and different cipher constants.
//!
//! All three share the preview image encoding (`RLE15`) and the layer table
//! record shape.
//!
//! The usual entry points are [`SliceFile::decode`] to read a file image,
//! [`output::Builder`] to make one from scratch, and
//! [`SliceFormat::encode`] to write it back out.

use num_derive::FromPrimitive;
use zerocopy::byteorder::{LittleEndian, F32, U16, U32};

use crate::crypto::Cipher;

pub mod crypto;
pub mod error;
pub mod file;
pub mod input;
pub mod island;
pub mod layer;
pub mod layout;
pub mod model;
pub mod output;
pub mod preview;
pub mod rle;

mod par;

pub use error::{Error, Result};
pub use file::{ChituboxFile, LayerTable, PhzFile, SliceFile, SliceFormat};
pub use input::DecodeOptions;
pub use island::{IslandDetector, IssueKind, LayerIssue};
pub use layer::{Layer, LayerManager};
pub use model::{Job, LayerConfig, Machine};
pub use preview::{Preview, PreviewSize};

/// Little-endian `u16` as it appears in file records.
pub type U16LE = U16<LittleEndian>;
/// Little-endian `u32` as it appears in file records.
pub type U32LE = U32<LittleEndian>;
/// Little-endian IEEE-754 single as it appears in file records.
pub type F32LE = F32<LittleEndian>;

/// Magic numbers found in the first word of supported files.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive)]
#[repr(u32)]
pub enum Magic {
    /// Bilevel `cbddlp`, possibly with antialiasing level sets.
    CBDDLP = 0x12FD_0019,
    /// Multilevel `ctb`, possibly encrypted.
    CTB = 0x12FD_0086,
    /// Multilevel `phz`, possibly encrypted.
    PHZ = 0x9FDA_83AE,
}

/// The two header arrangements used by the supported formats.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeaderStyle {
    /// Fixed header plus separate print parameter and slicer info records.
    Chitubox,
    /// Everything folded into one large header.
    Phz,
}

impl Magic {
    /// Identifies which header layout follows this magic.
    pub fn header_style(self) -> HeaderStyle {
        match self {
            Magic::CBDDLP | Magic::CTB => HeaderStyle::Chitubox,
            Magic::PHZ => HeaderStyle::Phz,
        }
    }

    /// Which key stream scrambles layer data in this format, if any.
    pub fn cipher(self) -> Option<Cipher> {
        match self {
            Magic::CBDDLP => None,
            Magic::CTB => Some(Cipher::Chitubox),
            Magic::PHZ => Some(Cipher::Phz),
        }
    }

    /// Whether layer data in this format is scrambled when the header carries
    /// a non-zero key.
    pub fn supports_encryption(self) -> bool {
        self.cipher().is_some()
    }

    /// Longest run the preview encoder emits for this format.
    pub fn preview_max_run(self) -> usize {
        match self {
            Magic::PHZ => 0x1000,
            _ => 0xFFF,
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Magic::CBDDLP => "cbddlp",
            Magic::CTB => "ctb",
            Magic::PHZ => "phz",
        }
    }

    /// Guesses a format from a file extension, ignoring case. `photon` is the
    /// older name for `cbddlp`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "cbddlp" | "photon" => Some(Magic::CBDDLP),
            "ctb" => Some(Magic::CTB),
            "phz" => Some(Magic::PHZ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn magic_values() {
        assert_eq!(Magic::from_u32(0x12FD_0019), Some(Magic::CBDDLP));
        assert_eq!(Magic::from_u32(0x12FD_0086), Some(Magic::CTB));
        assert_eq!(Magic::from_u32(0x9FDA_83AE), Some(Magic::PHZ));
        assert_eq!(Magic::from_u32(0xDEAD_BEEF), None);
    }

    #[test]
    fn extensions() {
        assert_eq!(Magic::from_extension("CTB"), Some(Magic::CTB));
        assert_eq!(Magic::from_extension("photon"), Some(Magic::CBDDLP));
        assert_eq!(Magic::from_extension("sl1"), None);
        assert_eq!(Magic::PHZ.extension(), "phz");
    }

    #[test]
    fn only_cbddlp_is_never_encrypted() {
        assert!(!Magic::CBDDLP.supports_encryption());
        assert_eq!(Magic::CTB.cipher(), Some(Cipher::Chitubox));
        assert_eq!(Magic::PHZ.cipher(), Some(Cipher::Phz));
    }
}
