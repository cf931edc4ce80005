//! Preview thumbnails.
//!
//! Every file carries two preview slots, small and large. Each filled slot is a
//! `PreviewHeader` followed by `RLE15` image data.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::layout::{self, PreviewHeader};
use crate::rle::{self, RleError};
use crate::U32LE;

/// Identifies one of the two preview slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PreviewSize {
    /// Shown in file lists on the printer. Slot 0.
    Small = 0,
    /// Shown before starting a print. Slot 1.
    Large = 1,
}

impl PreviewSize {
    /// Both slots, in the order they're written.
    pub const ALL: [PreviewSize; 2] = [PreviewSize::Small, PreviewSize::Large];
}

/// An encoded preview image as stored in the file.
///
/// The header is kept as read so that rewriting a file preserves its reserved
/// words; only the data offset and length get recomputed on output.
#[derive(Clone, Debug, PartialEq)]
pub struct Preview {
    pub header: PreviewHeader,
    pub data: Vec<u8>,
}

impl Preview {
    /// Encodes `image`, emitting runs of at most `max_run` pixels. Chitubox
    /// formats use `0xFFF`, `phz` uses `0x1000`.
    pub fn from_image(image: &RgbImage, max_run: usize) -> Self {
        let data = rle::encode_rle15(image.pixels().map(|p| p.0), max_run);
        let header = PreviewHeader {
            size: [U32LE::new(image.width()), U32LE::new(image.height())],
            data_len: U32LE::new(data.len() as u32),
            ..PreviewHeader::default()
        };
        Self { header, data }
    }

    /// Reads the preview whose header sits at `offset` in the file image.
    pub fn read(buf: &[u8], offset: u32, what: &'static str) -> Result<Self> {
        let header: PreviewHeader = layout::read_record(buf, offset, what)?;
        let data = layout::parse_bytes(
            buf,
            header.data_offset.get(),
            header.data_len.get(),
            what,
        )?
        .to_vec();
        log::debug!(
            "{} at 0x{:x}: {}x{}, {} bytes",
            what,
            offset,
            header.size[0].get(),
            header.size[1].get(),
            data.len()
        );
        Ok(Self { header, data })
    }

    pub fn width(&self) -> u32 {
        self.header.size[0].get()
    }

    pub fn height(&self) -> u32 {
        self.header.size[1].get()
    }

    /// Whether this slot should be written at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the preview into an RGB image.
    ///
    /// Unless `strict` is set, bad runs are logged and the rest of the image
    /// is left black.
    pub fn to_image(&self, strict: bool) -> Result<RgbImage> {
        let (w, h) = (self.width(), self.height());
        let len = (w as usize)
            .checked_mul(h as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| {
                Error::MalformedRecord(format!("preview size {}x{}", w, h))
            })?;
        let mut rgb = vec![0; len];
        rle::decode_rle15(&self.data, &mut rgb, strict).map_err(
            |source: RleError| {
                Error::MalformedRecord(format!("preview data: {}", source))
            },
        )?;
        RgbImage::from_raw(w, h, rgb).ok_or_else(|| {
            Error::MalformedRecord(format!("preview size {}x{}", w, h))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PREVIEW_HEADER_SIZE;
    use zerocopy::AsBytes;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(16, 4, |x, y| {
            if y < 2 {
                image::Rgb([0xF8, 0x80, 0x08])
            } else {
                image::Rgb([(x * 8) as u8, 0, 0xF8])
            }
        })
    }

    #[test]
    fn image_round_trip() {
        let img = gradient();
        let preview = Preview::from_image(&img, 0xFFF);
        assert_eq!(preview.width(), 16);
        assert_eq!(preview.height(), 4);
        assert_eq!(preview.header.data_len.get() as usize, preview.data.len());
        assert_eq!(preview.to_image(true).unwrap(), img);
    }

    #[test]
    fn read_follows_data_offset() {
        let preview = Preview::from_image(&gradient(), 0x1000);
        let mut header = preview.header.clone();
        header.data_offset = U32LE::new(PREVIEW_HEADER_SIZE as u32 + 8);
        let mut buf = vec![0xAA; 4];
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&preview.data);

        let read = Preview::read(&buf[4..], 0, "preview");
        // Offsets are absolute, so reading from a shifted slice must fail.
        assert!(read.is_err());
        let read = Preview::read(&buf, 4, "preview").unwrap();
        assert_eq!(read.data, preview.data);
    }

    #[test]
    fn overlong_data_is_tolerated_unless_strict() {
        let mut preview = Preview::from_image(&RgbImage::new(2, 1), 0xFFF);
        preview.data.extend_from_slice(&[0xFF, 0xFF]);
        assert!(preview.to_image(false).is_ok());
        assert!(preview.to_image(true).is_err());
    }
}
