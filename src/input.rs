//! Support for reading file formats implemented by this library.
//!
//! Decoding happens in two phases. First the records are located and copied
//! out of the in-memory file image, and every layer's encoded data is
//! borrowed from it; any record or blob that doesn't fit in the file is fatal.
//! Then the layers are decrypted and decompressed, one task per layer.

use num_traits::FromPrimitive;

use crate::crypto;
use crate::error::{Error, Result};
use crate::file::{ChituboxFile, LayerTable, PhzFile, SliceFile};
use crate::layer::{Layer, LayerManager};
use crate::layout::{
    self, ChituboxHeader, LayerRecord, PhzHeader, PrintParameters, SlicerInfo,
};
use crate::par;
use crate::preview::Preview;
use crate::rle;
use crate::{HeaderStyle, Magic, U32LE};

/// Knobs for decoding.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodeOptions {
    /// Fail on the first corrupted run in any layer, instead of logging it and
    /// decoding the rest of the layer as well as possible.
    pub strict_rle: bool,
}

/// Decodes a file of any supported format.
pub fn decode(buf: &[u8], options: &DecodeOptions) -> Result<SliceFile> {
    match read_magic(buf)?.header_style() {
        HeaderStyle::Chitubox => {
            decode_chitubox(buf, options).map(SliceFile::Chitubox)
        }
        HeaderStyle::Phz => decode_phz(buf, options).map(SliceFile::Phz),
    }
}

/// Reads the magic number at the start of the file. Magic errors get reported
/// before anything else to provide better feedback if you try to parse
/// garbage.
pub fn read_magic(buf: &[u8]) -> Result<Magic> {
    let word = layout::read_record::<U32LE>(buf, 0, "magic")?.get();
    Magic::from_u32(word).ok_or(Error::UnsupportedFormat(word))
}

/// Decodes a `cbddlp` or `ctb` file.
pub fn decode_chitubox(
    buf: &[u8],
    options: &DecodeOptions,
) -> Result<ChituboxFile> {
    let magic = read_magic(buf)?;
    if magic.header_style() != HeaderStyle::Chitubox {
        return Err(Error::UnsupportedFormat(magic as u32));
    }
    let header: ChituboxHeader = layout::read_record(buf, 0, "file header")?;
    log::debug!("header: {:?}", header);

    let resolution = [header.resolution[0].get(), header.resolution[1].get()];
    let layer_count = header.layer_count.get();
    check_dimensions(resolution, layer_count)?;

    let print_parameters = match header.print_params_offset.get() {
        0 => None,
        offset => Some(layout::read_record::<PrintParameters>(
            buf,
            offset,
            "print parameters",
        )?),
    };
    let slicer_info = match header.slicer_info_offset.get() {
        0 => None,
        offset => {
            Some(layout::read_record::<SlicerInfo>(buf, offset, "slicer info")?)
        }
    };
    let machine_name = match &slicer_info {
        Some(si) => layout::read_string(
            buf,
            si.machine_name_offset.get(),
            si.machine_name_len.get(),
            "machine name",
        )?,
        None => vec![],
    };
    let previews = read_previews(
        buf,
        header.small_preview_offset.get(),
        header.large_preview_offset.get(),
    )?;

    let antialias = header.antialias_level.get();
    let levels = match magic {
        Magic::CBDDLP if header.version.get() == 1 => 1,
        Magic::CBDDLP if antialias == 0 => {
            log::warn!("antialias level 0, reading as 1");
            1
        }
        Magic::CBDDLP => antialias,
        _ => 1,
    };
    let layer_table = read_layer_table(
        buf,
        header.layer_table_offset.get(),
        layer_count,
        levels,
    )?;

    let key = match magic.cipher() {
        Some(_) => header.encryption_key.get(),
        None => 0,
    };
    let layers = decode_layers(
        buf,
        &layer_table,
        &LayerCodec {
            magic,
            key,
            width: resolution[0],
            levels,
        },
        resolution,
        options,
    )?;

    Ok(ChituboxFile {
        magic,
        header,
        print_parameters,
        slicer_info,
        machine_name,
        previews,
        layer_table,
        layers,
    })
}

/// Decodes a `phz` file.
pub fn decode_phz(buf: &[u8], options: &DecodeOptions) -> Result<PhzFile> {
    let magic = read_magic(buf)?;
    if magic != Magic::PHZ {
        return Err(Error::UnsupportedFormat(magic as u32));
    }
    let header: PhzHeader = layout::read_record(buf, 0, "file header")?;
    log::debug!("header: {:?}", header);

    let resolution = [header.resolution[0].get(), header.resolution[1].get()];
    let layer_count = header.layer_count.get();
    check_dimensions(resolution, layer_count)?;

    let machine_name = layout::read_string(
        buf,
        header.machine_name_offset.get(),
        header.machine_name_len.get(),
        "machine name",
    )?;
    let previews = read_previews(
        buf,
        header.small_preview_offset.get(),
        header.large_preview_offset.get(),
    )?;
    let layer_table =
        read_layer_table(buf, header.layer_table_offset.get(), layer_count, 1)?;

    let layers = decode_layers(
        buf,
        &layer_table,
        &LayerCodec {
            magic,
            key: header.encryption_key.get(),
            width: resolution[0],
            levels: 1,
        },
        resolution,
        options,
    )?;

    Ok(PhzFile {
        header,
        machine_name,
        previews,
        layer_table,
        layers,
    })
}

/// Largest raster accepted for one layer, well above any real projector.
pub const MAX_LAYER_PIXELS: usize = 1 << 28;

fn check_dimensions(resolution: [u32; 2], layer_count: u32) -> Result<()> {
    if resolution[0] == 0 || resolution[1] == 0 {
        return Err(Error::MalformedRecord(format!(
            "resolution {}x{}",
            resolution[0], resolution[1]
        )));
    }
    layer_pixels(resolution)?;
    if layer_count == 0 {
        return Err(Error::MalformedRecord("no layers".to_string()));
    }
    Ok(())
}

/// Pixels in one layer raster, refusing sizes past `MAX_LAYER_PIXELS`.
fn layer_pixels(resolution: [u32; 2]) -> Result<usize> {
    (resolution[0] as usize)
        .checked_mul(resolution[1] as usize)
        .filter(|&n| n <= MAX_LAYER_PIXELS)
        .ok_or_else(|| {
            Error::MalformedRecord(format!(
                "resolution {}x{} too large",
                resolution[0], resolution[1]
            ))
        })
}

fn read_previews(
    buf: &[u8],
    small_offset: u32,
    large_offset: u32,
) -> Result<[Option<Preview>; 2]> {
    let read = |offset, what| match offset {
        0 => Ok(None),
        offset => Preview::read(buf, offset, what).map(Some),
    };
    Ok([
        read(small_offset, "small preview")?,
        read(large_offset, "large preview")?,
    ])
}

fn read_layer_table(
    buf: &[u8],
    offset: u32,
    layer_count: u32,
    levels: u32,
) -> Result<LayerTable> {
    let count = layer_count.checked_mul(levels).ok_or_else(|| {
        Error::MalformedRecord(format!(
            "{} layers x {} levels",
            layer_count, levels
        ))
    })?;
    let records =
        layout::read_slice::<LayerRecord>(buf, offset, count, "layer table")?;
    log::debug!("layer table at 0x{:x}: {} records", offset, records.len());
    LayerTable::new(records, layer_count, levels)
}

/// How one file's layers are stored.
#[derive(Copy, Clone, Debug)]
pub(crate) struct LayerCodec {
    pub magic: Magic,
    /// Already forced to 0 for formats that never encrypt.
    pub key: u32,
    pub width: u32,
    /// Antialiasing sub-images per layer.
    pub levels: u32,
}

impl LayerCodec {
    /// Rebuilds the raster of layer `index` from its encoded sub-images.
    pub fn decode(
        &self,
        index: u32,
        blobs: &[&[u8]],
        pixels: &mut [u8],
        strict: bool,
    ) -> std::result::Result<(), rle::RleError> {
        match self.magic {
            Magic::CBDDLP => {
                for blob in blobs {
                    rle::decode_rle1(blob, pixels, strict)?;
                }
                let levels = self.levels.max(1);
                for p in pixels.iter_mut() {
                    let marks = u32::from(*p).min(levels);
                    *p = (marks * 255 / levels) as u8;
                }
                Ok(())
            }
            Magic::CTB | Magic::PHZ => {
                let mut data =
                    blobs.first().copied().unwrap_or_default().to_vec();
                if let Some(cipher) = self.magic.cipher().filter(|_| self.key != 0)
                {
                    crypto::crypt(cipher, self.key, index, &mut data);
                }
                if self.magic == Magic::CTB {
                    rle::decode_rle7(&data, pixels, strict)
                } else {
                    rle::decode_rle7a(&data, pixels, strict)
                }
            }
        }
    }
}

/// Borrows every layer's encoded data, then decodes the layers in parallel.
fn decode_layers(
    buf: &[u8],
    table: &LayerTable,
    codec: &LayerCodec,
    resolution: [u32; 2],
    options: &DecodeOptions,
) -> Result<LayerManager> {
    let blobs = table
        .records()
        .iter()
        .map(|r| {
            layout::parse_bytes(
                buf,
                r.data_offset.get(),
                r.data_len.get(),
                "layer data",
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let count = table.layer_count();
    let pixel_count = layer_pixels(resolution)?;
    let layers = par::try_map_range(count as usize, |i| {
        let index = i as u32;
        let mine: Vec<&[u8]> = (0..table.levels())
            .filter_map(|level| table.index_of(index, level))
            .map(|r| blobs[r])
            .collect();
        let mut pixels = vec![0; pixel_count];
        codec
            .decode(index, &mine, &mut pixels, options.strict_rle)
            .map_err(|source| Error::CorruptedRleData {
                layer: index,
                source,
            })?;
        log::trace!("decoded layer {}", index);
        Layer::from_pixels(index, resolution, pixels)
    })?;
    Ok(LayerManager::from_layers(layers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_unsupported() {
        let buf = [0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0];
        assert!(matches!(
            decode(&buf, &DecodeOptions::default()),
            Err(Error::UnsupportedFormat(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn short_file_is_truncated() {
        assert!(matches!(
            decode(&[0x19], &DecodeOptions::default()),
            Err(Error::TruncatedFile { .. })
        ));
        let magic_only = 0x12FD_0086u32.to_le_bytes();
        assert!(matches!(
            decode(&magic_only, &DecodeOptions::default()),
            Err(Error::TruncatedFile { .. })
        ));
    }

    #[test]
    fn huge_resolution_is_malformed() {
        assert!(matches!(
            check_dimensions([65536, 65536], 1),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            check_dimensions([u32::MAX, u32::MAX], 1),
            Err(Error::MalformedRecord(_))
        ));
        assert!(check_dimensions([15120, 6230], 1).is_ok());
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let magic_only = 0x9FDA_83AEu32.to_le_bytes();
        assert!(matches!(
            decode_chitubox(&magic_only, &DecodeOptions::default()),
            Err(Error::UnsupportedFormat(0x9FDA_83AE))
        ));
    }

    #[test]
    fn cbddlp_levels_accumulate() {
        let codec = LayerCodec {
            magic: Magic::CBDDLP,
            key: 0,
            width: 4,
            levels: 3,
        };
        let a: &[u8] = &[0x83, 0x01];
        let b: &[u8] = &[0x82, 0x02];
        let c: &[u8] = &[0x81, 0x03];
        let mut pixels = vec![0; 4];
        codec.decode(0, &[a, b, c], &mut pixels, true).unwrap();
        assert_eq!(pixels, &[255, 170, 85, 0]);
    }

    #[test]
    fn ctb_layers_are_decrypted() {
        let mut data = vec![0xFF, 0x04];
        crypto::crypt(crypto::Cipher::Chitubox, 0x1234, 3, &mut data);
        let codec = LayerCodec {
            magic: Magic::CTB,
            key: 0x1234,
            width: 2,
            levels: 1,
        };
        let mut pixels = vec![0; 4];
        codec.decode(3, &[&data], &mut pixels, true).unwrap();
        assert_eq!(pixels, &[0xFF; 4]);
    }
}
