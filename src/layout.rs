//! On-disk record layouts and bounds-checked readers.
//!
//! Every record is a `#[repr(C)]` struct made only of little-endian,
//! alignment-1 fields, so its byte image is exactly its declaration. Reserved
//! words are spelled out as fields; there is no implicit padding anywhere.
//!
//! The header only says *where* records live, never how big they are, so the
//! sizes here are load-bearing. They're pinned by the assertions at the bottom
//! of the file.

use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes, Ref, Unaligned};

use crate::error::{Error, Result};
use crate::{F32LE, U16LE, U32LE};

/// Header used by `cbddlp` and `ctb` files. Always at offset 0.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ChituboxHeader {
    pub magic: U32LE,
    /// Observed values are 1 and 2; version 1 files lack the print parameter
    /// and slicer info records.
    pub version: U32LE,
    /// Printer output volume along `[x, y, z]`.
    pub bed_size_mm: [F32LE; 3],
    pub _reserved_14: [U32LE; 2],
    pub overall_height_mm: F32LE,
    /// Layer height used at slicing. The machine uses the layer table.
    pub layer_height_mm: F32LE,
    pub exposure_s: F32LE,
    pub bot_exposure_s: F32LE,
    pub light_off_time_s: F32LE,
    pub bot_layer_count: U32LE,
    /// Printer resolution in pixels along `[x, y]`. Needed to decode layers.
    pub resolution: [U32LE; 2],
    pub large_preview_offset: U32LE,
    pub layer_table_offset: U32LE,
    /// Printed layers. Antialiased `cbddlp` files have `layer_count *
    /// antialias_level` records in the table.
    pub layer_count: U32LE,
    pub small_preview_offset: U32LE,
    pub print_time_s: U32LE,
    /// 0 for normal projection, 1 for mirrored (LCD printers).
    pub projector_type: U32LE,
    pub print_params_offset: U32LE,
    pub print_params_size: U32LE,
    /// Number of times each layer image is repeated in the file.
    pub antialias_level: U32LE,
    pub pwm_level: U16LE,
    pub bot_pwm_level: U16LE,
    /// Layer data key, or 0 when not encrypted.
    pub encryption_key: U32LE,
    pub slicer_info_offset: U32LE,
    pub slicer_info_size: U32LE,
}

/// Extra print settings in `cbddlp`/`ctb` version 2 files.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct PrintParameters {
    pub bot_lift_dist_mm: F32LE,
    pub bot_lift_speed_mmpm: F32LE,
    pub lift_dist_mm: F32LE,
    pub lift_speed_mmpm: F32LE,
    pub retract_speed_mmpm: F32LE,
    pub print_volume_ml: F32LE,
    pub print_mass_g: F32LE,
    /// In whatever currency the user had configured; the unit isn't stored.
    pub print_price: F32LE,
    pub bot_light_off_time_s: F32LE,
    pub light_off_time_s: F32LE,
    pub bot_layer_count: U32LE,
    pub _reserved_2c: [U32LE; 4],
}

/// Slicer bookkeeping in `cbddlp`/`ctb` version 2 files. On disk it is
/// followed by the machine name, which is not nul-terminated.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SlicerInfo {
    pub _reserved_00: [U32LE; 7],
    pub machine_name_offset: U32LE,
    pub machine_name_len: U32LE,
    /// Poorly understood. 0 or 8 for `cbddlp`, 0xF or 7 for `ctb`.
    pub encryption_mode: U32LE,
    /// Increments with time or number of models sliced. Zeroing it seems
    /// harmless.
    pub mysterious_id: U32LE,
    pub antialias_level: U32LE,
    /// Major, minor, patch in bytes from the MSB down.
    pub software_version: U32LE,
    pub _unknown_34: U32LE,
    pub _reserved_38: [U32LE; 5],
}

/// Describes one of the two RGB15 preview images.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct PreviewHeader {
    pub size: [U32LE; 2],
    pub data_offset: U32LE,
    pub data_len: U32LE,
    pub _reserved_10: [U32LE; 4],
}

/// One entry of the layer table.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct LayerRecord {
    /// Build platform position for this layer.
    pub z_mm: F32LE,
    pub exposure_s: F32LE,
    pub light_off_time_s: F32LE,
    pub data_offset: U32LE,
    pub data_len: U32LE,
    pub _reserved_14: [U32LE; 4],
}

/// The all-in-one `phz` header. Always at offset 0.
#[derive(Clone, Debug, Default, PartialEq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct PhzHeader {
    pub magic: U32LE,
    pub version: U32LE,
    pub layer_height_mm: F32LE,
    pub exposure_s: F32LE,
    pub bot_exposure_s: F32LE,
    pub bot_layer_count: U32LE,
    pub resolution: [U32LE; 2],
    pub large_preview_offset: U32LE,
    pub layer_table_offset: U32LE,
    pub layer_count: U32LE,
    pub small_preview_offset: U32LE,
    pub print_time_s: U32LE,
    pub projector_type: U32LE,
    pub antialias_level: U32LE,
    pub pwm_level: U16LE,
    pub bot_pwm_level: U16LE,
    pub _reserved_40: [U32LE; 2],
    pub overall_height_mm: F32LE,
    pub bed_size_mm: [F32LE; 3],
    pub encryption_key: U32LE,
    pub bot_light_off_time_s: F32LE,
    pub light_off_time_s: F32LE,
    pub bot_layer_count_again: U32LE,
    pub _reserved_68: U32LE,
    pub bot_lift_dist_mm: F32LE,
    pub bot_lift_speed_mmpm: F32LE,
    pub lift_dist_mm: F32LE,
    pub lift_speed_mmpm: F32LE,
    pub retract_speed_mmpm: F32LE,
    pub print_volume_ml: F32LE,
    pub print_mass_g: F32LE,
    pub print_price: F32LE,
    pub _reserved_8c: U32LE,
    pub machine_name_offset: U32LE,
    pub machine_name_len: U32LE,
    pub _reserved_98: [U32LE; 6],
    pub encryption_mode: U32LE,
    pub mysterious_id: U32LE,
    pub antialias_level_again: U32LE,
    pub software_version: U32LE,
    pub _reserved_c0: [U32LE; 6],
}

pub const CHITUBOX_HEADER_SIZE: usize = 112;
pub const PRINT_PARAMETERS_SIZE: usize = 60;
pub const SLICER_INFO_SIZE: usize = 76;
pub const PREVIEW_HEADER_SIZE: usize = 32;
pub const LAYER_RECORD_SIZE: usize = 36;
pub const PHZ_HEADER_SIZE: usize = 216;

const _: () = assert!(size_of::<ChituboxHeader>() == CHITUBOX_HEADER_SIZE);
const _: () = assert!(size_of::<PrintParameters>() == PRINT_PARAMETERS_SIZE);
const _: () = assert!(size_of::<SlicerInfo>() == SLICER_INFO_SIZE);
const _: () = assert!(size_of::<PreviewHeader>() == PREVIEW_HEADER_SIZE);
const _: () = assert!(size_of::<LayerRecord>() == LAYER_RECORD_SIZE);
const _: () = assert!(size_of::<PhzHeader>() == PHZ_HEADER_SIZE);

/// Borrows `len` bytes at `offset`, or fails if the file isn't that long.
pub fn parse_bytes<'a>(
    buf: &'a [u8],
    offset: u32,
    len: u32,
    what: &'static str,
) -> Result<&'a [u8]> {
    let start = offset as usize;
    let end = start.checked_add(len as usize);
    match end {
        Some(end) if end <= buf.len() => Ok(&buf[start..end]),
        _ => Err(Error::TruncatedFile {
            what,
            offset: u64::from(offset),
            len: u64::from(len),
            file_len: buf.len() as u64,
        }),
    }
}

/// Copies a fixed-size record out of the file image.
pub fn read_record<T: FromBytes>(
    buf: &[u8],
    offset: u32,
    what: &'static str,
) -> Result<T> {
    let bytes = parse_bytes(buf, offset, size_of::<T>() as u32, what)?;
    T::read_from(bytes).ok_or_else(|| {
        Error::MalformedRecord(format!("{} does not fit its layout", what))
    })
}

/// Copies `count` consecutive fixed-size records out of the file image.
pub fn read_slice<T: FromBytes + Unaligned + Clone>(
    buf: &[u8],
    offset: u32,
    count: u32,
    what: &'static str,
) -> Result<Vec<T>> {
    let len = (size_of::<T>() as u64) * u64::from(count);
    let len = u32::try_from(len).map_err(|_| {
        Error::MalformedRecord(format!("{} count {} is absurd", what, count))
    })?;
    let bytes = parse_bytes(buf, offset, len, what)?;
    let table = Ref::<_, [T]>::new_slice_unaligned(bytes).ok_or_else(|| {
        Error::MalformedRecord(format!("{} does not fit its layout", what))
    })?;
    Ok(table.into_slice().to_vec())
}

/// Reads a variable-length string run described by an `(offset, len)` pair
/// elsewhere in a record. Unlike other reads, overrunning the file here means
/// the describing record is inconsistent, so it is reported as malformed.
pub fn read_string(
    buf: &[u8],
    offset: u32,
    len: u32,
    what: &'static str,
) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    parse_bytes(buf, offset, len, what)
        .map(<[u8]>::to_vec)
        .map_err(|_| {
            Error::MalformedRecord(format!(
                "{} of {} bytes at offset {} runs past end of file ({} bytes)",
                what,
                len,
                offset,
                buf.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_record_field_offsets() {
        let rec = LayerRecord {
            z_mm: F32LE::new(1.5),
            data_offset: U32LE::new(0x1122_3344),
            data_len: U32LE::new(7),
            ..LayerRecord::default()
        };
        let bytes = rec.as_bytes();
        assert_eq!(&bytes[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[16..20], &[7, 0, 0, 0]);
    }

    #[test]
    fn header_key_lands_after_pwm() {
        let hdr = ChituboxHeader {
            pwm_level: U16LE::new(0xABCD),
            encryption_key: U32LE::new(0xCAFE_F00D),
            ..ChituboxHeader::default()
        };
        let bytes = hdr.as_bytes();
        assert_eq!(&bytes[96..98], &[0xCD, 0xAB]);
        assert_eq!(&bytes[100..104], &0xCAFE_F00Du32.to_le_bytes());
    }

    #[test]
    fn phz_machine_name_fields() {
        let hdr = PhzHeader {
            machine_name_offset: U32LE::new(1),
            machine_name_len: U32LE::new(2),
            software_version: U32LE::new(3),
            ..PhzHeader::default()
        };
        let bytes = hdr.as_bytes();
        assert_eq!(bytes[0x90], 1);
        assert_eq!(bytes[0x94], 2);
        assert_eq!(bytes[0xBC], 3);
    }

    #[test]
    fn reads_are_bounds_checked() {
        let buf = [0u8; 40];
        assert!(read_record::<LayerRecord>(&buf, 0, "layer").is_ok());
        assert!(matches!(
            read_record::<LayerRecord>(&buf, 8, "layer"),
            Err(Error::TruncatedFile { offset: 8, len: 36, .. })
        ));
        assert!(matches!(
            read_slice::<LayerRecord>(&buf, 0, 2, "layer table"),
            Err(Error::TruncatedFile { .. })
        ));
        assert!(matches!(
            parse_bytes(&buf, u32::MAX, 2, "x"),
            Err(Error::TruncatedFile { .. })
        ));
    }

    #[test]
    fn string_overrun_is_malformed() {
        let buf = b"....Photon S";
        assert_eq!(read_string(buf, 4, 8, "name").unwrap(), b"Photon S");
        assert!(read_string(buf, 0, 0, "name").unwrap().is_empty());
        assert!(matches!(
            read_string(buf, 4, 9, "name"),
            Err(Error::MalformedRecord(_))
        ));
    }
}
