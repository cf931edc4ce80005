//! Writes files in supported formats.
//!
//! Output goes through any `Write + Seek` sink. The file header is written
//! last: we skip over it, lay down everything else while recording where it
//! landed, then seek back and fill in the offsets. The layer table gets the
//! same treatment, since layer data offsets aren't known until the data is
//! written.
//!
//! Layers are compressed (and encrypted, if a key is set) in parallel ahead of
//! the sequential write. Without a key, layers whose encoded data is identical
//! share a single stored blob.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::mem::size_of;

use image::{GrayImage, RgbImage};
use sha1::digest::Output;
use sha1::{Digest, Sha1};
use zerocopy::AsBytes;

use crate::crypto;
use crate::error::{Error, Result};
use crate::file::{ChituboxFile, LayerTable, PhzFile, SliceFile, SliceFormat};
use crate::input::LayerCodec;
use crate::layer::{Layer, LayerManager};
use crate::layout::{
    ChituboxHeader, LayerRecord, PhzHeader, PreviewHeader, PrintParameters,
    SlicerInfo,
};
use crate::model::{Job, LayerConfig, Machine};
use crate::par;
use crate::preview::{Preview, PreviewSize};
use crate::rle;
use crate::{Magic, U32LE};

/// Lowest 8-bit level that sub-image `level` of `levels` marks as on.
///
/// With one level this is the usual midpoint, 128. With more, the thresholds
/// sit halfway between the levels decoding produces, so a decoded file
/// encodes back to the same sub-images.
pub fn antialias_threshold(level: u32, levels: u32) -> u8 {
    let levels = levels.max(1);
    let t = (2 * level + 1) * 255 / (2 * levels) + 1;
    t.min(255) as u8
}

impl LayerCodec {
    /// Compresses one layer raster into its stored sub-images.
    pub fn encode(&self, index: u32, pixels: &[u8]) -> Vec<Vec<u8>> {
        match self.magic {
            Magic::CBDDLP => (0..self.levels.max(1))
                .map(|k| {
                    rle::encode_rle1(
                        pixels,
                        antialias_threshold(k, self.levels),
                    )
                })
                .collect(),
            Magic::CTB | Magic::PHZ => {
                let mut data = if self.magic == Magic::CTB {
                    rle::encode_rle7(pixels)
                } else {
                    rle::encode_rle7a(pixels, self.width as usize)
                };
                if let Some(cipher) = self.magic.cipher().filter(|_| self.key != 0)
                {
                    crypto::crypt(cipher, self.key, index, &mut data);
                }
                vec![data]
            }
        }
    }
}

/// Writes a `cbddlp` or `ctb` file.
pub fn encode_chitubox<W: Write + Seek>(
    file: &ChituboxFile,
    mut out: W,
) -> Result<()> {
    let resolution = file.resolution();
    check_layers(resolution, &file.layers, &file.layer_table)?;
    if file.layer_table.levels() != file.table_levels() {
        return Err(Error::InvalidParameter(format!(
            "layer table has {} levels, antialias level needs {}",
            file.layer_table.levels(),
            file.table_levels()
        )));
    }
    let codec = LayerCodec {
        magic: file.magic,
        key: file.encryption_key(),
        width: resolution[0],
        levels: file.table_levels(),
    };
    let encoded = encode_layers(&file.layers, &codec)?;

    out.seek(SeekFrom::Start(0))?;
    out.seek(SeekFrom::Current(size_of::<ChituboxHeader>() as i64))?;

    let [small_preview_offset, large_preview_offset] =
        write_previews(&file.previews, &mut out)?;

    let mut header = file.header.clone();
    header.magic = U32LE::new(file.magic as u32);

    match &file.print_parameters {
        Some(pp) => {
            let offset = write_record(pp, &mut out)?;
            header.print_params_offset = U32LE::new(offset);
            header.print_params_size =
                U32LE::new(size_of::<PrintParameters>() as u32);
        }
        None => {
            header.print_params_offset = U32LE::new(0);
            header.print_params_size = U32LE::new(0);
        }
    }

    match &file.slicer_info {
        Some(si) => {
            let offset = position(&mut out)?;
            let name_len = u32::try_from(file.machine_name.len())
                .map_err(|_| {
                    Error::InvalidParameter("machine name too long".into())
                })?;
            let mut si = si.clone();
            si.machine_name_offset =
                U32LE::new(offset + size_of::<SlicerInfo>() as u32);
            si.machine_name_len = U32LE::new(name_len);
            write_record(&si, &mut out)?;
            out.write_all(&file.machine_name)?;
            header.slicer_info_offset = U32LE::new(offset);
            header.slicer_info_size =
                U32LE::new(size_of::<SlicerInfo>() as u32 + name_len);
        }
        None => {
            if !file.machine_name.is_empty() {
                log::warn!("no slicer info record, dropping machine name");
            }
            header.slicer_info_offset = U32LE::new(0);
            header.slicer_info_size = U32LE::new(0);
        }
    }

    let table_offset =
        write_layer_data(&file.layer_table, &encoded, codec.key, &mut out)?;
    header.layer_table_offset = U32LE::new(table_offset);
    header.layer_count = U32LE::new(file.layers.len());
    header.small_preview_offset = U32LE::new(small_preview_offset);
    header.large_preview_offset = U32LE::new(large_preview_offset);

    out.seek(SeekFrom::Start(0))?;
    out.write_all(header.as_bytes())?;
    out.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Writes a `phz` file.
pub fn encode_phz<W: Write + Seek>(file: &PhzFile, mut out: W) -> Result<()> {
    let resolution = file.resolution();
    check_layers(resolution, &file.layers, &file.layer_table)?;
    if file.layer_table.levels() != 1 {
        return Err(Error::InvalidParameter(
            "phz layer table must have a single level".into(),
        ));
    }
    let codec = LayerCodec {
        magic: Magic::PHZ,
        key: file.encryption_key(),
        width: resolution[0],
        levels: 1,
    };
    let encoded = encode_layers(&file.layers, &codec)?;

    out.seek(SeekFrom::Start(0))?;
    out.seek(SeekFrom::Current(size_of::<PhzHeader>() as i64))?;

    let [small_preview_offset, large_preview_offset] =
        write_previews(&file.previews, &mut out)?;

    let mut header = file.header.clone();
    header.magic = U32LE::new(Magic::PHZ as u32);

    let name_offset = position(&mut out)?;
    let name_len = u32::try_from(file.machine_name.len())
        .map_err(|_| Error::InvalidParameter("machine name too long".into()))?;
    out.write_all(&file.machine_name)?;
    header.machine_name_offset =
        U32LE::new(if name_len == 0 { 0 } else { name_offset });
    header.machine_name_len = U32LE::new(name_len);

    let table_offset =
        write_layer_data(&file.layer_table, &encoded, codec.key, &mut out)?;
    header.layer_table_offset = U32LE::new(table_offset);
    header.layer_count = U32LE::new(file.layers.len());
    header.small_preview_offset = U32LE::new(small_preview_offset);
    header.large_preview_offset = U32LE::new(large_preview_offset);

    out.seek(SeekFrom::Start(0))?;
    out.write_all(header.as_bytes())?;
    out.seek(SeekFrom::End(0))?;
    Ok(())
}

fn check_layers(
    resolution: [u32; 2],
    layers: &LayerManager,
    table: &LayerTable,
) -> Result<()> {
    if resolution[0] == 0 || resolution[1] == 0 {
        return Err(Error::InvalidParameter(format!(
            "resolution {}x{}",
            resolution[0], resolution[1]
        )));
    }
    if layers.is_empty() {
        return Err(Error::InvalidParameter("no layers".into()));
    }
    if table.layer_count() != layers.len() {
        return Err(Error::InvalidParameter(format!(
            "layer table describes {} layers, have {}",
            table.layer_count(),
            layers.len()
        )));
    }
    if let Some(layer) = layers.iter().find(|l| l.resolution() != resolution) {
        return Err(Error::InvalidParameter(format!(
            "layer {} is {}x{}, file is {}x{}",
            layer.index(),
            layer.resolution()[0],
            layer.resolution()[1],
            resolution[0],
            resolution[1]
        )));
    }
    Ok(())
}

/// Compresses every layer, one task per layer.
fn encode_layers(
    layers: &LayerManager,
    codec: &LayerCodec,
) -> Result<Vec<Vec<Vec<u8>>>> {
    par::try_map_range(layers.len() as usize, |i| {
        let index = i as u32;
        let pixels = layers.get(index)?.pixels();
        log::trace!("encoding layer {}", index);
        Ok(codec.encode(index, &pixels))
    })
}

/// Current output position as a file offset. Formats only have 32-bit
/// offsets.
fn position(out: &mut impl Seek) -> Result<u32> {
    let pos = out.stream_position()?;
    u32::try_from(pos).map_err(|_| {
        Error::InvalidParameter(format!("offset {} exceeds 4 GiB", pos))
    })
}

fn write_record<W: Write + Seek>(
    record: &impl AsBytes,
    out: &mut W,
) -> Result<u32> {
    let offset = position(out)?;
    out.write_all(record.as_bytes())?;
    Ok(offset)
}

/// Writes both preview slots, small first. Returns their header offsets, 0
/// for an absent or empty slot.
fn write_previews<W: Write + Seek>(
    previews: &[Option<Preview>; 2],
    out: &mut W,
) -> Result<[u32; 2]> {
    let mut offsets = [0; 2];
    for size in PreviewSize::ALL {
        let preview = match &previews[size as usize] {
            Some(p) if !p.is_empty() => p,
            _ => continue,
        };
        let header_offset = position(out)?;
        let header = PreviewHeader {
            data_offset: U32LE::new(
                header_offset + size_of::<PreviewHeader>() as u32,
            ),
            data_len: U32LE::new(preview.data.len() as u32),
            ..preview.header.clone()
        };
        out.write_all(header.as_bytes())?;
        out.write_all(&preview.data)?;
        log::debug!(
            "{:?} preview at 0x{:x}, {} bytes",
            size,
            header_offset,
            preview.data.len()
        );
        offsets[size as usize] = header_offset;
    }
    Ok(offsets)
}

/// Writes the layer table and the layer data after it, returning the table
/// offset. The table is written twice: first as a placeholder, then with the
/// real data offsets once they're known.
///
/// When `key` is 0, identical blobs are stored once. Encrypted blobs are
/// never shared, because the same raster encrypts differently per layer.
fn write_layer_data<W: Write + Seek>(
    table: &LayerTable,
    encoded: &[Vec<Vec<u8>>],
    key: u32,
    out: &mut W,
) -> Result<u32> {
    let table_offset = position(out)?;
    let mut records = table.records().to_vec();
    let table_len = (records.len() * size_of::<LayerRecord>()) as i64;
    out.seek(SeekFrom::Current(table_len))?;

    let mut stored: HashMap<Output<Sha1>, (u32, u32)> = HashMap::new();
    let mut shared = 0;
    for layer in 0..table.layer_count() {
        for level in 0..table.levels() {
            let (r, data) = match (
                table.index_of(layer, level),
                encoded
                    .get(layer as usize)
                    .and_then(|subs| subs.get(level as usize)),
            ) {
                (Some(r), Some(data)) => (r, data),
                _ => {
                    return Err(Error::InvalidParameter(format!(
                        "no data for layer {} level {}",
                        layer, level
                    )))
                }
            };
            let len = u32::try_from(data.len()).map_err(|_| {
                Error::InvalidParameter(format!("layer {} too large", layer))
            })?;

            let hash = if key == 0 { Some(Sha1::digest(data)) } else { None };
            let location = match hash.as_ref().and_then(|h| stored.get(h)) {
                Some(&location) => {
                    shared += 1;
                    location
                }
                None => {
                    let offset = position(out)?;
                    out.write_all(data)?;
                    if let Some(h) = hash {
                        stored.insert(h, (offset, len));
                    }
                    (offset, len)
                }
            };
            records[r].data_offset = U32LE::new(location.0);
            records[r].data_len = U32LE::new(location.1);
        }
    }
    log::debug!(
        "layer table at 0x{:x}: {} records, {} sharing data",
        table_offset,
        records.len(),
        shared
    );

    out.seek(SeekFrom::Start(u64::from(table_offset)))?;
    out.write_all(records.as_slice().as_bytes())?;
    Ok(table_offset)
}

/// Collects information needed to generate a file.
///
/// Everything has a reasonable default except the resolution and the layers,
/// which must be provided.
#[derive(Clone, Debug)]
pub struct Builder {
    magic: Magic,
    version: u32,
    machine: Machine,
    job: Job,
    encryption_key: u32,
    encryption_mode: u32,
    antialias_level: u32,
    software_version: u32,
    mysterious_id: u32,
    previews: [Option<Preview>; 2],
    layers: LayerManager,
}

impl Builder {
    /// Creates a builder for a file with the given flavor.
    pub fn new(magic: Magic) -> Self {
        let encryption_mode = match magic {
            Magic::CBDDLP => 0,
            Magic::CTB => 0xF,
            Magic::PHZ => 0x1C,
        };
        Self {
            magic,
            version: 2,
            machine: Machine::default(),
            job: Job {
                layer_height_mm: 0.05,
                bottom_layer_count: 10,
                retract_speed_mmpm: 300.,
                normal: LayerConfig {
                    exposure_s: 7.,
                    light_off_time_s: 1.,
                    lift_dist_mm: 5.,
                    lift_speed_mmpm: 300.,
                    pwm_level: 255,
                },
                bottom: LayerConfig {
                    exposure_s: 35.,
                    light_off_time_s: 1.,
                    lift_dist_mm: 5.,
                    lift_speed_mmpm: 300.,
                    pwm_level: 255,
                },
                ..Job::default()
            },
            encryption_key: 0,
            encryption_mode,
            antialias_level: 1,
            software_version: 0x0106_0300,
            mysterious_id: 0,
            previews: [None, None],
            layers: LayerManager::default(),
        }
    }

    /// Sets the header version. Version 1 `cbddlp`/`ctb` files have no print
    /// parameter or slicer info records, and so no machine name.
    pub fn version(&mut self, x: u32) -> &mut Self {
        self.version = x;
        self
    }

    /// Replaces all printer properties at once.
    pub fn machine(&mut self, machine: Machine) -> &mut Self {
        self.machine = machine;
        self
    }

    /// Replaces all print settings at once.
    pub fn job(&mut self, job: Job) -> &mut Self {
        self.job = job;
        self
    }

    /// Updates the resolution of the printer, in pixels along `[x, y]`.
    pub fn resolution(&mut self, x: [u32; 2]) -> &mut Self {
        self.machine.resolution = x;
        self
    }

    /// Updates the expected output volume of the printer, measured in
    /// millimeters along the `[x, y, z]` axes.
    pub fn bed_size_mm(&mut self, x: [f32; 3]) -> &mut Self {
        self.machine.bed_size_mm = x;
        self
    }

    pub fn machine_name(&mut self, x: impl Into<Vec<u8>>) -> &mut Self {
        self.machine.machine_name = x.into();
        self
    }

    /// `0` is normal, `1` is `LCD_mirror`.
    pub fn projector_type(&mut self, x: u32) -> &mut Self {
        self.machine.projector_type = x;
        self
    }

    pub fn layer_height_mm(&mut self, x: f32) -> &mut Self {
        self.job.layer_height_mm = x;
        self
    }

    /// Updates the overall printed model height in millimeters.
    pub fn overall_height_mm(&mut self, x: f32) -> &mut Self {
        self.job.overall_height_mm = x;
        self
    }

    pub fn exposure_s(&mut self, x: f32) -> &mut Self {
        self.job.normal.exposure_s = x;
        self
    }

    pub fn bot_exposure_s(&mut self, x: f32) -> &mut Self {
        self.job.bottom.exposure_s = x;
        self
    }

    pub fn light_off_time_s(&mut self, x: f32) -> &mut Self {
        self.job.normal.light_off_time_s = x;
        self
    }

    pub fn bot_light_off_time_s(&mut self, x: f32) -> &mut Self {
        self.job.bottom.light_off_time_s = x;
        self
    }

    /// Updates the number of layers considered to be "bottom."
    pub fn bot_layer_count(&mut self, x: u32) -> &mut Self {
        self.job.bottom_layer_count = x;
        self
    }

    /// Updates the estimate of the print duration, in seconds.
    pub fn print_time_s(&mut self, x: u32) -> &mut Self {
        self.job.print_time_s = x;
        self
    }

    /// Updates the backlight PWM setting for normal layers.
    pub fn pwm_level(&mut self, x: u16) -> &mut Self {
        self.job.normal.pwm_level = x;
        self
    }

    /// Updates the backlight PWM setting for bottom layers.
    pub fn bot_pwm_level(&mut self, x: u16) -> &mut Self {
        self.job.bottom.pwm_level = x;
        self
    }

    /// Updates the lift distance, in millimeters, for the platform to withdraw
    /// after printing a normal layer.
    pub fn lift_dist_mm(&mut self, x: f32) -> &mut Self {
        self.job.normal.lift_dist_mm = x;
        self
    }

    pub fn lift_speed_mmpm(&mut self, x: f32) -> &mut Self {
        self.job.normal.lift_speed_mmpm = x;
        self
    }

    pub fn bot_lift_dist_mm(&mut self, x: f32) -> &mut Self {
        self.job.bottom.lift_dist_mm = x;
        self
    }

    pub fn bot_lift_speed_mmpm(&mut self, x: f32) -> &mut Self {
        self.job.bottom.lift_speed_mmpm = x;
        self
    }

    /// Updates the speed, in millimeters per minute, for the platform to
    /// reapproach the vat after lifting.
    pub fn retract_speed_mmpm(&mut self, x: f32) -> &mut Self {
        self.job.retract_speed_mmpm = x;
        self
    }

    pub fn print_volume_ml(&mut self, x: f32) -> &mut Self {
        self.job.print_volume_ml = x;
        self
    }

    pub fn print_mass_g(&mut self, x: f32) -> &mut Self {
        self.job.print_mass_g = x;
        self
    }

    /// Updates the estimated cost of resin required, in whatever currency unit
    /// the user has currently selected.
    pub fn print_price(&mut self, x: f32) -> &mut Self {
        self.job.print_price = x;
        self
    }

    /// Updates the file-level encryption key.
    ///
    /// This key is not secret; it's recorded right in the file header for all
    /// to see. `0` means no encryption. Ignored for `cbddlp`.
    pub fn encryption_key(&mut self, x: u32) -> &mut Self {
        self.encryption_key = x;
        self
    }

    /// Updates the encryption mode that will be recorded.
    ///
    /// This field is poorly understood; it defaults to whatever the format's
    /// usual slicer writes.
    pub fn encryption_mode(&mut self, x: u32) -> &mut Self {
        self.encryption_mode = x;
        self
    }

    /// Updates the antialiasing level. For `cbddlp` this is also how many
    /// thresholded sub-images get stored per layer.
    pub fn antialias_level(&mut self, x: u32) -> &mut Self {
        self.antialias_level = x.max(1);
        self
    }

    pub fn software_version(&mut self, x: u32) -> &mut Self {
        self.software_version = x;
        self
    }

    pub fn mysterious_id(&mut self, x: u32) -> &mut Self {
        self.mysterious_id = x;
        self
    }

    /// Encodes `image` into the given preview slot.
    pub fn preview(&mut self, size: PreviewSize, image: &RgbImage) -> &mut Self {
        self.previews[size as usize] =
            Some(Preview::from_image(image, self.magic.preview_max_run()));
        self
    }

    /// Appends a layer.
    pub fn layer(&mut self, image: GrayImage) -> &mut Self {
        self.layers.push(Layer::from_image(0, image));
        self
    }

    /// Replaces all layers.
    pub fn layers(&mut self, layers: LayerManager) -> &mut Self {
        self.layers = layers;
        self
    }

    /// Assembles a file from the information provided to the builder. The
    /// layer table is generated from the print settings.
    pub fn build(&self) -> Result<SliceFile> {
        let [w, h] = self.machine.resolution;
        if w == 0 || h == 0 {
            return Err(Error::InvalidParameter(format!(
                "resolution {}x{}",
                w, h
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidParameter("no layers".into()));
        }
        let count = self.layers.len();

        let mut file = match self.magic {
            Magic::CBDDLP | Magic::CTB => {
                let key = if self.magic.supports_encryption() {
                    self.encryption_key
                } else {
                    0
                };
                let header = ChituboxHeader {
                    magic: U32LE::new(self.magic as u32),
                    version: U32LE::new(self.version),
                    antialias_level: U32LE::new(self.antialias_level),
                    encryption_key: U32LE::new(key),
                    ..ChituboxHeader::default()
                };
                let has_extras = self.version >= 2;
                let slicer_info = SlicerInfo {
                    encryption_mode: U32LE::new(self.encryption_mode),
                    mysterious_id: U32LE::new(self.mysterious_id),
                    antialias_level: U32LE::new(self.antialias_level),
                    software_version: U32LE::new(self.software_version),
                    ..SlicerInfo::default()
                };
                SliceFile::Chitubox(ChituboxFile {
                    magic: self.magic,
                    header,
                    print_parameters: has_extras
                        .then(PrintParameters::default),
                    slicer_info: has_extras.then_some(slicer_info),
                    machine_name: vec![],
                    previews: self.previews.clone(),
                    layer_table: LayerTable::default(),
                    layers: self.layers.clone(),
                })
            }
            Magic::PHZ => {
                let header = PhzHeader {
                    magic: U32LE::new(Magic::PHZ as u32),
                    version: U32LE::new(self.version),
                    antialias_level: U32LE::new(self.antialias_level),
                    antialias_level_again: U32LE::new(self.antialias_level),
                    encryption_key: U32LE::new(self.encryption_key),
                    encryption_mode: U32LE::new(self.encryption_mode),
                    mysterious_id: U32LE::new(self.mysterious_id),
                    software_version: U32LE::new(self.software_version),
                    ..PhzHeader::default()
                };
                SliceFile::Phz(PhzFile {
                    header,
                    machine_name: vec![],
                    previews: self.previews.clone(),
                    layer_table: LayerTable::default(),
                    layers: self.layers.clone(),
                })
            }
        };
        file.set_machine(&self.machine);
        file.set_job(&self.job);

        let levels = match &file {
            SliceFile::Chitubox(f) => f.table_levels(),
            SliceFile::Phz(_) => 1,
        };
        *file.layer_table_mut() = LayerTable::generate(&self.job, count, levels);
        log::debug!(
            "built {:?}: {} layers, {} levels",
            self.magic,
            count,
            levels
        );
        Ok(file)
    }

    /// Builds the file and writes it thru `out`.
    pub fn write(&self, out: impl Write + Seek) -> Result<()> {
        self.build()?.encode(out)
    }
}
