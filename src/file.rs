//! Decoded slice files.
//!
//! The three supported formats come in two shapes. `ChituboxFile` covers
//! `cbddlp` and `ctb`, which share a header layout; `PhzFile` covers `phz`.
//! `SliceFile` wraps either one, and `SliceFormat` is the interface they have
//! in common.
//!
//! Decoded files keep every record they were read from. Encoding recomputes
//! offsets and lengths but leaves all other fields alone, so a file that is
//! decoded and encoded again without changes comes out byte-for-byte the same
//! (as long as it was written the way this crate writes files).

use std::fs;
use std::io::{self, Seek, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::input::{self, DecodeOptions};
use crate::layer::LayerManager;
use crate::layout::{
    ChituboxHeader, LayerRecord, PhzHeader, PrintParameters, SlicerInfo,
};
use crate::model::{Job, LayerConfig, Machine};
use crate::output::{self, Builder};
use crate::preview::{Preview, PreviewSize};
use crate::{Magic, F32LE, U16LE, U32LE};

/// Per-layer records, indexed by `(layer, level)`.
///
/// Every file has one level except antialiased `cbddlp` files, which repeat
/// the whole table once per antialiasing level. Records are stored grouped by
/// level: all of level 0, then all of level 1, and so on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerTable {
    records: Vec<LayerRecord>,
    layer_count: u32,
    levels: u32,
}

impl LayerTable {
    /// Wraps `records`, which must hold exactly `layer_count * levels` entries.
    pub fn new(
        records: Vec<LayerRecord>,
        layer_count: u32,
        levels: u32,
    ) -> Result<Self> {
        if records.len() as u64 != u64::from(layer_count) * u64::from(levels) {
            return Err(Error::MalformedRecord(format!(
                "layer table has {} records, expected {} layers x {} levels",
                records.len(),
                layer_count,
                levels
            )));
        }
        Ok(Self {
            records,
            layer_count,
            levels,
        })
    }

    /// Generates a table from print settings: layer `i` sits at
    /// `i * layer_height`, and bottom layers get the bottom exposure and
    /// light-off time.
    pub fn generate(job: &Job, layer_count: u32, levels: u32) -> Self {
        let levels = levels.max(1);
        let records = (0..levels)
            .flat_map(|_| 0..layer_count)
            .map(|i| {
                let config = job.config_for(i);
                LayerRecord {
                    z_mm: F32LE::new(job.z_for(i)),
                    exposure_s: F32LE::new(config.exposure_s),
                    light_off_time_s: F32LE::new(config.light_off_time_s),
                    ..LayerRecord::default()
                }
            })
            .collect();
        Self {
            records,
            layer_count,
            levels,
        }
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    /// Number of antialiasing levels, at least 1.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Position of the `(layer, level)` record in file order.
    pub fn index_of(&self, layer: u32, level: u32) -> Option<usize> {
        if layer < self.layer_count && level < self.levels {
            Some(level as usize * self.layer_count as usize + layer as usize)
        } else {
            None
        }
    }

    pub fn get(&self, layer: u32, level: u32) -> Option<&LayerRecord> {
        self.index_of(layer, level).map(|i| &self.records[i])
    }

    pub fn get_mut(&mut self, layer: u32, level: u32) -> Option<&mut LayerRecord> {
        self.index_of(layer, level).map(move |i| &mut self.records[i])
    }

    /// All records in file order.
    pub fn records(&self) -> &[LayerRecord] {
        &self.records
    }
}

/// Operations every container supports.
pub trait SliceFormat {
    /// Parses a complete file image.
    fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Self>
    where
        Self: Sized;

    /// Writes the file. Offsets in the stored records are recomputed; nothing
    /// else is changed.
    fn encode<W: Write + Seek>(&self, out: W) -> Result<()>;

    fn magic(&self) -> Magic;

    /// LCD resolution in pixels, `[x, y]`.
    fn resolution(&self) -> [u32; 2];

    fn layer_count(&self) -> u32 {
        self.layers().len()
    }

    /// Antialiasing level recorded in the header, at least 1.
    fn antialias_level(&self) -> u32;

    /// Key the layer data is scrambled with, 0 if it isn't.
    fn encryption_key(&self) -> u32;

    fn machine(&self) -> Machine;
    fn set_machine(&mut self, machine: &Machine);

    fn job(&self) -> Job;
    fn set_job(&mut self, job: &Job);

    fn previews(&self) -> &[Option<Preview>; 2];
    fn previews_mut(&mut self) -> &mut [Option<Preview>; 2];

    fn preview(&self, size: PreviewSize) -> Option<&Preview> {
        self.previews()[size as usize].as_ref()
    }

    fn layer_table(&self) -> &LayerTable;
    fn layer_table_mut(&mut self) -> &mut LayerTable;

    fn layers(&self) -> &LayerManager;
    fn layers_mut(&mut self) -> &mut LayerManager;

    /// Regenerates the layer table from the current settings and layer count.
    /// Use this after changing settings or adding layers.
    fn rebuild_layer_table(&mut self) {
        let levels = self.layer_table().levels();
        let table = LayerTable::generate(&self.job(), self.layer_count(), levels);
        *self.layer_table_mut() = table;
    }

    /// Encodes the file into memory.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = io::Cursor::new(vec![]);
        self.encode(&mut out)?;
        Ok(out.into_inner())
    }
}

/// A `cbddlp` or `ctb` file.
#[derive(Clone, Debug, PartialEq)]
pub struct ChituboxFile {
    /// Either `CBDDLP` or `CTB`. Written over the header's magic on output.
    pub magic: Magic,
    pub header: ChituboxHeader,
    /// Absent in version 1 files.
    pub print_parameters: Option<PrintParameters>,
    /// Absent in version 1 files. The machine name is only stored when this
    /// is present.
    pub slicer_info: Option<SlicerInfo>,
    pub machine_name: Vec<u8>,
    pub previews: [Option<Preview>; 2],
    pub layer_table: LayerTable,
    pub layers: LayerManager,
}

impl ChituboxFile {
    /// Antialiasing levels actually stored as separate sub-images. Only
    /// `cbddlp` does this.
    pub fn table_levels(&self) -> u32 {
        match self.magic {
            Magic::CBDDLP => self.antialias_level(),
            _ => 1,
        }
    }

    /// Changes the antialiasing level. For `cbddlp` this changes how many
    /// sub-images are stored per layer, so the layer table is regenerated.
    pub fn set_antialias_level(&mut self, level: u32) {
        let level = level.max(1);
        self.header.antialias_level = U32LE::new(level);
        if let Some(si) = &mut self.slicer_info {
            si.antialias_level = U32LE::new(level);
        }
        if self.table_levels() != self.layer_table.levels() {
            self.layer_table = LayerTable::generate(
                &self.job(),
                self.layer_count(),
                self.table_levels(),
            );
        }
    }

    /// Sets the key used to scramble layer data on output. Ignored by
    /// `cbddlp`, which is never encrypted.
    pub fn set_encryption_key(&mut self, key: u32) {
        self.header.encryption_key = U32LE::new(key);
    }
}

impl SliceFormat for ChituboxFile {
    fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Self> {
        input::decode_chitubox(buf, options)
    }

    fn encode<W: Write + Seek>(&self, out: W) -> Result<()> {
        output::encode_chitubox(self, out)
    }

    fn magic(&self) -> Magic {
        self.magic
    }

    fn resolution(&self) -> [u32; 2] {
        [
            self.header.resolution[0].get(),
            self.header.resolution[1].get(),
        ]
    }

    fn antialias_level(&self) -> u32 {
        if self.header.version.get() == 1 {
            1
        } else {
            self.header.antialias_level.get().max(1)
        }
    }

    fn encryption_key(&self) -> u32 {
        if self.magic.supports_encryption() {
            self.header.encryption_key.get()
        } else {
            0
        }
    }

    fn machine(&self) -> Machine {
        let h = &self.header;
        Machine {
            resolution: self.resolution(),
            bed_size_mm: [
                h.bed_size_mm[0].get(),
                h.bed_size_mm[1].get(),
                h.bed_size_mm[2].get(),
            ],
            machine_name: self.machine_name.clone(),
            projector_type: h.projector_type.get(),
        }
    }

    fn set_machine(&mut self, machine: &Machine) {
        let h = &mut self.header;
        h.resolution = machine.resolution.map(U32LE::new);
        h.bed_size_mm = machine.bed_size_mm.map(F32LE::new);
        h.projector_type = U32LE::new(machine.projector_type);
        self.machine_name = machine.machine_name.clone();
    }

    fn job(&self) -> Job {
        let h = &self.header;
        let pp = self.print_parameters.clone().unwrap_or_default();
        let has_pp = self.print_parameters.is_some();
        let light_off = h.light_off_time_s.get();
        Job {
            layer_height_mm: h.layer_height_mm.get(),
            overall_height_mm: h.overall_height_mm.get(),
            bottom_layer_count: h.bot_layer_count.get(),
            print_time_s: h.print_time_s.get(),
            retract_speed_mmpm: pp.retract_speed_mmpm.get(),
            print_volume_ml: pp.print_volume_ml.get(),
            print_mass_g: pp.print_mass_g.get(),
            print_price: pp.print_price.get(),
            normal: LayerConfig {
                exposure_s: h.exposure_s.get(),
                light_off_time_s: if has_pp {
                    pp.light_off_time_s.get()
                } else {
                    light_off
                },
                lift_dist_mm: pp.lift_dist_mm.get(),
                lift_speed_mmpm: pp.lift_speed_mmpm.get(),
                pwm_level: h.pwm_level.get(),
            },
            bottom: LayerConfig {
                exposure_s: h.bot_exposure_s.get(),
                light_off_time_s: if has_pp {
                    pp.bot_light_off_time_s.get()
                } else {
                    light_off
                },
                lift_dist_mm: pp.bot_lift_dist_mm.get(),
                lift_speed_mmpm: pp.bot_lift_speed_mmpm.get(),
                pwm_level: h.bot_pwm_level.get(),
            },
        }
    }

    fn set_job(&mut self, job: &Job) {
        let h = &mut self.header;
        h.layer_height_mm = F32LE::new(job.layer_height_mm);
        h.overall_height_mm = F32LE::new(job.overall_height_mm);
        h.bot_layer_count = U32LE::new(job.bottom_layer_count);
        h.print_time_s = U32LE::new(job.print_time_s);
        h.exposure_s = F32LE::new(job.normal.exposure_s);
        h.bot_exposure_s = F32LE::new(job.bottom.exposure_s);
        h.light_off_time_s = F32LE::new(job.normal.light_off_time_s);
        h.pwm_level = U16LE::new(job.normal.pwm_level);
        h.bot_pwm_level = U16LE::new(job.bottom.pwm_level);
        if let Some(pp) = &mut self.print_parameters {
            pp.bot_lift_dist_mm = F32LE::new(job.bottom.lift_dist_mm);
            pp.bot_lift_speed_mmpm = F32LE::new(job.bottom.lift_speed_mmpm);
            pp.lift_dist_mm = F32LE::new(job.normal.lift_dist_mm);
            pp.lift_speed_mmpm = F32LE::new(job.normal.lift_speed_mmpm);
            pp.retract_speed_mmpm = F32LE::new(job.retract_speed_mmpm);
            pp.print_volume_ml = F32LE::new(job.print_volume_ml);
            pp.print_mass_g = F32LE::new(job.print_mass_g);
            pp.print_price = F32LE::new(job.print_price);
            pp.bot_light_off_time_s = F32LE::new(job.bottom.light_off_time_s);
            pp.light_off_time_s = F32LE::new(job.normal.light_off_time_s);
            pp.bot_layer_count = U32LE::new(job.bottom_layer_count);
        }
    }

    fn previews(&self) -> &[Option<Preview>; 2] {
        &self.previews
    }

    fn previews_mut(&mut self) -> &mut [Option<Preview>; 2] {
        &mut self.previews
    }

    fn layer_table(&self) -> &LayerTable {
        &self.layer_table
    }

    fn layer_table_mut(&mut self) -> &mut LayerTable {
        &mut self.layer_table
    }

    fn layers(&self) -> &LayerManager {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut LayerManager {
        &mut self.layers
    }
}

/// A `phz` file.
#[derive(Clone, Debug, PartialEq)]
pub struct PhzFile {
    pub header: PhzHeader,
    pub machine_name: Vec<u8>,
    pub previews: [Option<Preview>; 2],
    pub layer_table: LayerTable,
    pub layers: LayerManager,
}

impl PhzFile {
    /// Sets the key used to scramble layer data on output.
    pub fn set_encryption_key(&mut self, key: u32) {
        self.header.encryption_key = U32LE::new(key);
    }
}

impl SliceFormat for PhzFile {
    fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Self> {
        input::decode_phz(buf, options)
    }

    fn encode<W: Write + Seek>(&self, out: W) -> Result<()> {
        output::encode_phz(self, out)
    }

    fn magic(&self) -> Magic {
        Magic::PHZ
    }

    fn resolution(&self) -> [u32; 2] {
        [
            self.header.resolution[0].get(),
            self.header.resolution[1].get(),
        ]
    }

    fn antialias_level(&self) -> u32 {
        self.header.antialias_level.get().max(1)
    }

    fn encryption_key(&self) -> u32 {
        self.header.encryption_key.get()
    }

    fn machine(&self) -> Machine {
        let h = &self.header;
        Machine {
            resolution: self.resolution(),
            bed_size_mm: [
                h.bed_size_mm[0].get(),
                h.bed_size_mm[1].get(),
                h.bed_size_mm[2].get(),
            ],
            machine_name: self.machine_name.clone(),
            projector_type: h.projector_type.get(),
        }
    }

    fn set_machine(&mut self, machine: &Machine) {
        let h = &mut self.header;
        h.resolution = machine.resolution.map(U32LE::new);
        h.bed_size_mm = machine.bed_size_mm.map(F32LE::new);
        h.projector_type = U32LE::new(machine.projector_type);
        self.machine_name = machine.machine_name.clone();
    }

    fn job(&self) -> Job {
        let h = &self.header;
        Job {
            layer_height_mm: h.layer_height_mm.get(),
            overall_height_mm: h.overall_height_mm.get(),
            bottom_layer_count: h.bot_layer_count.get(),
            print_time_s: h.print_time_s.get(),
            retract_speed_mmpm: h.retract_speed_mmpm.get(),
            print_volume_ml: h.print_volume_ml.get(),
            print_mass_g: h.print_mass_g.get(),
            print_price: h.print_price.get(),
            normal: LayerConfig {
                exposure_s: h.exposure_s.get(),
                light_off_time_s: h.light_off_time_s.get(),
                lift_dist_mm: h.lift_dist_mm.get(),
                lift_speed_mmpm: h.lift_speed_mmpm.get(),
                pwm_level: h.pwm_level.get(),
            },
            bottom: LayerConfig {
                exposure_s: h.bot_exposure_s.get(),
                light_off_time_s: h.bot_light_off_time_s.get(),
                lift_dist_mm: h.bot_lift_dist_mm.get(),
                lift_speed_mmpm: h.bot_lift_speed_mmpm.get(),
                pwm_level: h.bot_pwm_level.get(),
            },
        }
    }

    fn set_job(&mut self, job: &Job) {
        let h = &mut self.header;
        h.layer_height_mm = F32LE::new(job.layer_height_mm);
        h.overall_height_mm = F32LE::new(job.overall_height_mm);
        h.bot_layer_count = U32LE::new(job.bottom_layer_count);
        h.bot_layer_count_again = U32LE::new(job.bottom_layer_count);
        h.print_time_s = U32LE::new(job.print_time_s);
        h.retract_speed_mmpm = F32LE::new(job.retract_speed_mmpm);
        h.print_volume_ml = F32LE::new(job.print_volume_ml);
        h.print_mass_g = F32LE::new(job.print_mass_g);
        h.print_price = F32LE::new(job.print_price);
        h.exposure_s = F32LE::new(job.normal.exposure_s);
        h.light_off_time_s = F32LE::new(job.normal.light_off_time_s);
        h.lift_dist_mm = F32LE::new(job.normal.lift_dist_mm);
        h.lift_speed_mmpm = F32LE::new(job.normal.lift_speed_mmpm);
        h.pwm_level = U16LE::new(job.normal.pwm_level);
        h.bot_exposure_s = F32LE::new(job.bottom.exposure_s);
        h.bot_light_off_time_s = F32LE::new(job.bottom.light_off_time_s);
        h.bot_lift_dist_mm = F32LE::new(job.bottom.lift_dist_mm);
        h.bot_lift_speed_mmpm = F32LE::new(job.bottom.lift_speed_mmpm);
        h.bot_pwm_level = U16LE::new(job.bottom.pwm_level);
    }

    fn previews(&self) -> &[Option<Preview>; 2] {
        &self.previews
    }

    fn previews_mut(&mut self) -> &mut [Option<Preview>; 2] {
        &mut self.previews
    }

    fn layer_table(&self) -> &LayerTable {
        &self.layer_table
    }

    fn layer_table_mut(&mut self) -> &mut LayerTable {
        &mut self.layer_table
    }

    fn layers(&self) -> &LayerManager {
        &self.layers
    }

    fn layers_mut(&mut self) -> &mut LayerManager {
        &mut self.layers
    }
}

/// Any supported file.
#[derive(Clone, Debug, PartialEq)]
pub enum SliceFile {
    /// `cbddlp` or `ctb`.
    Chitubox(ChituboxFile),
    /// `phz`.
    Phz(PhzFile),
}

macro_rules! each {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            SliceFile::Chitubox($f) => $body,
            SliceFile::Phz($f) => $body,
        }
    };
}

impl SliceFile {
    /// Reads and decodes the file at `path`.
    pub fn open(path: impl AsRef<Path>, options: &DecodeOptions) -> Result<Self> {
        let buf = fs::read(path)?;
        Self::decode(&buf, options)
    }

    /// Encodes the file to `path`, replacing anything already there.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        self.encode(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Sets the key used to scramble layer data on output, where the format
    /// supports it.
    pub fn set_encryption_key(&mut self, key: u32) {
        each!(self, f => f.set_encryption_key(key))
    }

    /// Rebuilds this file in another format, carrying over settings, previews
    /// and layers. The layer table is regenerated from the settings.
    ///
    /// The encryption key carries over when the target format supports one.
    pub fn convert(&self, magic: Magic) -> Result<SliceFile> {
        let mut builder = Builder::new(magic);
        builder
            .machine(self.machine())
            .job(self.job())
            .antialias_level(self.antialias_level())
            .encryption_key(self.encryption_key())
            .layers(self.layers().clone());
        for size in PreviewSize::ALL {
            if let Some(preview) = self.preview(size) {
                builder.preview(size, &preview.to_image(false)?);
            }
        }
        builder.build()
    }
}

impl SliceFormat for SliceFile {
    /// Decodes any supported format, choosing by magic.
    fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Self> {
        input::decode(buf, options)
    }

    fn encode<W: Write + Seek>(&self, out: W) -> Result<()> {
        each!(self, f => f.encode(out))
    }

    fn magic(&self) -> Magic {
        each!(self, f => f.magic())
    }

    fn resolution(&self) -> [u32; 2] {
        each!(self, f => f.resolution())
    }

    fn antialias_level(&self) -> u32 {
        each!(self, f => f.antialias_level())
    }

    fn encryption_key(&self) -> u32 {
        each!(self, f => f.encryption_key())
    }

    fn machine(&self) -> Machine {
        each!(self, f => f.machine())
    }

    fn set_machine(&mut self, machine: &Machine) {
        each!(self, f => f.set_machine(machine))
    }

    fn job(&self) -> Job {
        each!(self, f => f.job())
    }

    fn set_job(&mut self, job: &Job) {
        each!(self, f => f.set_job(job))
    }

    fn previews(&self) -> &[Option<Preview>; 2] {
        each!(self, f => f.previews())
    }

    fn previews_mut(&mut self) -> &mut [Option<Preview>; 2] {
        each!(self, f => f.previews_mut())
    }

    fn layer_table(&self) -> &LayerTable {
        each!(self, f => f.layer_table())
    }

    fn layer_table_mut(&mut self) -> &mut LayerTable {
        each!(self, f => f.layer_table_mut())
    }

    fn layers(&self) -> &LayerManager {
        each!(self, f => f.layers())
    }

    fn layers_mut(&mut self) -> &mut LayerManager {
        each!(self, f => f.layers_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            layer_height_mm: 0.05,
            bottom_layer_count: 2,
            normal: LayerConfig {
                exposure_s: 7.,
                light_off_time_s: 1.,
                ..LayerConfig::default()
            },
            bottom: LayerConfig {
                exposure_s: 50.,
                light_off_time_s: 3.,
                ..LayerConfig::default()
            },
            ..Job::default()
        }
    }

    #[test]
    fn generated_table_is_grouped_by_level() {
        let table = LayerTable::generate(&job(), 3, 2);
        assert_eq!(table.records().len(), 6);
        assert_eq!(table.index_of(1, 1), Some(4));
        assert_eq!(table.index_of(3, 0), None);
        assert_eq!(table.index_of(0, 2), None);
        let rec = table.get(2, 1).unwrap();
        assert_eq!(rec.z_mm.get(), 2. * 0.05);
        assert_eq!(rec.exposure_s.get(), 7.);
        let rec = table.get(1, 0).unwrap();
        assert_eq!(rec.exposure_s.get(), 50.);
        assert_eq!(rec.light_off_time_s.get(), 3.);
    }

    #[test]
    fn table_length_is_checked() {
        let records = vec![LayerRecord::default(); 5];
        assert!(LayerTable::new(records.clone(), 5, 1).is_ok());
        assert!(matches!(
            LayerTable::new(records, 3, 2),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn settings_survive_both_shapes() {
        let mut job = job();
        job.retract_speed_mmpm = 150.;
        job.normal.lift_dist_mm = 6.;
        job.bottom.pwm_level = 200;
        let machine = Machine {
            resolution: [8, 4],
            bed_size_mm: [68., 120., 150.],
            machine_name: b"Photon".to_vec(),
            projector_type: 1,
        };
        for magic in [Magic::CBDDLP, Magic::CTB, Magic::PHZ] {
            let mut builder = Builder::new(magic);
            builder.machine(machine.clone()).job(job.clone());
            builder.layers(LayerManager::new(1, [8, 4]));
            let file = builder.build().unwrap();
            assert_eq!(file.machine(), machine, "{:?}", magic);
            assert_eq!(file.job(), job, "{:?}", magic);
        }
    }
}
