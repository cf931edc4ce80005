//! In-memory layer store.
//!
//! A `LayerManager` owns every layer of a file as an 8-bit grayscale raster,
//! one byte per pixel in row-major order. Layers remember their own index so
//! they can find their neighbors through the manager that holds them.

use image::GrayImage;

use crate::error::{Error, Result};

/// One printed slice.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    index: u32,
    resolution: [u32; 2],
    raw: Vec<u8>,
    filename: Option<String>,
    modified: bool,
}

impl Layer {
    /// Creates an all-black layer.
    pub fn blank(index: u32, resolution: [u32; 2]) -> Self {
        let len = resolution[0] as usize * resolution[1] as usize;
        Self {
            index,
            resolution,
            raw: vec![0; len],
            filename: None,
            modified: false,
        }
    }

    /// Wraps an existing raster, which must hold exactly one byte per pixel.
    pub fn from_pixels(
        index: u32,
        resolution: [u32; 2],
        pixels: Vec<u8>,
    ) -> Result<Self> {
        check_len(resolution, pixels.len())?;
        Ok(Self {
            index,
            resolution,
            raw: compress(pixels),
            filename: None,
            modified: false,
        })
    }

    /// Wraps a grayscale image.
    pub fn from_image(index: u32, image: GrayImage) -> Self {
        let resolution = [image.width(), image.height()];
        Self {
            index,
            resolution,
            raw: compress(image.into_raw()),
            filename: None,
            modified: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    /// Name used when exporting this layer, `Layer{index}.png` unless one was
    /// assigned.
    pub fn filename(&self) -> String {
        match &self.filename {
            Some(name) => name.clone(),
            None => format!("Layer{}.png", self.index),
        }
    }

    pub fn set_filename(&mut self, name: impl Into<String>) {
        self.filename = Some(name.into());
    }

    /// The stored bytes, as kept internally.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The layer raster, one byte per pixel.
    pub fn pixels(&self) -> Vec<u8> {
        decompress(&self.raw)
    }

    /// Replaces the raster. The layer is marked modified.
    pub fn set_pixels(&mut self, pixels: Vec<u8>) -> Result<()> {
        check_len(self.resolution, pixels.len())?;
        self.raw = compress(pixels);
        self.modified = true;
        Ok(())
    }

    /// Decodes the raster into an image.
    pub fn image(&self) -> Result<GrayImage> {
        let [w, h] = self.resolution;
        GrayImage::from_raw(w, h, self.pixels()).ok_or_else(|| {
            Error::MalformedRecord(format!(
                "layer {} raster does not match {}x{}",
                self.index, w, h
            ))
        })
    }

    /// Replaces the raster with `image`, which must match the layer's
    /// resolution. The layer is marked modified.
    pub fn set_image(&mut self, image: GrayImage) -> Result<()> {
        if [image.width(), image.height()] != self.resolution {
            return Err(Error::InvalidParameter(format!(
                "image is {}x{}, layer {} is {}x{}",
                image.width(),
                image.height(),
                self.index,
                self.resolution[0],
                self.resolution[1]
            )));
        }
        self.set_pixels(image.into_raw())
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// The layer below this one in `manager`, if any.
    pub fn previous<'m>(&self, manager: &'m LayerManager) -> Option<&'m Layer> {
        self.index.checked_sub(1).and_then(|i| manager.get(i).ok())
    }

    /// The layer above this one in `manager`, if any.
    pub fn next<'m>(&self, manager: &'m LayerManager) -> Option<&'m Layer> {
        self.index.checked_add(1).and_then(|i| manager.get(i).ok())
    }
}

/// Storage transform applied to rasters kept in a `Layer`. Currently the
/// identity.
pub fn compress(pixels: Vec<u8>) -> Vec<u8> {
    pixels
}

/// Inverse of `compress`.
pub fn decompress(raw: &[u8]) -> Vec<u8> {
    raw.to_vec()
}

fn check_len(resolution: [u32; 2], len: usize) -> Result<()> {
    let expected = resolution[0] as usize * resolution[1] as usize;
    if len == expected {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "raster of {} bytes for a {}x{} layer",
            len, resolution[0], resolution[1]
        )))
    }
}

/// Ordered collection of every layer in a file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerManager {
    layers: Vec<Layer>,
}

impl LayerManager {
    /// Creates `count` blank layers of the given resolution.
    pub fn new(count: u32, resolution: [u32; 2]) -> Self {
        Self {
            layers: (0..count).map(|i| Layer::blank(i, resolution)).collect(),
        }
    }

    /// Takes ownership of `layers`, renumbering them by position.
    pub fn from_layers(layers: Vec<Layer>) -> Self {
        let mut manager = Self { layers };
        for (i, layer) in manager.layers.iter_mut().enumerate() {
            layer.index = i as u32;
        }
        manager
    }

    pub fn len(&self) -> u32 {
        self.layers.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: u32) -> Result<&Layer> {
        let count = self.len();
        self.layers
            .get(index as usize)
            .ok_or(Error::LayerIndex { index, count })
    }

    pub fn get_mut(&mut self, index: u32) -> Result<&mut Layer> {
        let count = self.len();
        self.layers
            .get_mut(index as usize)
            .ok_or(Error::LayerIndex { index, count })
    }

    /// Puts `layer` at `index`, replacing whatever was there. The layer takes
    /// on the new index.
    pub fn set(&mut self, index: u32, mut layer: Layer) -> Result<()> {
        let slot = self.get_mut(index)?;
        layer.index = index;
        *slot = layer;
        Ok(())
    }

    /// Appends `layer` after the current last layer, renumbering it to fit.
    pub fn push(&mut self, mut layer: Layer) {
        layer.index = self.len();
        self.layers.push(layer);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// True if any layer has been changed since it was loaded, or since the
    /// last `desmodify`.
    pub fn is_modified(&self) -> bool {
        self.layers.iter().any(Layer::is_modified)
    }

    /// Clears every layer's modified flag.
    pub fn desmodify(&mut self) {
        for layer in &mut self.layers {
            layer.modified = false;
        }
    }

    /// Resolution shared by the layers, taken from the first one.
    pub fn resolution(&self) -> Option<[u32; 2]> {
        self.layers.first().map(Layer::resolution)
    }
}

impl<'a> IntoIterator for &'a LayerManager {
    type Item = &'a Layer;
    type IntoIter = std::slice::Iter<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LayerManager {
        let mut m = LayerManager::new(3, [4, 2]);
        m.desmodify();
        m
    }

    #[test]
    fn set_rewires_index() {
        let mut m = manager();
        let layer = Layer::from_pixels(99, [4, 2], vec![7; 8]).unwrap();
        m.set(1, layer).unwrap();
        assert_eq!(m.get(1).unwrap().index(), 1);
        assert_eq!(m.get(1).unwrap().pixels(), vec![7; 8]);
        assert!(matches!(
            m.set(3, Layer::blank(0, [4, 2])),
            Err(Error::LayerIndex { index: 3, count: 3 })
        ));
    }

    #[test]
    fn modified_tracking() {
        let mut m = manager();
        assert!(!m.is_modified());
        m.get_mut(2).unwrap().set_pixels(vec![1; 8]).unwrap();
        assert!(m.is_modified());
        assert!(m.get(2).unwrap().is_modified());
        assert!(!m.get(1).unwrap().is_modified());
        m.desmodify();
        assert!(!m.is_modified());
    }

    #[test]
    fn wrong_sized_raster_is_rejected() {
        let mut m = manager();
        assert!(m.get_mut(0).unwrap().set_pixels(vec![0; 7]).is_err());
        assert!(!m.is_modified());
        let img = GrayImage::new(2, 4);
        assert!(m.get_mut(0).unwrap().set_image(img).is_err());
    }

    #[test]
    fn clone_is_deep() {
        let m = manager();
        let mut copy = m.clone();
        copy.get_mut(0).unwrap().set_pixels(vec![255; 8]).unwrap();
        assert_eq!(m.get(0).unwrap().pixels(), vec![0; 8]);
        assert_ne!(m, copy);
    }

    #[test]
    fn navigation() {
        let m = manager();
        let middle = m.get(1).unwrap();
        assert_eq!(middle.previous(&m).map(Layer::index), Some(0));
        assert_eq!(middle.next(&m).map(Layer::index), Some(2));
        assert!(m.get(0).unwrap().previous(&m).is_none());
        assert!(m.get(2).unwrap().next(&m).is_none());
    }

    #[test]
    fn push_renumbers() {
        let mut m = manager();
        m.push(Layer::blank(40, [4, 2]));
        assert_eq!(m.len(), 4);
        assert_eq!(m.get(3).unwrap().index(), 3);
    }

    #[test]
    fn default_filename() {
        let mut layer = Layer::blank(12, [1, 1]);
        assert_eq!(layer.filename(), "Layer12.png");
        layer.set_filename("top.png");
        assert_eq!(layer.filename(), "top.png");
    }

    #[test]
    fn image_round_trip() {
        let img = GrayImage::from_fn(4, 2, |x, y| image::Luma([(x + y) as u8]));
        let layer = Layer::from_image(0, img.clone());
        assert_eq!(layer.resolution(), [4, 2]);
        assert_eq!(layer.image().unwrap(), img);
    }
}
