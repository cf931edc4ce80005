//! Detection of printability problems in layer rasters.
//!
//! The main check looks for *islands*: connected regions of a layer that have
//! little or nothing under them in the layer before, and would therefore be
//! printed into thin air. Layer 0 sits on the build plate and never has
//! islands.
//!
//! Regions are 8-connected groups of pixels at level 10 or above. A pixel of
//! the previous layer supports the pixel above it when it is at level 200 or
//! above, or, on a layer stored as `n` thresholded sub-images, when the first
//! sub-image marks it (level `255 / n` or above). A region is fine if it has at least `required_pixels_to_support`
//! supporting pixels, or if it is smaller than that and at least half of it
//! (and at least one pixel) is supported.
//!
//! The detector also reports lit pixels along the image border as a single
//! `TouchingBound` issue, since those usually mean the model was clipped.

use std::collections::{BTreeMap, VecDeque};

use crate::error::Result;
use crate::layer::LayerManager;
use crate::par;

/// Lowest level counted as part of a region.
pub const MIN_PIXEL: u8 = 10;
/// Lowest level that supports a pixel above, or counts as touching a bound.
pub const MIN_SUPPORT_PIXEL: u8 = 200;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IssueKind {
    /// An unsupported connected region.
    Island,
    /// Lit pixels on the image border.
    TouchingBound,
}

/// A problem found on one layer, with the pixels involved as `(x, y)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LayerIssue {
    pub layer_index: u32,
    pub kind: IssueKind,
    pub pixels: Vec<(u32, u32)>,
}

impl LayerIssue {
    /// Number of pixels involved.
    pub fn size(&self) -> usize {
        self.pixels.len()
    }

    /// First pixel of the issue, for display.
    pub fn first_pixel(&self) -> Option<(u32, u32)> {
        self.pixels.first().copied()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IslandDetector {
    /// Supporting pixels that make any region safe. 0 is treated as 1.
    pub required_pixels_to_support: u32,
    /// Thresholded sub-images each layer was stored as. 0 is treated as 1.
    pub sub_images: u32,
}

impl Default for IslandDetector {
    fn default() -> Self {
        Self::new(5)
    }
}

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl IslandDetector {
    pub fn new(required_pixels_to_support: u32) -> Self {
        Self {
            required_pixels_to_support,
            sub_images: 1,
        }
    }

    /// Checks layers decoded from `n` antialiasing sub-images, where the
    /// first sub-image alone decides support.
    pub fn with_sub_images(mut self, n: u32) -> Self {
        self.sub_images = n;
        self
    }

    /// Lowest level that supports a pixel above, or counts as touching a
    /// bound.
    pub fn support_level(&self) -> u8 {
        match self.sub_images {
            0 | 1 => MIN_SUPPORT_PIXEL,
            n => (255 / n).max(1) as u8,
        }
    }

    fn required(&self) -> usize {
        self.required_pixels_to_support.max(1) as usize
    }

    /// Decides whether a region of `size` pixels with `support` supporting
    /// pixels is safe to print.
    pub fn is_supported(&self, size: usize, support: usize) -> bool {
        let required = self.required();
        support >= required
            || (support > 0 && size < required && support >= (size / 2).max(1))
    }

    /// Finds the unsupported regions of `pixels`, a `width` pixel wide raster,
    /// given the raster of the layer below.
    ///
    /// Islands are reported in the order their first pixel appears in a
    /// row-major scan.
    pub fn islands(
        &self,
        layer_index: u32,
        width: u32,
        pixels: &[u8],
        previous: &[u8],
    ) -> Vec<LayerIssue> {
        let w = width as usize;
        if w == 0 || pixels.is_empty() {
            return vec![];
        }
        let h = pixels.len() / w;
        let mut visited = vec![false; pixels.len()];
        let mut queue = VecDeque::new();
        let mut issues = vec![];
        let support_level = self.support_level();

        for start in 0..pixels.len() {
            if visited[start] || pixels[start] < MIN_PIXEL {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            let mut region = vec![];
            let mut support = 0;

            while let Some(i) = queue.pop_front() {
                region.push(((i % w) as u32, (i / w) as u32));
                if previous.get(i).map_or(false, |&p| p >= support_level) {
                    support += 1;
                }
                let (x, y) = ((i % w) as isize, (i / w) as isize);
                for (dx, dy) in NEIGHBORS {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize
                    {
                        continue;
                    }
                    let n = ny as usize * w + nx as usize;
                    if !visited[n] && pixels[n] >= MIN_PIXEL {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                }
            }

            if !self.is_supported(region.len(), support) {
                issues.push(LayerIssue {
                    layer_index,
                    kind: IssueKind::Island,
                    pixels: region,
                });
            }
        }
        issues
    }

    /// Collects lit border pixels of `pixels` into one issue, if there are
    /// any. Each border pixel is listed once: top row, bottom row, then the
    /// left and right columns.
    pub fn touching_bounds(
        &self,
        layer_index: u32,
        width: u32,
        pixels: &[u8],
    ) -> Option<LayerIssue> {
        let w = width as usize;
        if w == 0 || pixels.is_empty() {
            return None;
        }
        let h = pixels.len() / w;
        let level = self.support_level();
        let lit = |x: usize, y: usize| pixels[y * w + x] >= level;

        let mut border = vec![];
        for x in 0..w {
            if lit(x, 0) {
                border.push((x as u32, 0));
            }
            if h > 1 && lit(x, h - 1) {
                border.push((x as u32, (h - 1) as u32));
            }
        }
        for y in 1..h.saturating_sub(1) {
            if lit(0, y) {
                border.push((0, y as u32));
            }
            if w > 1 && lit(w - 1, y) {
                border.push(((w - 1) as u32, y as u32));
            }
        }

        if border.is_empty() {
            None
        } else {
            Some(LayerIssue {
                layer_index,
                kind: IssueKind::TouchingBound,
                pixels: border,
            })
        }
    }

    /// Runs every check on one layer of `manager`.
    pub fn detect(
        &self,
        manager: &LayerManager,
        index: u32,
    ) -> Result<Vec<LayerIssue>> {
        let layer = manager.get(index)?;
        let width = layer.resolution()[0];
        let pixels = layer.pixels();

        let mut issues = match layer.previous(manager) {
            Some(below) => {
                self.islands(index, width, &pixels, &below.pixels())
            }
            None => vec![],
        };
        issues.extend(self.touching_bounds(index, width, &pixels));
        log::trace!("layer {}: {} issues", index, issues.len());
        Ok(issues)
    }

    /// Checks every layer, fanning out over the worker pool. Only layers with
    /// at least one issue appear in the result.
    pub fn scan(
        &self,
        manager: &LayerManager,
    ) -> Result<BTreeMap<u32, Vec<LayerIssue>>> {
        let per_layer = par::try_map_range(manager.len() as usize, |i| {
            self.detect(manager, i as u32)
        })?;
        Ok(per_layer
            .into_iter()
            .enumerate()
            .filter(|(_, issues)| !issues.is_empty())
            .map(|(i, issues)| (i as u32, issues))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    const W: u32 = 16;

    fn raster(lit: &[(u32, u32)]) -> Vec<u8> {
        let mut pixels = vec![0; (W * W) as usize];
        for &(x, y) in lit {
            pixels[(y * W + x) as usize] = 255;
        }
        pixels
    }

    fn block(x0: u32, y0: u32, size: u32) -> Vec<(u32, u32)> {
        (y0..y0 + size)
            .flat_map(|y| (x0..x0 + size).map(move |x| (x, y)))
            .collect()
    }

    #[test]
    fn single_unsupported_pixel_is_an_island() {
        let d = IslandDetector::default();
        let issues = d.islands(1, W, &raster(&[(5, 5)]), &raster(&[]));
        assert_eq!(
            issues,
            vec![LayerIssue {
                layer_index: 1,
                kind: IssueKind::Island,
                pixels: vec![(5, 5)],
            }]
        );
    }

    #[test]
    fn overlapping_block_is_supported() {
        let d = IslandDetector::default();
        let b = raster(&block(4, 4, 8));
        assert!(d.islands(1, W, &b, &b).is_empty());
    }

    #[test]
    fn diagonal_pixels_are_one_region() {
        let d = IslandDetector::default();
        let issues =
            d.islands(1, W, &raster(&[(1, 1), (2, 2), (3, 3)]), &raster(&[]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].size(), 3);
        assert_eq!(issues[0].first_pixel(), Some((1, 1)));
    }

    #[test]
    fn small_region_half_supported() {
        let d = IslandDetector::default();
        let region = [(1, 1), (2, 1), (3, 1), (4, 1)];
        // 4 pixels, 2 supported: at least half of a region smaller than 5.
        let below = raster(&[(1, 1), (2, 1)]);
        assert!(d.islands(1, W, &raster(&region), &below).is_empty());
        // 1 supported isn't enough.
        let below = raster(&[(1, 1)]);
        assert_eq!(d.islands(1, W, &raster(&region), &below).len(), 1);
    }

    #[test]
    fn large_region_needs_required_support() {
        let region = block(0, 0, 4);
        let below = raster(&[(0, 0), (1, 0), (2, 0), (3, 0)]);
        assert_eq!(
            IslandDetector::default()
                .islands(1, W, &raster(&region), &below)
                .len(),
            1
        );
        assert!(IslandDetector::new(4)
            .islands(1, W, &raster(&region), &below)
            .is_empty());
    }

    #[test]
    fn zero_requirement_means_one() {
        let d = IslandDetector::new(0);
        assert!(d.is_supported(100, 1));
        assert!(!d.is_supported(1, 0));
    }

    #[test]
    fn dim_pixels_neither_join_nor_support() {
        let d = IslandDetector::default();
        let mut pixels = raster(&[(1, 1)]);
        pixels[(W + 2) as usize] = 9;
        let mut below = raster(&[]);
        below[(W + 1) as usize] = 199;
        let issues = d.islands(1, W, &pixels, &below);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].pixels, vec![(1, 1)]);
    }

    #[test]
    fn first_sub_image_supports() {
        // Two sub-images: a pixel marked only by the first decodes to 127.
        let mut below = raster(&[]);
        below[(W + 1) as usize] = 127;
        let above = raster(&[(1, 1)]);

        let plain = IslandDetector::default();
        assert_eq!(plain.islands(1, W, &above, &below).len(), 1);

        let d = IslandDetector::default().with_sub_images(2);
        assert_eq!(d.support_level(), 127);
        assert!(d.islands(1, W, &above, &below).is_empty());
        let unset = IslandDetector::new(5).with_sub_images(0);
        assert_eq!(unset.support_level(), MIN_SUPPORT_PIXEL);
    }

    #[test]
    fn border_pixels() {
        let d = IslandDetector::default();
        let pixels = raster(&[(0, 0), (7, 15), (15, 3), (8, 8)]);
        let issue = d.touching_bounds(0, W, &pixels).unwrap();
        assert_eq!(issue.kind, IssueKind::TouchingBound);
        assert_eq!(issue.pixels, vec![(0, 0), (7, 15), (15, 3)]);
        assert!(d.touching_bounds(0, W, &raster(&[(8, 8)])).is_none());
    }

    #[test]
    fn scan_skips_first_layer_islands() {
        let floating = raster(&[(5, 5)]);
        let layers = vec![
            Layer::from_pixels(0, [W, W], floating.clone()).unwrap(),
            Layer::from_pixels(1, [W, W], floating.clone()).unwrap(),
            Layer::from_pixels(2, [W, W], raster(&[(9, 9)])).unwrap(),
        ];
        let manager = LayerManager::from_layers(layers);
        let found = IslandDetector::default().scan(&manager).unwrap();
        // Layer 1 is fully supported by layer 0; layer 2 is not.
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(found[&2][0].pixels, vec![(9, 9)]);
    }
}
