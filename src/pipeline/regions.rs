//! Connected regions of a binary mask.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

use super::config::PipelineConfig;
use super::color::MASK_OFF;

/// Axis-aligned bounding box in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One maximal 8-connected set of mask pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub label: u32,
    pub bbox: BoundingBox,
    pub pixel_count: u64,
}

impl Region {
    /// Bounding-box width over height.
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.bbox.width) / f64::from(self.bbox.height.max(1))
    }

    /// Filled pixels over bounding-box area, in 0..=1.
    pub fn density(&self) -> f64 {
        self.pixel_count as f64 / self.bbox.area().max(1) as f64
    }

    /// Filled pixels over the frame's pixel count.
    pub fn area_fraction(&self, frame_pixels: u64) -> f64 {
        self.pixel_count as f64 / frame_pixels.max(1) as f64
    }
}

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Regions of a mask in first-found (raster) order, plus the label image
/// needed to trace their boundaries.
pub struct RegionMap {
    pub labels: LabelImage,
    pub regions: Vec<Region>,
}

pub fn extract_regions(mask: &GrayImage) -> RegionMap {
    let labels = connected_components(mask, Connectivity::Eight, Luma([MASK_OFF]));

    let mut index: HashMap<u32, usize> = HashMap::new();
    // (min_x, min_y, max_x, max_y, count)
    let mut extents: Vec<(u32, u32, u32, u32, u64)> = Vec::new();
    let mut order: Vec<u32> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        match index.get(&label) {
            Some(&i) => {
                let e = &mut extents[i];
                e.0 = e.0.min(x);
                e.1 = e.1.min(y);
                e.2 = e.2.max(x);
                e.3 = e.3.max(y);
                e.4 += 1;
            }
            None => {
                index.insert(label, extents.len());
                extents.push((x, y, x, y, 1));
                order.push(label);
            }
        }
    }

    let regions = order
        .into_iter()
        .zip(extents)
        .map(|(label, (min_x, min_y, max_x, max_y, count))| Region {
            label,
            bbox: BoundingBox {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            },
            pixel_count: count,
        })
        .collect();

    RegionMap { labels, regions }
}

/// Keep regions whose area fraction, aspect ratio and density all fall inside
/// the configured bounds.
pub fn filter_regions(regions: Vec<Region>, config: &PipelineConfig, frame_pixels: u64) -> Vec<Region> {
    regions
        .into_iter()
        .filter(|region| {
            config.contour_area.contains(region.area_fraction(frame_pixels))
                && config.contour_ratio.contains(region.aspect_ratio())
                && config.contour_density.contains(region.density())
        })
        .collect()
}

/// Largest bounding box first; ties keep first-found order.
pub fn rank_regions(regions: &mut [Region]) {
    regions.sort_by(|a, b| b.bbox.area().cmp(&a.bbox.area()));
}

/// Paint the boundary pixels of `region` onto `canvas`.
pub fn draw_boundary(canvas: &mut RgbImage, labels: &LabelImage, region: &Region, color: Rgb<u8>) {
    let (width, height) = labels.dimensions();
    let label_at = |x: i64, y: i64| -> u32 {
        if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
            0
        } else {
            labels.get_pixel(x as u32, y as u32)[0]
        }
    };
    let b = region.bbox;
    for y in b.y..b.bottom() {
        for x in b.x..b.right() {
            if labels.get_pixel(x, y)[0] != region.label {
                continue;
            }
            let (xi, yi) = (i64::from(x), i64::from(y));
            let edge = [(-1, 0), (1, 0), (0, -1), (0, 1)]
                .iter()
                .any(|(dx, dy)| label_at(xi + dx, yi + dy) != region.label);
            if edge && x < canvas.width() && y < canvas.height() {
                canvas.put_pixel(x, y, color);
            }
        }
    }
}
