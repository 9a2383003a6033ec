//! Blur and colour thresholding.
//!
//! Hue/luminance/saturation use the 8-bit convention common to machine
//! vision tooling: hue in 0..=180 (degrees halved), luminance and saturation
//! in 0..=255.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::box_filter;

use super::config::Bounds;

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Box blur with a square `(2 * radius + 1)` kernel, applied per channel.
pub fn blur(image: &RgbImage, radius: u32) -> RgbImage {
    if radius == 0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let channels: Vec<GrayImage> = (0..3)
        .map(|c| {
            let plane = GrayImage::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[c]]));
            box_filter(&plane, radius, radius)
        })
        .collect();
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            channels[0].get_pixel(x, y)[0],
            channels[1].get_pixel(x, y)[0],
            channels[2].get_pixel(x, y)[0],
        ])
    })
}

/// Convert one RGB pixel to `(hue, luminance, saturation)`.
pub fn rgb_to_hls(pixel: Rgb<u8>) -> (u8, u8, u8) {
    let r = f32::from(pixel[0]) / 255.0;
    let g = f32::from(pixel[1]) / 255.0;
    let b = f32::from(pixel[2]) / 255.0;

    let vmax = r.max(g).max(b);
    let vmin = r.min(g).min(b);
    let diff = vmax - vmin;
    let l = (vmax + vmin) / 2.0;

    let (h, s) = if diff <= f32::EPSILON {
        (0.0, 0.0)
    } else {
        let s = if l < 0.5 {
            diff / (vmax + vmin)
        } else {
            diff / (2.0 - vmax - vmin)
        };
        let mut h = if vmax == r {
            60.0 * (g - b) / diff
        } else if vmax == g {
            120.0 + 60.0 * (b - r) / diff
        } else {
            240.0 + 60.0 * (r - g) / diff
        };
        if h < 0.0 {
            h += 360.0;
        }
        (h, s)
    };

    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    (to_u8(h / 2.0), to_u8(l * 255.0), to_u8(s * 255.0))
}

/// Binary mask: a pixel is on iff hue, luminance and saturation all fall
/// inside their bounds.
pub fn threshold_hls(image: &RgbImage, hue: &Bounds, luminance: &Bounds, saturation: &Bounds) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let (h, l, s) = rgb_to_hls(*image.get_pixel(x, y));
        let on = hue.contains(f64::from(h))
            && luminance.contains(f64::from(l))
            && saturation.contains(f64::from(s));
        Luma([if on { MASK_ON } else { MASK_OFF }])
    })
}
