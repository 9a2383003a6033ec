//! Frame buffers and operator overlays.
//!
//! - `Frame`: RGB pixel buffer plus capture sequence number.
//! - Overlays drawn on the streamed copy only: FPS readout and a centred crosshair.
//!
//! A `Frame` is owned by exactly one stage at a time. Stages that need to keep
//! pixels beyond their call (the stream dispatcher) take their own copy.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

const CROSSHAIR_HALF_LEN: i32 = 8;
const CROSSHAIR_THICKNESS: u32 = 2;
const TEXT_ORIGIN: (i32, i32) = (5, 5);

/// One captured (or derived) image.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
            sequence: 0,
        }
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Capture order assigned by the camera that filled this buffer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Reshape the buffer for a capture of the given size, keeping the
    /// allocation when it already fits.
    pub fn reshape(&mut self, width: u32, height: u32, sequence: u64) {
        if self.width() != width || self.height() != height {
            self.image = RgbImage::new(width, height);
        }
        self.sequence = sequence;
    }

    /// Overwrite this buffer with `image`, reallocating only when the
    /// dimensions change.
    pub fn fill_from(&mut self, image: &RgbImage, sequence: u64) {
        self.reshape(image.width(), image.height(), sequence);
        self.image.copy_from_slice(image.as_raw());
    }

    /// Resize to `width`x`height`. Returns `self` untouched when already that size.
    pub fn resized(self, width: u32, height: u32) -> Frame {
        if width == 0 || height == 0 || (self.width() == width && self.height() == height) {
            return self;
        }
        let image = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Frame {
            image,
            sequence: self.sequence,
        }
    }
}

/// Format an FPS value with at most one decimal and no trailing zero
/// ("30", "12.3").
pub fn format_fps(fps: f64) -> String {
    if !fps.is_finite() || fps < 0.0 {
        return "0".to_string();
    }
    let tenths = (fps * 10.0).round() / 10.0;
    if tenths.fract() == 0.0 {
        format!("{:.0}", tenths)
    } else {
        format!("{:.1}", tenths)
    }
}

/// Draw `"<fps> FPS"` in the top-left corner.
pub fn draw_fps_overlay(frame: &mut Frame, fps: f64) {
    let text = format!("{} FPS", format_fps(fps));
    draw_text(frame.image_mut(), TEXT_ORIGIN, &text, GREEN);
}

/// Draw a crosshair at the frame centre.
pub fn draw_crosshair(frame: &mut Frame) {
    let cx = frame.width() as i32 / 2;
    let cy = frame.height() as i32 / 2;
    let half_thick = CROSSHAIR_THICKNESS as i32 / 2;
    let length = (CROSSHAIR_HALF_LEN * 2) as u32;
    let image = frame.image_mut();
    draw_filled_rect_mut(
        image,
        Rect::at(cx - half_thick, cy - CROSSHAIR_HALF_LEN).of_size(CROSSHAIR_THICKNESS, length),
        GREEN,
    );
    draw_filled_rect_mut(
        image,
        Rect::at(cx - CROSSHAIR_HALF_LEN, cy - half_thick).of_size(length, CROSSHAIR_THICKNESS),
        GREEN,
    );
}

// ----------------------------------------------------------------------------
// Tiny bitmap font
// ----------------------------------------------------------------------------

// 3x5 glyphs, one row per entry, bit 2 is the leftmost column.
const GLYPH_W: i32 = 3;

fn glyph(c: char) -> Option<[u8; 5]> {
    let rows = match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        ' ' => [0; 5],
        _ => return None,
    };
    Some(rows)
}

fn draw_text(image: &mut RgbImage, origin: (i32, i32), text: &str, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let mut pen_x = origin.0;
    for c in text.chars() {
        let Some(rows) = glyph(c) else {
            pen_x += GLYPH_W + 1;
            continue;
        };
        for (dy, row) in rows.iter().enumerate() {
            for dx in 0..GLYPH_W {
                if row & (0b100 >> dx) == 0 {
                    continue;
                }
                let x = pen_x + dx;
                let y = origin.1 + dy as i32;
                if x >= 0 && y >= 0 && x < width && y < height {
                    image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
        pen_x += GLYPH_W + 1;
    }
}
