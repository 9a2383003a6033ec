use image::{Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use super::color::{blur, threshold_hls};
use super::config::{PipelineConfig, PipelineMode, TargetMode};
use super::geometry::{dual_target, single_target, Quad};
use super::regions::{draw_boundary, extract_regions, filter_regions, rank_regions, Region};
use super::result::DetectionResult;
use super::{CameraControls, FramePipeline};
use crate::camera::{CameraError, CaptureDevice};
use crate::frame::{Frame, BLUE, GREEN, RED};

const BOX_THICKNESS: i32 = 3;

/// Blur, HLS threshold, region filter and target geometry.
pub struct ConfigurablePipeline {
    camera_id: i32,
    controls: CameraControls,
    applied: AppliedSettings,
}

/// Last values pushed to the device; only changes are re-sent.
#[derive(Default)]
struct AppliedSettings {
    brightness: Option<i32>,
    exposure: Option<i32>,
    white_balance: Option<i32>,
}

impl ConfigurablePipeline {
    pub fn new(camera_id: i32, controls: CameraControls) -> Self {
        Self {
            camera_id,
            controls,
            applied: AppliedSettings::default(),
        }
    }

    fn detect(&self, frame: &Frame, config: &PipelineConfig) -> (Frame, DetectionResult) {
        let (width, height) = (frame.width(), frame.height());
        let blurred = blur(frame.image(), config.blur_radius);
        let mask = threshold_hls(&blurred, &config.hue, &config.luminance, &config.saturation);

        let map = extract_regions(&mask);
        let mut survivors = filter_regions(map.regions, config, frame.pixel_count());
        rank_regions(&mut survivors);

        let mut canvas = RgbImage::from_fn(width, height, |x, y| {
            let Luma([v]) = *mask.get_pixel(x, y);
            Rgb([v, v, v])
        });

        let wanted = if config.target_mode.is_dual() { 2 } else { 1 };
        for region in survivors.iter().take(wanted) {
            draw_bbox(&mut canvas, region);
            draw_boundary(&mut canvas, &map.labels, region, RED);
        }

        let mut result = DetectionResult::no_target(self.camera_id);
        let geometry = match (config.target_mode, survivors.as_slice()) {
            (TargetMode::Single, [best, ..]) => Some(single_target(best, (width, height))),
            (TargetMode::DualHorizontal, [a, b, ..]) => {
                let (quad, geometry) = dual_target(a, b, false, (width, height));
                draw_quad(&mut canvas, &quad);
                Some(geometry)
            }
            (TargetMode::DualVertical, [a, b, ..]) => {
                let (quad, geometry) = dual_target(a, b, true, (width, height));
                draw_quad(&mut canvas, &quad);
                Some(geometry)
            }
            _ => None,
        };
        if let Some(g) = geometry {
            result.has_target = true;
            result.x = g.x;
            result.y = g.y;
            result.target_width = g.width;
            result.target_height = g.height;
            result.target_area = g.area;
        }

        (Frame::from_image(canvas, frame.sequence()), result)
    }
}

fn draw_bbox(canvas: &mut RgbImage, region: &Region) {
    let b = region.bbox;
    for inset in 0..BOX_THICKNESS {
        let w = b.width as i32 - 2 * inset;
        let h = b.height as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(b.x as i32 + inset, b.y as i32 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, GREEN);
    }
}

fn draw_quad(canvas: &mut RgbImage, quad: &Quad) {
    let p = |pt: super::geometry::Point| (pt.x as f32, pt.y as f32);
    let corners = [quad.upper_left, quad.upper_right, quad.lower_right, quad.lower_left];
    for i in 0..corners.len() {
        let next = corners[(i + 1) % corners.len()];
        draw_line_segment_mut(canvas, p(corners[i]), p(next), BLUE);
    }
}

impl FramePipeline for ConfigurablePipeline {
    fn name(&self) -> &'static str {
        "configurable"
    }

    fn process(&mut self, frame: &Frame, config: &PipelineConfig) -> (Frame, DetectionResult) {
        match config.pipeline_mode {
            PipelineMode::Driver => (frame.clone(), DetectionResult::no_target(self.camera_id)),
            PipelineMode::Processing => self.detect(frame, config),
        }
    }

    fn update_camera_settings(
        &mut self,
        camera: &mut dyn CaptureDevice,
        config: &PipelineConfig,
    ) -> Result<(), CameraError> {
        if self.applied.brightness != Some(config.brightness) {
            camera.set_brightness(config.brightness)?;
            self.applied.brightness = Some(config.brightness);
        }
        if self.controls.apply_exposure && self.applied.exposure != Some(config.exposure) {
            camera.set_exposure(config.exposure)?;
            self.applied.exposure = Some(config.exposure);
        }
        if self.controls.apply_white_balance
            && self.applied.white_balance != Some(config.white_balance)
        {
            camera.set_white_balance(config.white_balance)?;
            self.applied.white_balance = Some(config.white_balance);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{SyntheticCamera, SyntheticLimits};
    use crate::pipeline::config::Bounds;

    const TARGET: Rgb<u8> = Rgb([40, 230, 60]);

    fn scene(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> Frame {
        let mut image = RgbImage::from_pixel(width, height, Rgb([10, 10, 10]));
        for &(x, y, w, h) in rects {
            for yy in y..y + h {
                for xx in x..x + w {
                    image.put_pixel(xx, yy, TARGET);
                }
            }
        }
        Frame::from_image(image, 7)
    }

    fn processing(target_mode: TargetMode) -> PipelineConfig {
        PipelineConfig {
            pipeline_mode: PipelineMode::Processing,
            target_mode,
            blur_radius: 0,
            hue: Bounds::new(50.0, 70.0),
            luminance: Bounds::new(50.0, 255.0),
            saturation: Bounds::new(100.0, 255.0),
            contour_area: Bounds::new(0.01, 0.5),
            contour_ratio: Bounds::new(0.5, 1.5),
            contour_density: Bounds::new(0.5, 1.0),
            ..PipelineConfig::default()
        }
    }

    fn pipeline() -> ConfigurablePipeline {
        ConfigurablePipeline::new(1, CameraControls::default())
    }

    #[test]
    fn driver_mode_passes_frame_through() {
        let frame = scene(64, 48, &[(10, 10, 10, 10)]);
        let (out, result) = pipeline().process(&frame, &PipelineConfig::default());
        assert_eq!(out.image(), frame.image());
        assert_eq!(result, DetectionResult::no_target(1));
    }

    #[test]
    fn single_rectangle_is_measured() {
        let frame = scene(320, 240, &[(140, 90, 40, 60)]);
        let (out, result) = pipeline().process(&frame, &processing(TargetMode::Single));
        assert!(result.has_target);
        assert_eq!(result.camera_id, 1);
        assert!((result.target_width - 0.125).abs() < 1e-9);
        assert!((result.target_height - 0.25).abs() < 1e-9);
        assert!((result.target_area - 0.03125).abs() < 1e-9);
        assert_eq!((out.width(), out.height()), (320, 240));
        assert_eq!(out.sequence(), 7);
        assert_eq!(*out.image().get_pixel(140, 90), RED);
        assert_eq!(*out.image().get_pixel(141, 91), GREEN);
        assert_eq!(*out.image().get_pixel(160, 120), Rgb([255, 255, 255]));
    }

    #[test]
    fn no_qualifying_region_means_no_target() {
        let frame = scene(320, 240, &[(0, 0, 2, 2)]);
        let (_, result) = pipeline().process(&frame, &processing(TargetMode::Single));
        assert_eq!(result, DetectionResult::no_target(1));
    }

    #[test]
    fn dual_mode_needs_two_regions() {
        let one = scene(320, 240, &[(40, 80, 40, 50)]);
        let (_, result) = pipeline().process(&one, &processing(TargetMode::DualHorizontal));
        assert!(!result.has_target);
        assert_eq!(result.target_area, 0.0);

        let two = scene(320, 240, &[(40, 80, 40, 50), (200, 80, 40, 50)]);
        let (_, result) = pipeline().process(&two, &processing(TargetMode::DualHorizontal));
        assert!(result.has_target);
        assert!((result.target_width - 200.0 / 320.0).abs() < 1e-9);
        assert!((result.target_height - 50.0 / 240.0).abs() < 1e-9);
    }

    #[test]
    fn dual_vertical_stacks_regions() {
        let frame = scene(320, 240, &[(100, 150, 40, 40), (100, 20, 40, 40)]);
        let (_, result) = pipeline().process(&frame, &processing(TargetMode::DualVertical));
        assert!(result.has_target);
        assert!((result.target_width - 40.0 / 320.0).abs() < 1e-9);
        assert!((result.target_height - 170.0 / 240.0).abs() < 1e-9);
    }

    #[test]
    fn settings_are_pushed_once_until_changed() -> Result<(), CameraError> {
        let mut camera = SyntheticCamera::new(0, "camera0".into(), SyntheticLimits::default());
        let mut pipeline = ConfigurablePipeline::new(
            0,
            CameraControls {
                apply_exposure: true,
                apply_white_balance: true,
            },
        );
        let mut cfg = PipelineConfig::default();
        pipeline.update_camera_settings(&mut camera, &cfg)?;
        assert_eq!(camera.brightness(), 64);
        assert_eq!(camera.exposure(), 5);
        assert_eq!(camera.white_balance(), 6500);

        cfg.brightness = 200;
        pipeline.update_camera_settings(&mut camera, &cfg)?;
        assert_eq!(camera.brightness(), 200);
        Ok(())
    }

    #[test]
    fn rejected_setting_is_an_error() {
        let mut camera = SyntheticCamera::new(0, "camera0".into(), SyntheticLimits::default());
        let mut pipeline = ConfigurablePipeline::new(
            0,
            CameraControls {
                apply_exposure: false,
                apply_white_balance: true,
            },
        );
        let cfg = PipelineConfig {
            white_balance: 9000,
            ..PipelineConfig::default()
        };
        let err = pipeline.update_camera_settings(&mut camera, &cfg).unwrap_err();
        assert!(matches!(err, CameraError::UnsupportedSetting { .. }));
    }
}
