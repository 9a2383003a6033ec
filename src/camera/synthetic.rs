use image::Rgb;
use rand::Rng;

use super::{verify_setting, CameraError, CameraSetting, CaptureDevice, Resolution};
use crate::frame::Frame;

const BACKGROUND: Rgb<u8> = Rgb([12, 14, 18]);
const TARGET: Rgb<u8> = Rgb([40, 230, 60]);

/// What a synthetic device accepts. Requests outside these limits read back
/// as the nearest supported value, which the setters then reject.
#[derive(Clone, Debug)]
pub struct SyntheticLimits {
    pub resolutions: Vec<Resolution>,
    pub frame_rates: Vec<u32>,
    pub brightness: (i32, i32),
    pub exposure: (i32, i32),
    pub white_balance: (i32, i32),
}

impl Default for SyntheticLimits {
    fn default() -> Self {
        Self {
            resolutions: vec![
                Resolution::new(160, 120),
                Resolution::new(320, 240),
                Resolution::new(640, 480),
            ],
            frame_rates: vec![15, 30, 60],
            brightness: (0, 255),
            exposure: (1, 5000),
            white_balance: (2800, 6500),
        }
    }
}

impl SyntheticLimits {
    pub fn max_resolution(&self) -> Resolution {
        self.resolutions
            .iter()
            .copied()
            .max_by_key(|r| u64::from(r.width) * u64::from(r.height))
            .unwrap_or(Resolution::new(320, 240))
    }
}

/// Synthetic camera for `stub://` devices.
///
/// Renders two bright targets on a dark background, side by side, drifting
/// slowly so the stream is visibly live. Brightness scales the whole scene.
pub struct SyntheticCamera {
    id: i32,
    name: String,
    limits: SyntheticLimits,
    resolution: Resolution,
    frame_rate: u32,
    brightness: i32,
    exposure: i32,
    white_balance: i32,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(id: i32, name: String, limits: SyntheticLimits) -> Self {
        let resolution = limits.max_resolution();
        let frame_rate = limits.frame_rates.first().copied().unwrap_or(30);
        Self {
            id,
            name,
            resolution,
            frame_rate,
            brightness: 128,
            exposure: limits.exposure.0,
            white_balance: limits.white_balance.1,
            limits,
            frame_count: 0,
        }
    }

    pub fn brightness(&self) -> i32 {
        self.brightness
    }

    pub fn exposure(&self) -> i32 {
        self.exposure
    }

    pub fn white_balance(&self) -> i32 {
        self.white_balance
    }

    fn render(&mut self, frame: &mut Frame) {
        let Resolution { width, height } = self.resolution;
        frame.reshape(width, height, self.frame_count);

        let gain = self.brightness as f32 / 128.0;
        let scale = |c: Rgb<u8>| {
            Rgb([
                (c[0] as f32 * gain).min(255.0) as u8,
                (c[1] as f32 * gain).min(255.0) as u8,
                (c[2] as f32 * gain).min(255.0) as u8,
            ])
        };
        let background = scale(BACKGROUND);
        let target = scale(TARGET);

        let drift = (self.frame_count % 20) as u32;
        let target_w = (width / 8).max(1);
        let target_h = (height / 4).max(1);
        let top = height / 3;
        let left_a = width / 4 + drift;
        let left_b = width / 2 + drift;

        let mut rng = rand::thread_rng();
        let image = frame.image_mut();
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let in_a = x >= left_a && x < left_a + target_w && y >= top && y < top + target_h;
            let in_b = x >= left_b && x < left_b + target_w && y >= top && y < top + target_h;
            *pixel = if in_a || in_b {
                target
            } else {
                let noise: u8 = rng.gen_range(0..4);
                Rgb([
                    background[0].saturating_add(noise),
                    background[1].saturating_add(noise),
                    background[2].saturating_add(noise),
                ])
            };
        }
    }
}

fn settle(value: i32, (lo, hi): (i32, i32)) -> i32 {
    value.clamp(lo, hi)
}

impl CaptureDevice for SyntheticCamera {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError> {
        // Devices snap unsupported modes to the closest mode not larger than requested.
        let actual = self
            .limits
            .resolutions
            .iter()
            .copied()
            .filter(|r| r.width <= resolution.width && r.height <= resolution.height)
            .max_by_key(|r| u64::from(r.width) * u64::from(r.height))
            .unwrap_or(self.resolution);
        self.resolution = actual;
        if actual != resolution {
            return Err(CameraError::UnsupportedResolution {
                requested: resolution,
                actual,
            });
        }
        Ok(())
    }

    fn set_max_resolution(&mut self) -> Result<Resolution, CameraError> {
        self.resolution = self.limits.max_resolution();
        Ok(self.resolution)
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), CameraError> {
        if self.limits.frame_rates.contains(&fps) {
            self.frame_rate = fps;
        }
        verify_setting(
            CameraSetting::FrameRate,
            i64::from(fps),
            i64::from(self.frame_rate),
        )
    }

    fn set_brightness(&mut self, brightness: i32) -> Result<(), CameraError> {
        self.brightness = settle(brightness, self.limits.brightness);
        verify_setting(
            CameraSetting::Brightness,
            i64::from(brightness),
            i64::from(self.brightness),
        )
    }

    fn set_exposure(&mut self, exposure: i32) -> Result<(), CameraError> {
        self.exposure = settle(exposure, self.limits.exposure);
        verify_setting(
            CameraSetting::Exposure,
            i64::from(exposure),
            i64::from(self.exposure),
        )
    }

    fn set_white_balance(&mut self, white_balance: i32) -> Result<(), CameraError> {
        self.white_balance = settle(white_balance, self.limits.white_balance);
        verify_setting(
            CameraSetting::WhiteBalance,
            i64::from(white_balance),
            i64::from(self.white_balance),
        )
    }

    fn grab_frame(&mut self, frame: &mut Frame) -> Result<(), CameraError> {
        self.frame_count += 1;
        self.render(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> SyntheticCamera {
        SyntheticCamera::new(0, "camera0".to_string(), SyntheticLimits::default())
    }

    #[test]
    fn exact_resolution_is_accepted() -> Result<(), CameraError> {
        let mut cam = camera();
        cam.set_resolution(Resolution::new(320, 240))?;
        assert_eq!(cam.resolution(), Resolution::new(320, 240));
        Ok(())
    }

    #[test]
    fn unsupported_resolution_reports_readback() {
        let mut cam = camera();
        let err = cam.set_resolution(Resolution::new(400, 300)).unwrap_err();
        match err {
            CameraError::UnsupportedResolution { requested, actual } => {
                assert_eq!(requested, Resolution::new(400, 300));
                assert_eq!(actual, Resolution::new(320, 240));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn out_of_range_brightness_is_rejected() {
        let mut cam = camera();
        assert!(cam.set_brightness(64).is_ok());
        let err = cam.set_brightness(300).unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedSetting {
                setting: CameraSetting::Brightness,
                requested: 300,
                actual: 255
            }
        ));
    }

    #[test]
    fn grab_reuses_buffer_and_advances_sequence() -> Result<(), CameraError> {
        let mut cam = camera();
        cam.set_resolution(Resolution::new(160, 120))?;
        let mut frame = Frame::new(160, 120);
        cam.grab_frame(&mut frame)?;
        cam.grab_frame(&mut frame)?;
        assert_eq!(frame.sequence(), 2);
        assert_eq!((frame.width(), frame.height()), (160, 120));
        Ok(())
    }

    #[test]
    fn scene_contains_bright_targets() -> Result<(), CameraError> {
        let mut cam = camera();
        let mut frame = Frame::new(1, 1);
        cam.grab_frame(&mut frame)?;
        let bright = frame
            .image()
            .pixels()
            .filter(|p| p[1] > 200)
            .count();
        assert!(bright > 0);
        Ok(())
    }
}
