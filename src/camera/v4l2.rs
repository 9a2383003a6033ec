//! V4L2 capture device.
//!
//! Captures MJPEG from a local device node (e.g. /dev/video0) and decodes it
//! in-memory. Controls go through a second handle on the same node so they can
//! be written while the capture stream holds the first one.

use ouroboros::self_referencing;

use super::{verify_setting, CameraError, CameraSetting, CaptureDevice, Resolution};
use crate::frame::Frame;

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

// Requested when probing for the largest mode; drivers clamp it.
const LARGE_DIMENSION: u32 = 10_000;
const STREAM_BUFFERS: u32 = 4;

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Camera {
    id: i32,
    name: String,
    path: String,
    idle: Option<v4l::Device>,
    capture: Option<CaptureState>,
    controls: v4l::Device,
    resolution: Resolution,
    frame_count: u64,
}

impl V4l2Camera {
    pub fn open(id: i32, name: String, path: &str) -> Result<Self, CameraError> {
        let device = v4l::Device::with_path(path)?;
        let controls = v4l::Device::with_path(path)?;
        Ok(Self {
            id,
            name,
            path: path.to_string(),
            idle: Some(device),
            capture: None,
            controls,
            resolution: Resolution::new(0, 0),
            frame_count: 0,
        })
    }

    /// Stop streaming (if running) and hand back the device for reconfiguration.
    fn idle_device(&mut self) -> Result<&mut v4l::Device, CameraError> {
        if let Some(capture) = self.capture.take() {
            self.idle = Some(capture.into_heads().device);
        }
        self.idle
            .as_mut()
            .ok_or_else(|| CameraError::Disconnected(self.path.clone()))
    }

    fn apply_format(&mut self, width: u32, height: u32) -> Result<Resolution, CameraError> {
        use v4l::video::Capture;

        let device = self.idle_device()?;
        let mut format = device.format()?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let format = device.set_format(&format)?;
        self.resolution = Resolution::new(format.width, format.height);
        Ok(self.resolution)
    }

    fn set_control(&mut self, setting: CameraSetting, id: u32, value: i32) -> Result<(), CameraError> {
        use v4l::control::{Control, Value};

        self.controls.set_control(Control {
            id,
            value: Value::Integer(i64::from(value)),
        })?;
        let actual = match self.controls.control(id)?.value {
            Value::Integer(actual) => actual,
            Value::Boolean(flag) => i64::from(flag),
            _ => i64::MIN,
        };
        verify_setting(setting, i64::from(value), actual)
    }

    fn ensure_streaming(&mut self) -> Result<&mut CaptureState, CameraError> {
        if self.capture.is_none() {
            let device = self
                .idle
                .take()
                .ok_or_else(|| CameraError::Disconnected(self.path.clone()))?;
            let state = CaptureStateTryBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(
                        device,
                        v4l::buffer::Type::VideoCapture,
                        STREAM_BUFFERS,
                    )
                },
            }
            .try_build()?;
            self.capture = Some(state);
            log::info!("{}: streaming {} from {}", self.name, self.resolution, self.path);
        }
        self.capture
            .as_mut()
            .ok_or_else(|| CameraError::Disconnected(self.path.clone()))
    }
}

impl CaptureDevice for V4l2Camera {
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
        let actual = self.apply_format(resolution.width, resolution.height)?;
        if actual != resolution {
            return Err(CameraError::UnsupportedResolution {
                requested: resolution,
                actual,
            });
        }
        Ok(())
    }

    fn set_max_resolution(&mut self) -> Result<Resolution, CameraError> {
        let max = self.apply_format(LARGE_DIMENSION, LARGE_DIMENSION)?;
        self.apply_format(max.width, max.height)
    }

    fn frame_rate(&self) -> u32 {
        use v4l::video::Capture;

        let params = match (&self.idle, &self.capture) {
            (Some(device), _) => device.params(),
            _ => self.controls.params(),
        };
        params
            .map(|p| p.interval.denominator / p.interval.numerator.max(1))
            .unwrap_or(0)
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), CameraError> {
        use v4l::video::Capture;

        let device = self.idle_device()?;
        let params = device.set_params(&v4l::video::capture::Parameters::with_fps(fps))?;
        let actual = params.interval.denominator / params.interval.numerator.max(1);
        verify_setting(CameraSetting::FrameRate, i64::from(fps), i64::from(actual))
    }

    fn set_brightness(&mut self, brightness: i32) -> Result<(), CameraError> {
        self.set_control(CameraSetting::Brightness, CID_BRIGHTNESS, brightness)
    }

    fn set_exposure(&mut self, exposure: i32) -> Result<(), CameraError> {
        self.set_control(CameraSetting::Exposure, CID_EXPOSURE_ABSOLUTE, exposure)
    }

    fn set_white_balance(&mut self, white_balance: i32) -> Result<(), CameraError> {
        self.set_control(
            CameraSetting::WhiteBalance,
            CID_WHITE_BALANCE_TEMPERATURE,
            white_balance,
        )
    }

    fn grab_frame(&mut self, frame: &mut Frame) -> Result<(), CameraError> {
        use v4l::io::traits::CaptureStream;

        let state = self.ensure_streaming()?;
        let jpeg = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let jpeg = match jpeg {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                return Err(CameraError::Timeout)
            }
            Err(err) => return Err(CameraError::Io(err)),
        };

        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .map_err(|err| CameraError::Decode(err.to_string()))?
            .to_rgb8();

        self.frame_count += 1;
        frame.fill_from(&decoded, self.frame_count);
        Ok(())
    }
}
