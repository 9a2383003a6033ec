//! Capture devices.
//!
//! `CameraSource` binds one physical (or synthetic) capture device:
//! - `stub://<name>` opens a synthetic device that renders a target scene
//! - anything else is a V4L2 device node (feature: camera-v4l2)
//!
//! Every setter follows the same contract: write the value, read it back, and
//! fail with `CameraError` when the device reports something else. Nothing in
//! this module retries; the caller decides whether a failure is fatal.

mod synthetic;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

use thiserror::Error;

use crate::frame::Frame;

pub use synthetic::{SyntheticCamera, SyntheticLimits};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Maximum number of capture devices probed at startup.
pub const MAX_CAMERAS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device-level controls pushed by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraSetting {
    FrameRate,
    Brightness,
    Exposure,
    WhiteBalance,
}

impl std::fmt::Display for CameraSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraSetting::FrameRate => "frame rate",
            CameraSetting::Brightness => "brightness",
            CameraSetting::Exposure => "exposure",
            CameraSetting::WhiteBalance => "white balance",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("unsupported resolution {requested} (device reports {actual})")]
    UnsupportedResolution {
        requested: Resolution,
        actual: Resolution,
    },
    #[error("unsupported {setting} {requested} (device reports {actual})")]
    UnsupportedSetting {
        setting: CameraSetting,
        requested: i64,
        actual: i64,
    },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame capture timed out")]
    Timeout,
    #[error("camera {0} is not connected")]
    Disconnected(String),
    #[error("camera i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Transient failures skip the current frame; everything else stops the loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Decode(_) | CameraError::Timeout)
    }
}

/// Capability set the vision loop and the pipelines need from a camera.
pub trait CaptureDevice: Send {
    /// Index of this camera (0-based), sent in telemetry.
    fn id(&self) -> i32;

    fn name(&self) -> &str;

    fn resolution(&self) -> Resolution;

    /// Set an exact resolution, failing if the device settles on anything else.
    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError>;

    /// Select the largest resolution the device supports.
    fn set_max_resolution(&mut self) -> Result<Resolution, CameraError>;

    fn frame_rate(&self) -> u32;

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), CameraError>;

    fn set_brightness(&mut self, brightness: i32) -> Result<(), CameraError>;

    fn set_exposure(&mut self, exposure: i32) -> Result<(), CameraError>;

    fn set_white_balance(&mut self, white_balance: i32) -> Result<(), CameraError>;

    /// Block until the next frame is available and write it into `frame`.
    fn grab_frame(&mut self, frame: &mut Frame) -> Result<(), CameraError>;
}

/// Compare a written value against its read-back.
pub(crate) fn verify_setting(
    setting: CameraSetting,
    requested: i64,
    actual: i64,
) -> Result<(), CameraError> {
    if requested == actual {
        Ok(())
    } else {
        Err(CameraError::UnsupportedSetting {
            setting,
            requested,
            actual,
        })
    }
}

/// Capture device selected by device path.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(V4l2Camera),
}

impl CameraSource {
    /// Open `device` as camera `id`, selecting its maximum resolution.
    pub fn open(id: i32, device: &str) -> Result<Self, CameraError> {
        let name = format!("camera{}", id);
        if device.starts_with("stub://") {
            let mut camera = SyntheticCamera::new(id, name, SyntheticLimits::default());
            camera.set_max_resolution()?;
            log::info!("CameraSource: opened {} as {} (synthetic)", device, camera.name());
            return Ok(Self {
                backend: CameraBackend::Synthetic(camera),
            });
        }

        #[cfg(feature = "camera-v4l2")]
        {
            let mut camera = V4l2Camera::open(id, name, device)?;
            camera.set_max_resolution()?;
            log::info!("CameraSource: opened {} as {}", device, camera.name());
            Ok(Self {
                backend: CameraBackend::Device(camera),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            let _ = name;
            Err(CameraError::Disconnected(format!(
                "{} (capture devices require the camera-v4l2 feature)",
                device
            )))
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $camera:ident => $body:expr) => {
        match &$self.backend {
            CameraBackend::Synthetic($camera) => $body,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device($camera) => $body,
        }
    };
    (mut $self:ident, $camera:ident => $body:expr) => {
        match &mut $self.backend {
            CameraBackend::Synthetic($camera) => $body,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device($camera) => $body,
        }
    };
}

impl CaptureDevice for CameraSource {
    fn id(&self) -> i32 {
        dispatch!(self, camera => camera.id())
    }

    fn name(&self) -> &str {
        dispatch!(self, camera => camera.name())
    }

    fn resolution(&self) -> Resolution {
        dispatch!(self, camera => camera.resolution())
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.set_resolution(resolution))
    }

    fn set_max_resolution(&mut self) -> Result<Resolution, CameraError> {
        dispatch!(mut self, camera => camera.set_max_resolution())
    }

    fn frame_rate(&self) -> u32 {
        dispatch!(self, camera => camera.frame_rate())
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.set_frame_rate(fps))
    }

    fn set_brightness(&mut self, brightness: i32) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.set_brightness(brightness))
    }

    fn set_exposure(&mut self, exposure: i32) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.set_exposure(exposure))
    }

    fn set_white_balance(&mut self, white_balance: i32) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.set_white_balance(white_balance))
    }

    fn grab_frame(&mut self, frame: &mut Frame) -> Result<(), CameraError> {
        dispatch!(mut self, camera => camera.grab_frame(frame))
    }
}

/// Open every configured device, keeping those that respond. The camera id
/// is the position among the cameras that opened.
pub fn probe_cameras(devices: &[String]) -> Vec<CameraSource> {
    let mut cameras = Vec::new();
    for device in devices.iter().take(MAX_CAMERAS) {
        match CameraSource::open(cameras.len() as i32, device) {
            Ok(camera) => cameras.push(camera),
            Err(err) => log::warn!("camera probe: {} unavailable: {}", device, err),
        }
    }
    cameras
}

/// Bring a camera up at the requested frame rate and resolution.
///
/// An unsupported frame rate is fatal. An unsupported resolution falls back to
/// the device maximum with a warning.
pub fn configure_camera<C: CaptureDevice + ?Sized>(
    camera: &mut C,
    fps: u32,
    resolution: Resolution,
) -> Result<(), CameraError> {
    camera.set_frame_rate(fps)?;
    if let Err(err) = camera.set_resolution(resolution) {
        log::warn!(
            "{}: {} (using max resolution)",
            camera.name(),
            err
        );
        camera.set_max_resolution()?;
    }
    log::info!(
        "{}: resolution = {}, fps = {}",
        camera.name(),
        camera.resolution(),
        camera.frame_rate()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_device_opens_at_max_resolution() -> anyhow::Result<()> {
        let camera = CameraSource::open(0, "stub://front")?;
        assert_eq!(camera.resolution(), SyntheticLimits::default().max_resolution());
        assert_eq!(camera.name(), "camera0");
        Ok(())
    }

    #[test]
    fn configure_falls_back_to_max_resolution() -> anyhow::Result<()> {
        let mut camera = CameraSource::open(1, "stub://rear")?;
        configure_camera(&mut camera, 30, Resolution::new(333, 222))?;
        assert_eq!(camera.resolution(), SyntheticLimits::default().max_resolution());
        assert_eq!(camera.frame_rate(), 30);
        Ok(())
    }

    #[test]
    fn configure_rejects_unsupported_fps() -> anyhow::Result<()> {
        let mut camera = CameraSource::open(0, "stub://front")?;
        let err = configure_camera(&mut camera, 42, Resolution::new(320, 240)).unwrap_err();
        assert!(matches!(
            err,
            CameraError::UnsupportedSetting {
                setting: CameraSetting::FrameRate,
                requested: 42,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn probe_skips_missing_devices() {
        let devices = vec!["stub://a".to_string(), "stub://b".to_string(), "stub://c".to_string()];
        let cameras = probe_cameras(&devices);
        assert_eq!(cameras.len(), MAX_CAMERAS);
        assert_eq!(cameras[1].id(), 1);
    }

    #[test]
    fn decode_and_timeout_are_transient() {
        assert!(CameraError::Decode("bad huffman".into()).is_transient());
        assert!(CameraError::Timeout.is_transient());
        assert!(!CameraError::Disconnected("camera0".into()).is_transient());
    }
}
