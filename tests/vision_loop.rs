use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vision_coprocessor::camera::{CameraError, CaptureDevice, Resolution, SyntheticCamera, SyntheticLimits};
use vision_coprocessor::config::ServerConfig;
use vision_coprocessor::frame::Frame;
use vision_coprocessor::pipeline::{CameraControls, DetectionResult, PipelineKind};
use vision_coprocessor::registry::Registry;
use vision_coprocessor::stream::FrameSink;
use vision_coprocessor::telemetry::TelemetrySink;
use vision_coprocessor::vision_loop::{VisionLoop, VisionLoopHandle};

/// Camera whose grabs fail on a fixed schedule.
struct ScriptedCamera {
    grabs: u64,
    decode_every: Option<u64>,
    disconnect_after: Option<u64>,
}

impl ScriptedCamera {
    fn new() -> Self {
        Self {
            grabs: 0,
            decode_every: None,
            disconnect_after: None,
        }
    }
}

impl CaptureDevice for ScriptedCamera {
    fn id(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        "scripted0"
    }

    fn resolution(&self) -> Resolution {
        Resolution::new(64, 48)
    }

    fn set_resolution(&mut self, _resolution: Resolution) -> Result<(), CameraError> {
        Ok(())
    }

    fn set_max_resolution(&mut self) -> Result<Resolution, CameraError> {
        Ok(self.resolution())
    }

    fn frame_rate(&self) -> u32 {
        30
    }

    fn set_frame_rate(&mut self, _fps: u32) -> Result<(), CameraError> {
        Ok(())
    }

    fn set_brightness(&mut self, _brightness: i32) -> Result<(), CameraError> {
        Ok(())
    }

    fn set_exposure(&mut self, _exposure: i32) -> Result<(), CameraError> {
        Ok(())
    }

    fn set_white_balance(&mut self, _white_balance: i32) -> Result<(), CameraError> {
        Ok(())
    }

    fn grab_frame(&mut self, frame: &mut Frame) -> Result<(), CameraError> {
        self.grabs += 1;
        std::thread::sleep(Duration::from_millis(2));
        if let Some(limit) = self.disconnect_after {
            if self.grabs > limit {
                return Err(CameraError::Disconnected("scripted0".to_string()));
            }
        }
        if let Some(every) = self.decode_every {
            if self.grabs % every == 0 {
                return Err(CameraError::Decode("corrupt frame".to_string()));
            }
        }
        frame.reshape(64, 48, self.grabs);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingTelemetry {
    results: Mutex<Vec<DetectionResult>>,
}

impl TelemetrySink for CollectingTelemetry {
    fn send(&self, result: &DetectionResult) {
        self.results.lock().expect("telemetry lock").push(*result);
    }
}

#[derive(Default)]
struct CollectingStream {
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl FrameSink for CollectingStream {
    fn push_frame(&self, frame: Frame, _fps: f64) {
        self.sizes
            .lock()
            .expect("stream lock")
            .push((frame.width(), frame.height()));
    }

    fn client_count(&self) -> usize {
        0
    }
}

fn registry() -> Arc<Registry> {
    Arc::new(Registry::new(1, "vision.local".to_string(), ServerConfig::default()))
}

fn wait_until(handle: &VisionLoopHandle, mut done: impl FnMut(&VisionLoopHandle) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done(handle) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn transient_errors_skip_frames_and_loop_continues() -> Result<()> {
    let mut camera = ScriptedCamera::new();
    camera.decode_every = Some(3);
    let telemetry = Arc::new(CollectingTelemetry::default());
    let stream = Arc::new(CollectingStream::default());

    let handle = VisionLoop::new(
        camera,
        PipelineKind::Passthrough.build(0, CameraControls::default()),
        registry(),
    )
    .with_telemetry(telemetry.clone())
    .with_stream(stream.clone(), Resolution::new(32, 24))
    .spawn()?;

    assert!(wait_until(&handle, |h| h.stats().frames_processed() >= 6));
    assert!(handle.stats().frames_skipped() >= 1);
    assert!(!handle.is_finished());
    handle.stop()?;

    let results = telemetry.results.lock().expect("telemetry lock");
    assert!(results.len() >= 6);
    assert!(results.iter().all(|r| r.camera_id == 0 && !r.has_target));
    assert!(results.iter().all(|r| r.fps > 0.0));

    let sizes = stream.sizes.lock().expect("stream lock");
    assert_eq!(sizes.len(), results.len());
    assert!(sizes.iter().all(|&size| size == (32, 24)));
    Ok(())
}

#[test]
fn lost_camera_ends_the_loop_with_an_error() -> Result<()> {
    let mut camera = ScriptedCamera::new();
    camera.disconnect_after = Some(3);

    let handle = VisionLoop::new(
        camera,
        PipelineKind::Passthrough.build(0, CameraControls::default()),
        registry(),
    )
    .spawn()?;

    assert!(wait_until(&handle, |h| h.is_finished()));
    assert_eq!(handle.stats().frames_processed(), 3);
    let err = handle.join().unwrap_err();
    assert!(format!("{err:#}").contains("not connected"));
    Ok(())
}

#[test]
fn rejected_camera_settings_are_fatal() -> Result<()> {
    let registry = registry();
    registry.update_pipeline(0, |cfg| {
        cfg.white_balance = 9000;
        Ok(())
    })?;
    let camera = SyntheticCamera::new(0, "camera0".to_string(), SyntheticLimits::default());
    let controls = CameraControls {
        apply_exposure: false,
        apply_white_balance: true,
    };

    let handle = VisionLoop::new(camera, PipelineKind::Configurable.build(0, controls), registry)
        .spawn()?;

    assert!(wait_until(&handle, |h| h.is_finished()));
    assert_eq!(handle.stats().frames_processed(), 0);
    let err = handle.join().unwrap_err();
    assert!(format!("{err:#}").contains("white balance"));
    Ok(())
}

#[test]
fn selected_slot_is_read_every_frame() -> Result<()> {
    let registry = registry();
    let camera = SyntheticCamera::new(0, "camera0".to_string(), SyntheticLimits::default());
    let controls = CameraControls {
        apply_exposure: false,
        apply_white_balance: true,
    };

    let handle = VisionLoop::new(
        camera,
        PipelineKind::Configurable.build(0, controls),
        registry.clone(),
    )
    .spawn()?;
    assert!(wait_until(&handle, |h| h.stats().frames_processed() >= 2));

    // Slot 4 asks for a white balance the device cannot reach; switching to
    // it must take effect without restarting the loop.
    registry.update_pipeline(4, |cfg| {
        cfg.white_balance = 9000;
        Ok(())
    })?;
    registry.select_pipeline(0, 4)?;

    assert!(wait_until(&handle, |h| h.is_finished()));
    assert!(handle.join().is_err());
    Ok(())
}
