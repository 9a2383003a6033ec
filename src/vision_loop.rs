//! Per-camera scheduler.
//!
//! Each iteration: read the camera's active pipeline slot, push capture
//! settings, grab, process, then hand the result to telemetry and the
//! annotated frame to the stream. The stop flag is checked at the top of
//! every iteration; a grab that blocks delays shutdown until it returns.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::camera::{CaptureDevice, Resolution};
use crate::frame::Frame;
use crate::pipeline::FramePipeline;
use crate::registry::Registry;
use crate::stream::FrameSink;
use crate::telemetry::TelemetrySink;

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Counters shared with whoever holds the loop's handle.
#[derive(Debug, Default)]
pub struct LoopStats {
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    fps_bits: AtomicU64,
}

impl LoopStats {
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }
}

pub struct VisionLoop<C: CaptureDevice> {
    camera: C,
    pipeline: Box<dyn FramePipeline>,
    registry: Arc<Registry>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    stream: Option<(Arc<dyn FrameSink>, Resolution)>,
}

impl<C: CaptureDevice + 'static> VisionLoop<C> {
    pub fn new(camera: C, pipeline: Box<dyn FramePipeline>, registry: Arc<Registry>) -> Self {
        Self {
            camera,
            pipeline,
            registry,
            telemetry: None,
            stream: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Annotated frames are resized to `resolution` before being pushed.
    pub fn with_stream(mut self, stream: Arc<dyn FrameSink>, resolution: Resolution) -> Self {
        self.stream = Some((stream, resolution));
        self
    }

    /// Run until `stop` is set. Returns an error only for fatal conditions:
    /// rejected camera settings, a lost device, or an unknown camera slot.
    pub fn run(mut self, stop: &AtomicBool, stats: &LoopStats) -> Result<()> {
        let name = self.camera.name().to_string();
        let index = usize::try_from(self.camera.id())
            .map_err(|_| anyhow!("{}: negative camera id", name))?;
        let resolution = self.camera.resolution();
        let mut frame = Frame::new(resolution.width, resolution.height);

        let mut fps = f64::from(self.camera.frame_rate());
        stats.set_fps(fps);
        let mut last_frame = Instant::now();
        let mut last_health = Instant::now();
        log::info!(
            "{}: vision loop started ({} pipeline, {})",
            name,
            self.pipeline.name(),
            resolution
        );

        while !stop.load(Ordering::SeqCst) {
            let config = self.registry.active_pipeline(index)?;
            self.pipeline
                .update_camera_settings(&mut self.camera, &config)
                .with_context(|| format!("{}: camera rejected pipeline settings", name))?;

            match self.camera.grab_frame(&mut frame) {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    log::warn!("{}: frame skipped: {}", name, err);
                    stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("{}: capture failed", name));
                }
            }

            let (annotated, result) = self.pipeline.process(&frame, &config);
            let result = result.with_fps(fps);
            if let Some(telemetry) = &self.telemetry {
                telemetry.send(&result);
            }
            if let Some((stream, size)) = &self.stream {
                stream.push_frame(annotated.resized(size.width, size.height), fps);
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last_frame).as_secs_f64();
            if elapsed > 0.0 {
                fps = 1.0 / elapsed;
            }
            last_frame = now;
            stats.set_fps(fps);
            stats.frames_processed.fetch_add(1, Ordering::Relaxed);

            if now.duration_since(last_health) >= HEALTH_INTERVAL {
                last_health = now;
                log::info!(
                    "{}: fps={:.1} processed={} skipped={} clients={}",
                    name,
                    fps,
                    stats.frames_processed(),
                    stats.frames_skipped(),
                    self.stream.as_ref().map_or(0, |(s, _)| s.client_count())
                );
            }
        }

        log::info!("{}: vision loop stopped", name);
        Ok(())
    }

    pub fn spawn(self) -> Result<VisionLoopHandle> {
        let name = self.camera.name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(LoopStats::default());
        let join = {
            let stop = stop.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || self.run(&stop, &stats))?
        };
        Ok(VisionLoopHandle {
            name,
            stop,
            stats,
            join: Some(join),
        })
    }
}

pub struct VisionLoopHandle {
    name: String,
    stop: Arc<AtomicBool>,
    stats: Arc<LoopStats>,
    join: Option<JoinHandle<Result<()>>>,
}

impl VisionLoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once the loop thread has returned, for any reason.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the loop and return how it ended.
    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("{}: vision loop panicked", self.name))?,
            None => Ok(()),
        }
    }

    pub fn stop(self) -> Result<()> {
        self.request_stop();
        self.join()
    }
}
