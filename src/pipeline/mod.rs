//! Frame pipelines.
//!
//! A pipeline turns one frame plus one `PipelineConfig` into an annotated
//! frame and a `DetectionResult`. `process` does no I/O; the only device
//! interaction is `update_camera_settings`, called once per frame before
//! processing.

mod color;
mod config;
mod configurable;
mod geometry;
mod regions;
mod result;

use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::camera::{CameraError, CaptureDevice};
use crate::frame::Frame;

pub use color::{blur, rgb_to_hls, threshold_hls};
pub use config::{Bounds, ConfigError, PipelineConfig, PipelineField, PipelineMode, TargetMode};
pub use configurable::ConfigurablePipeline;
pub use geometry::{dual_target, pair_quad, single_target, Point, Quad, TargetGeometry};
pub use regions::{extract_regions, filter_regions, rank_regions, BoundingBox, Region, RegionMap};
pub use result::DetectionResult;

/// Which optional camera controls a pipeline pushes besides brightness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CameraControls {
    pub apply_exposure: bool,
    pub apply_white_balance: bool,
}

pub trait FramePipeline: Send {
    /// Pipeline identifier.
    fn name(&self) -> &'static str;

    /// Annotated output frame and detection for one input frame.
    fn process(&mut self, frame: &Frame, config: &PipelineConfig) -> (Frame, DetectionResult);

    /// Push the configured capture settings. A rejected setting is returned
    /// to the caller, which treats it as fatal.
    fn update_camera_settings(
        &mut self,
        camera: &mut dyn CaptureDevice,
        config: &PipelineConfig,
    ) -> Result<(), CameraError>;
}

/// Forwards frames untouched and never reports a target.
pub struct PassthroughPipeline {
    camera_id: i32,
}

impl PassthroughPipeline {
    pub fn new(camera_id: i32) -> Self {
        Self { camera_id }
    }
}

impl FramePipeline for PassthroughPipeline {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(&mut self, frame: &Frame, _config: &PipelineConfig) -> (Frame, DetectionResult) {
        (frame.clone(), DetectionResult::no_target(self.camera_id))
    }

    fn update_camera_settings(
        &mut self,
        _camera: &mut dyn CaptureDevice,
        _config: &PipelineConfig,
    ) -> Result<(), CameraError> {
        Ok(())
    }
}

/// Pipeline implementation selected in daemon settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineKind {
    #[default]
    Configurable,
    Passthrough,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Configurable => "configurable",
            PipelineKind::Passthrough => "passthrough",
        }
    }

    pub fn build(&self, camera_id: i32, controls: CameraControls) -> Box<dyn FramePipeline> {
        match self {
            PipelineKind::Configurable => Box::new(ConfigurablePipeline::new(camera_id, controls)),
            PipelineKind::Passthrough => Box::new(PassthroughPipeline::new(camera_id)),
        }
    }
}

impl FromStr for PipelineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "configurable" => Ok(PipelineKind::Configurable),
            "passthrough" => Ok(PipelineKind::Passthrough),
            other => Err(anyhow!(
                "unknown pipeline '{}' (expected configurable or passthrough)",
                other
            )),
        }
    }
}
