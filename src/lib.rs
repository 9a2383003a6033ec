//! Vision coprocessor
//!
//! Captures camera frames on the robot, finds retro-reflective targets, and
//! distributes the results:
//! - an annotated MJPEG stream per camera for operators
//! - one UDP telemetry record per frame for the robot controller
//! - a small HTTP API for reading and tuning pipeline settings live
//!
//! # Module Structure
//!
//! - `frame`: Frame buffer, resize, stream overlays
//! - `camera`: Capture devices (synthetic `stub://`, V4L2 behind `camera-v4l2`)
//! - `pipeline`: FramePipeline trait, PipelineConfig, detection stages
//! - `registry`: Shared camera count, hostname and pipeline slots
//! - `config`: Persisted server record and daemon settings
//! - `telemetry`: Telemetry wire record and UDP sender
//! - `stream`: MJPEG stream server
//! - `web`: ConfigServer (static files and `/api`)
//! - `vision_loop`: Per-camera scheduler

pub mod camera;
pub mod config;
pub mod frame;
pub mod pipeline;
pub mod registry;
pub mod stream;
pub mod telemetry;
pub mod vision_loop;
pub mod web;

pub use camera::{CameraError, CameraSource, CaptureDevice, Resolution};
pub use config::{ServerConfig, VisiondSettings};
pub use frame::Frame;
pub use pipeline::{DetectionResult, FramePipeline, PipelineConfig, PipelineKind};
pub use registry::Registry;
pub use stream::{FrameSink, StreamServer};
pub use telemetry::{TelemetrySink, UdpTelemetry};
pub use vision_loop::{VisionLoop, VisionLoopHandle};
pub use web::ConfigServer;
