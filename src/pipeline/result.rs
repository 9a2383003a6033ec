/// Per-frame detection outcome. All geometry is normalized to the frame and
/// zero when `has_target` is false.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub camera_id: i32,
    pub fps: f64,
    pub has_target: bool,
    pub x: f64,
    pub y: f64,
    pub target_width: f64,
    pub target_height: f64,
    pub target_area: f64,
}

impl DetectionResult {
    pub fn no_target(camera_id: i32) -> Self {
        Self {
            camera_id,
            ..Self::default()
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }
}
