use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field}: min {min} exceeds max {max}")]
    InvertedBounds {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{field}: {value} outside {lo}..={hi}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },
    #[error("{field}: invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("unknown pipeline field '{0}'")]
    UnknownField(String),
    #[error("pipeline slot {0} does not exist")]
    UnknownSlot(usize),
    #[error("camera {0} does not exist")]
    UnknownCamera(usize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineMode {
    /// Raw video for aiming, no detection.
    #[default]
    Driver,
    Processing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetMode {
    #[default]
    Single,
    DualHorizontal,
    DualVertical,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Driver => "DRIVER",
            PipelineMode::Processing => "PROCESSING",
        }
    }
}

impl FromStr for PipelineMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRIVER" => Ok(PipelineMode::Driver),
            "PROCESSING" => Ok(PipelineMode::Processing),
            _ => Err(()),
        }
    }
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Single => "SINGLE",
            TargetMode::DualHorizontal => "DUAL_HORIZONTAL",
            TargetMode::DualVertical => "DUAL_VERTICAL",
        }
    }

    pub fn is_dual(&self) -> bool {
        !matches!(self, TargetMode::Single)
    }
}

impl FromStr for TargetMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE" => Ok(TargetMode::Single),
            "DUAL_HORIZONTAL" => Ok(TargetMode::DualHorizontal),
            "DUAL_VERTICAL" => Ok(TargetMode::DualVertical),
            _ => Err(()),
        }
    }
}

/// Inclusive `[min, max]` range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Detection settings for one pipeline slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline_mode: PipelineMode,
    pub target_mode: TargetMode,
    pub brightness: i32,
    pub white_balance: i32,
    pub exposure: i32,
    pub blur_radius: u32,
    pub hue: Bounds,
    pub luminance: Bounds,
    pub saturation: Bounds,
    pub contour_area: Bounds,
    pub contour_ratio: Bounds,
    pub contour_density: Bounds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_mode: PipelineMode::Driver,
            target_mode: TargetMode::Single,
            brightness: 64,
            white_balance: 6500,
            exposure: 5,
            blur_radius: 5,
            hue: Bounds::new(0.0, 180.0),
            luminance: Bounds::new(0.0, 255.0),
            saturation: Bounds::new(0.0, 255.0),
            contour_area: Bounds::new(0.0, 1.0),
            contour_ratio: Bounds::new(0.5, 1.5),
            contour_density: Bounds::new(0.0, 1.0),
        }
    }
}

/// Every addressable field of a `PipelineConfig`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineField {
    PipelineMode,
    TargetMode,
    Brightness,
    WhiteBalance,
    Exposure,
    BlurRadius,
    HueMin,
    HueMax,
    LuminanceMin,
    LuminanceMax,
    SaturationMin,
    SaturationMax,
    AreaMin,
    AreaMax,
    RatioMin,
    RatioMax,
    DensityMin,
    DensityMax,
}

impl PipelineField {
    pub const ALL: [PipelineField; 18] = [
        PipelineField::PipelineMode,
        PipelineField::TargetMode,
        PipelineField::Brightness,
        PipelineField::WhiteBalance,
        PipelineField::Exposure,
        PipelineField::BlurRadius,
        PipelineField::HueMin,
        PipelineField::HueMax,
        PipelineField::LuminanceMin,
        PipelineField::LuminanceMax,
        PipelineField::SaturationMin,
        PipelineField::SaturationMax,
        PipelineField::AreaMin,
        PipelineField::AreaMax,
        PipelineField::RatioMin,
        PipelineField::RatioMax,
        PipelineField::DensityMin,
        PipelineField::DensityMax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineField::PipelineMode => "pipeline-mode",
            PipelineField::TargetMode => "target-mode",
            PipelineField::Brightness => "brightness",
            PipelineField::WhiteBalance => "white-balance",
            PipelineField::Exposure => "exposure",
            PipelineField::BlurRadius => "blur-radius",
            PipelineField::HueMin => "threshold-hue-min",
            PipelineField::HueMax => "threshold-hue-max",
            PipelineField::LuminanceMin => "threshold-luminance-min",
            PipelineField::LuminanceMax => "threshold-luminance-max",
            PipelineField::SaturationMin => "threshold-saturation-min",
            PipelineField::SaturationMax => "threshold-saturation-max",
            PipelineField::AreaMin => "contour-area-min",
            PipelineField::AreaMax => "contour-area-max",
            PipelineField::RatioMin => "contour-ratio-min",
            PipelineField::RatioMax => "contour-ratio-max",
            PipelineField::DensityMin => "contour-density-min",
            PipelineField::DensityMax => "contour-density-max",
        }
    }
}

impl fmt::Display for PipelineField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

// Accepted ranges, inclusive.
const BRIGHTNESS_RANGE: (f64, f64) = (0.0, 255.0);
const WHITE_BALANCE_RANGE: (f64, f64) = (2000.0, 10000.0);
const EXPOSURE_RANGE: (f64, f64) = (0.0, 10000.0);
const BLUR_RANGE: (f64, f64) = (0.0, 50.0);
const HUE_RANGE: (f64, f64) = (0.0, 180.0);
const CHANNEL_RANGE: (f64, f64) = (0.0, 255.0);
const UNIT_RANGE: (f64, f64) = (0.0, 1.0);
const RATIO_RANGE: (f64, f64) = (0.0, 100.0);

fn check_range(field: &'static str, value: f64, (lo, hi): (f64, f64)) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            lo,
            hi,
        })
    }
}

fn check_bounds(
    field: &'static str,
    bounds: &Bounds,
    range: (f64, f64),
) -> Result<(), ConfigError> {
    check_range(field, bounds.min, range)?;
    check_range(field, bounds.max, range)?;
    if bounds.min > bounds.max {
        return Err(ConfigError::InvertedBounds {
            field,
            min: bounds.min,
            max: bounds.max,
        });
    }
    Ok(())
}

impl PipelineConfig {
    /// Reject inverted bounds and values outside each field's range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("brightness", f64::from(self.brightness), BRIGHTNESS_RANGE)?;
        check_range("white-balance", f64::from(self.white_balance), WHITE_BALANCE_RANGE)?;
        check_range("exposure", f64::from(self.exposure), EXPOSURE_RANGE)?;
        check_range("blur-radius", f64::from(self.blur_radius), BLUR_RANGE)?;
        check_bounds("threshold-hue", &self.hue, HUE_RANGE)?;
        check_bounds("threshold-luminance", &self.luminance, CHANNEL_RANGE)?;
        check_bounds("threshold-saturation", &self.saturation, CHANNEL_RANGE)?;
        check_bounds("contour-area", &self.contour_area, UNIT_RANGE)?;
        check_bounds("contour-ratio", &self.contour_ratio, RATIO_RANGE)?;
        check_bounds("contour-density", &self.contour_density, UNIT_RANGE)?;
        Ok(())
    }

    /// Current value of `field` as API text.
    pub fn get(&self, field: PipelineField) -> String {
        match field {
            PipelineField::PipelineMode => self.pipeline_mode.as_str().to_string(),
            PipelineField::TargetMode => self.target_mode.as_str().to_string(),
            PipelineField::Brightness => self.brightness.to_string(),
            PipelineField::WhiteBalance => self.white_balance.to_string(),
            PipelineField::Exposure => self.exposure.to_string(),
            PipelineField::BlurRadius => self.blur_radius.to_string(),
            PipelineField::HueMin => self.hue.min.to_string(),
            PipelineField::HueMax => self.hue.max.to_string(),
            PipelineField::LuminanceMin => self.luminance.min.to_string(),
            PipelineField::LuminanceMax => self.luminance.max.to_string(),
            PipelineField::SaturationMin => self.saturation.min.to_string(),
            PipelineField::SaturationMax => self.saturation.max.to_string(),
            PipelineField::AreaMin => self.contour_area.min.to_string(),
            PipelineField::AreaMax => self.contour_area.max.to_string(),
            PipelineField::RatioMin => self.contour_ratio.min.to_string(),
            PipelineField::RatioMax => self.contour_ratio.max.to_string(),
            PipelineField::DensityMin => self.contour_density.min.to_string(),
            PipelineField::DensityMax => self.contour_density.max.to_string(),
        }
    }

    /// Parse `value` into `field`. The record is left untouched unless the
    /// result passes `validate`.
    pub fn set(&mut self, field: PipelineField, value: &str) -> Result<(), ConfigError> {
        let name = field.as_str();
        let invalid = || ConfigError::InvalidValue {
            field: name,
            value: value.to_string(),
        };
        let int = || value.trim().parse::<i32>().map_err(|_| invalid());
        let float = || {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid())
        };

        let mut next = self.clone();
        match field {
            PipelineField::PipelineMode => {
                next.pipeline_mode = value.trim().parse().map_err(|_| invalid())?
            }
            PipelineField::TargetMode => {
                next.target_mode = value.trim().parse().map_err(|_| invalid())?
            }
            PipelineField::Brightness => next.brightness = int()?,
            PipelineField::WhiteBalance => next.white_balance = int()?,
            PipelineField::Exposure => next.exposure = int()?,
            PipelineField::BlurRadius => {
                next.blur_radius = value.trim().parse::<u32>().map_err(|_| invalid())?
            }
            PipelineField::HueMin => next.hue.min = float()?,
            PipelineField::HueMax => next.hue.max = float()?,
            PipelineField::LuminanceMin => next.luminance.min = float()?,
            PipelineField::LuminanceMax => next.luminance.max = float()?,
            PipelineField::SaturationMin => next.saturation.min = float()?,
            PipelineField::SaturationMax => next.saturation.max = float()?,
            PipelineField::AreaMin => next.contour_area.min = float()?,
            PipelineField::AreaMax => next.contour_area.max = float()?,
            PipelineField::RatioMin => next.contour_ratio.min = float()?,
            PipelineField::RatioMax => next.contour_ratio.max = float()?,
            PipelineField::DensityMin => next.contour_density.min = float()?,
            PipelineField::DensityMax => next.contour_density.max = float()?,
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn field_names_round_trip() {
        for field in PipelineField::ALL {
            assert_eq!(field.as_str().parse::<PipelineField>(), Ok(field));
        }
        assert!("threshold-luminence-min".parse::<PipelineField>().is_err());
    }

    #[test]
    fn inverted_write_is_rejected_without_clamping() {
        let mut cfg = PipelineConfig::default();
        let err = cfg.set(PipelineField::HueMin, "200").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        cfg.set(PipelineField::HueMax, "90").unwrap();
        let err = cfg.set(PipelineField::HueMin, "120").unwrap_err();
        assert!(matches!(err, ConfigError::InvertedBounds { .. }));
        assert_eq!(cfg.hue, Bounds::new(0.0, 90.0));
    }

    #[test]
    fn set_parses_modes_and_numbers() {
        let mut cfg = PipelineConfig::default();
        cfg.set(PipelineField::PipelineMode, "PROCESSING").unwrap();
        cfg.set(PipelineField::TargetMode, "DUAL_VERTICAL").unwrap();
        cfg.set(PipelineField::RatioMax, "2.25").unwrap();
        assert_eq!(cfg.get(PipelineField::PipelineMode), "PROCESSING");
        assert_eq!(cfg.get(PipelineField::TargetMode), "DUAL_VERTICAL");
        assert_eq!(cfg.get(PipelineField::RatioMax), "2.25");
        assert!(cfg.set(PipelineField::TargetMode, "TRIPLE").is_err());
        assert!(cfg.set(PipelineField::Brightness, "bright").is_err());
        assert!(cfg.set(PipelineField::AreaMax, "NaN").is_err());
    }

    #[test]
    fn json_uses_screaming_case_modes() {
        let json = serde_json::to_string(&PipelineConfig::default()).unwrap();
        assert!(json.contains("\"pipeline_mode\":\"DRIVER\""));
        let parsed: PipelineConfig =
            serde_json::from_str(r#"{"target_mode":"DUAL_HORIZONTAL","brightness":80}"#).unwrap();
        assert_eq!(parsed.target_mode, TargetMode::DualHorizontal);
        assert_eq!(parsed.brightness, 80);
        assert_eq!(parsed.exposure, 5);
    }
}
