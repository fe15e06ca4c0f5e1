use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::depth::SamplePolicy;
use crate::detect::DetectionSettings;
use crate::ingest::CaptureSettings;

const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_PUBLISH_HZ: f32 = 30.0;

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    depth: Option<SamplePolicy>,
    publish: Option<PublishConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    color_width: Option<u32>,
    color_height: Option<u32>,
    color_fps: Option<u32>,
    depth_width: Option<u32>,
    depth_height: Option<u32>,
    depth_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    iou_threshold: Option<f32>,
    confidence_threshold: Option<f32>,
    classes: Option<Vec<String>>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    max_hz: Option<f32>,
}

/// Which detection model to load and how to feed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Backend name ("stub", "tract").
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// One label per line, indexed by class id.
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub iou_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            labels_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    /// Upper bound on snapshot publications per second. 0 disables throttling.
    pub max_hz: f32,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_hz: DEFAULT_PUBLISH_HZ,
        }
    }
}

impl PublishSettings {
    pub fn min_interval(&self) -> Duration {
        if self.max_hz > 0.0 && self.max_hz.is_finite() {
            Duration::from_secs_f32(1.0 / self.max_hz)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub capture: CaptureSettings,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    /// Initial state of the detection toggle.
    pub detection_enabled: bool,
    pub depth: SamplePolicy,
    pub publish: PublishSettings,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::from_file(FusionConfigFile::default())
    }
}

impl FusionConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FUSION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FusionConfigFile) -> Self {
        let defaults = CaptureSettings::default();
        let capture = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            device: capture.device.unwrap_or(defaults.device),
            color_width: capture.color_width.unwrap_or(defaults.color_width),
            color_height: capture.color_height.unwrap_or(defaults.color_height),
            color_fps: capture.color_fps.unwrap_or(defaults.color_fps),
            depth_width: capture.depth_width.unwrap_or(defaults.depth_width),
            depth_height: capture.depth_height.unwrap_or(defaults.depth_height),
            depth_fps: capture.depth_fps.unwrap_or(defaults.depth_fps),
        };

        let detection = file.detection.unwrap_or_default();
        let model_defaults = ModelSettings::default();
        let model = ModelSettings {
            backend: detection.backend.unwrap_or(model_defaults.backend),
            model_path: detection.model_path,
            labels_path: detection.labels_path,
            input_width: detection.input_width.unwrap_or(model_defaults.input_width),
            input_height: detection.input_height.unwrap_or(model_defaults.input_height),
            iou_threshold: detection
                .iou_threshold
                .unwrap_or(model_defaults.iou_threshold),
        };
        let detection_defaults = DetectionSettings::default();
        let detection_settings = DetectionSettings {
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(detection_defaults.confidence_threshold),
            classes: detection.classes.unwrap_or_default(),
            max_detections: detection
                .max_detections
                .unwrap_or(detection_defaults.max_detections),
        };

        Self {
            capture,
            model,
            detection: detection_settings,
            detection_enabled: detection.enabled.unwrap_or(true),
            depth: file.depth.unwrap_or_default(),
            publish: PublishSettings {
                max_hz: file
                    .publish
                    .and_then(|publish| publish.max_hz)
                    .unwrap_or(DEFAULT_PUBLISH_HZ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("FUSION_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("FUSION_DETECTION_BACKEND") {
            if !backend.trim().is_empty() {
                self.model.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("FUSION_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(confidence) = std::env::var("FUSION_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("FUSION_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(classes) = std::env::var("FUSION_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.classes = parsed;
            }
        }
        if let Ok(hz) = std::env::var("FUSION_PUBLISH_HZ") {
            self.publish.max_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("FUSION_PUBLISH_HZ must be a number (0 disables throttling)"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        let iou = self.model.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!("iou threshold must be within [0, 1], got {}", iou));
        }
        if self.detection.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }

        let capture = &self.capture;
        if capture.device.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if capture.color_width == 0 || capture.color_height == 0 {
            return Err(anyhow!("color resolution must be non-zero"));
        }
        if capture.depth_width == 0 || capture.depth_height == 0 {
            return Err(anyhow!("depth resolution must be non-zero"));
        }
        if capture.color_fps == 0 || capture.depth_fps == 0 {
            return Err(anyhow!("frame rates must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }

        self.model.backend = self.model.backend.trim().to_ascii_lowercase();
        if self.model.backend == "tract" && self.model.model_path.is_none() {
            return Err(anyhow!("tract backend requires detection.model_path"));
        }

        if !self.publish.max_hz.is_finite() || self.publish.max_hz < 0.0 {
            return Err(anyhow!("publish.max_hz must be zero or a positive number"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FusionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let mut cfg = FusionConfig::from_file(FusionConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.capture, CaptureSettings::default());
        assert_eq!(cfg.model.backend, "stub");
        assert!(cfg.detection_enabled);
        assert_eq!(cfg.depth, SamplePolicy::Center);
        assert_eq!(cfg.publish.max_hz, 30.0);
    }

    #[test]
    fn parses_median_policy_from_json() {
        let file: FusionConfigFile =
            serde_json::from_str(r#"{"depth": {"policy": "median", "radius": 2}}"#).unwrap();
        let cfg = FusionConfig::from_file(file);
        assert_eq!(cfg.depth, SamplePolicy::Median { radius: 2 });
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut cfg = FusionConfig::from_file(FusionConfigFile::default());
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tract_needs_model_path() {
        let mut cfg = FusionConfig::from_file(FusionConfigFile::default());
        cfg.model.backend = "Tract".into();
        assert!(cfg.validate().is_err());
        cfg.model.model_path = Some(PathBuf::from("yolo.onnx"));
        cfg.validate().unwrap();
        assert_eq!(cfg.model.backend, "tract");
    }

    #[test]
    fn zero_hz_means_unthrottled() {
        let publish = PublishSettings { max_hz: 0.0 };
        assert_eq!(publish.min_interval(), Duration::ZERO);
        let publish = PublishSettings { max_hz: 10.0 };
        assert!((publish.min_interval().as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn split_csv_trims_entries() {
        assert_eq!(split_csv(" person, chair ,,"), vec!["person", "chair"]);
    }
}
