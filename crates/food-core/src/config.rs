//! Configuration structures for the classification service.
//!
//! A `ServiceConfig` is built once at process start, from a built-in preset,
//! an optional TOML file and command-line/environment overrides, and is
//! immutable afterwards.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ImageDimensions, TensorLayout, TensorShape};
use crate::{Error, Result};

/// 10 MiB, the per-file upload limit
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Room for multipart boundaries and headers on top of the file bytes
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Number of ranked predictions returned by default
pub const DEFAULT_TOP_K: usize = 3;

/// Default header carrying the pre-shared key
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Minangkabau dishes, in the output order of the MobileNetV3 model
pub const MINANG_CLASSES: [&str; 9] = [
    "ayam_goreng",
    "ayam_pop",
    "daging_rendang",
    "dendeng_batokok",
    "gulai_ikan",
    "gulai_tambusu",
    "gulai_tunjang",
    "telur_balado",
    "telur_dadar",
];

/// Tempeh ripeness stages, in the output order of the ViT model
pub const TEMPEH_CLASSES: [&str; 3] = ["mentah", "setengah_matang", "matang"];

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service metadata
    pub service: ServiceInfo,
    /// API-key gate
    pub auth: AuthConfig,
    /// Model location and runtime behaviour
    pub model: ModelConfig,
    /// Tensor normalisation
    pub preprocess: PreprocessConfig,
    /// Upload limits
    pub limits: UploadLimits,
    /// Class names, in model output order
    pub classes: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::minang()
    }
}

impl ServiceConfig {
    /// Minangkabau food classifier (Keras MobileNetV3, inputs scaled to [0, 1])
    pub fn minang() -> Self {
        Self {
            service: ServiceInfo::default(),
            auth: AuthConfig::default(),
            model: ModelConfig::default(),
            preprocess: PreprocessConfig::default(),
            limits: UploadLimits::default(),
            classes: MINANG_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Tempeh ripeness classifier (PyTorch ViT, logits, mean/std 0.5)
    pub fn tempeh() -> Self {
        Self {
            service: ServiceInfo {
                title: "Tempeh Ripeness Classification API".to_string(),
                description: "Classifies tempeh fermentation stage from a photo".to_string(),
                version: "1.0.0".to_string(),
            },
            model: ModelConfig {
                path: PathBuf::from("models/tempeh_vit.onnx"),
                layout: TensorLayout::Nchw,
                activation: Activation::Softmax,
                ..ModelConfig::default()
            },
            preprocess: PreprocessConfig {
                normalization: Normalization::MeanStd {
                    mean: [0.5, 0.5, 0.5],
                    std: [0.5, 0.5, 0.5],
                },
            },
            classes: TEMPEH_CLASSES.iter().map(|s| s.to_string()).collect(),
            ..Self::minang()
        }
    }

    /// Declared input shape of the model
    pub fn input_shape(&self) -> TensorShape {
        TensorShape::new(self.model.input_size, self.model.layout)
    }

    /// Rejects configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(Error::Config("at least one class name is required".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.classes {
            if name.trim().is_empty() {
                return Err(Error::Config("class names must not be empty".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("duplicate class name '{}'", name)));
            }
        }
        if self.model.top_k == 0 {
            return Err(Error::Config("model.top_k must be at least 1".into()));
        }
        if self.model.input_size.width == 0 || self.model.input_size.height == 0 {
            return Err(Error::Config(format!(
                "model.input_size must be non-zero, got {}",
                self.model.input_size
            )));
        }
        if self.limits.max_upload_bytes == 0 || self.limits.max_batch_files == 0 {
            return Err(Error::Config("upload limits must be non-zero".into()));
        }
        if self.auth.api_key.is_empty() {
            return Err(Error::Config(
                "an API key is required (set API_KEY or auth.api_key)".into(),
            ));
        }
        if self.auth.header_name.trim().is_empty() {
            return Err(Error::Config("auth.header_name must not be empty".into()));
        }
        self.preprocess.normalization.validate()
    }

    /// Largest batch request body the HTTP layer should accept
    pub fn max_request_bytes(&self) -> usize {
        self.limits
            .max_upload_bytes
            .saturating_mul(self.limits.max_batch_files)
            .saturating_add(MULTIPART_OVERHEAD)
    }

    /// Largest single-file request body the HTTP layer should accept
    pub fn max_single_request_bytes(&self) -> usize {
        self.limits.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)
    }
}

/// Load a `ServiceConfig` from a TOML file; missing sections keep defaults
pub fn load_toml_config(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Service metadata reported by `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub title: String,
    pub description: String,
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            title: "Minangkabau Food Classification API".to_string(),
            description: "Classifies Minangkabau dishes using MobileNetV3".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// Pre-shared key authentication
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// The key clients must present
    pub api_key: String,
    /// Header carrying the key (matched case-insensitively)
    pub header_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            header_name: DEFAULT_API_KEY_HEADER.to_string(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &"<redacted>")
            .field("header_name", &self.header_name)
            .finish()
    }
}

/// When the model is loaded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// At process start; startup fails if the model cannot be loaded
    #[default]
    Eager,
    /// On the first inference call
    Lazy,
}

impl std::fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPolicy::Eager => write!(f, "eager"),
            LoadPolicy::Lazy => write!(f, "lazy"),
        }
    }
}

/// Whether inference calls may overlap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// The runtime handle is used from many threads at once
    #[default]
    Concurrent,
    /// One inference at a time, for runtimes that are not thread-safe
    Serialized,
}

/// Transformation applied to raw model outputs before ranking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Outputs are already probabilities
    #[default]
    None,
    /// Outputs are logits
    Softmax,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the ONNX model file
    pub path: PathBuf,
    pub load_policy: LoadPolicy,
    pub inference_mode: InferenceMode,
    /// Spatial input size
    pub input_size: ImageDimensions,
    pub layout: TensorLayout,
    pub activation: Activation,
    /// Number of ranked predictions per image
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/minang_food.onnx"),
            load_policy: LoadPolicy::Eager,
            inference_mode: InferenceMode::Concurrent,
            input_size: ImageDimensions::imagenet(),
            layout: TensorLayout::Nhwc,
            activation: Activation::None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Pixel normalisation scheme
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 255`, values in [0, 1]
    #[default]
    Scale,
    /// `(x / 255 - mean[c]) / std[c]`
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    pub fn imagenet() -> Self {
        Normalization::MeanStd {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Normalization::MeanStd { mean, std } = self {
            if std.iter().any(|s| !s.is_finite() || *s == 0.0) {
                return Err(Error::Config(format!(
                    "normalization std values must be finite and non-zero, got {:?}",
                    std
                )));
            }
            if mean.iter().any(|m| !m.is_finite()) {
                return Err(Error::Config(format!(
                    "normalization mean values must be finite, got {:?}",
                    mean
                )));
            }
        }
        Ok(())
    }

    /// Normalise one 8-bit channel value
    #[inline]
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        let unit = value as f32 / 255.0;
        match self {
            Normalization::Scale => unit,
            Normalization::MeanStd { mean, std } => (unit - mean[channel]) / std[channel],
        }
    }
}

/// Preprocessing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub normalization: Normalization,
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    /// Per-file size limit in bytes
    pub max_upload_bytes: usize,
    /// Files accepted by one batch request
    pub max_batch_files: usize,
    /// Accepted declared content types
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_batch_files: 16,
            allowed_content_types: ["image/jpeg", "image/jpg", "image/png", "image/webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
