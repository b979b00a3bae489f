//! Core type definitions shared across the pipeline.

use serde::{Deserialize, Serialize};

/// A configured food class as exposed by `/classes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FoodClass {
    /// Index into the model's score vector
    pub id: usize,
    /// Human-readable name (e.g., "daging_rendang")
    pub name: String,
}

impl FoodClass {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Build the ordered `{id, name}` list for a class-name list
pub fn food_classes(names: &[String]) -> Vec<FoodClass> {
    names
        .iter()
        .enumerate()
        .map(|(id, name)| FoodClass::new(id, name.as_str()))
        .collect()
}

/// Square or rectangular image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 224x224, the input size of MobileNet / ViT style models
    pub fn imagenet() -> Self {
        Self::new(224, 224)
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Memory layout of the input tensor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]` (Keras / TFLite)
    #[default]
    Nhwc,
    /// `[1, 3, H, W]` (PyTorch)
    Nchw,
}

/// Declared shape of a single-image input tensor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TensorShape {
    pub size: ImageDimensions,
    pub layout: TensorLayout,
}

/// Images per inference call; the pipeline never batches inside the runtime
pub const BATCH: usize = 1;
/// Colour channels of every input tensor
pub const CHANNELS: usize = 3;

impl TensorShape {
    pub fn new(size: ImageDimensions, layout: TensorLayout) -> Self {
        Self { size, layout }
    }

    /// Dimensions in the order of the layout, batch first
    pub fn dims(&self) -> [usize; 4] {
        let h = self.size.height as usize;
        let w = self.size.width as usize;
        match self.layout {
            TensorLayout::Nhwc => [BATCH, h, w, CHANNELS],
            TensorLayout::Nchw => [BATCH, CHANNELS, h, w],
        }
    }

    /// Number of elements in a tensor of this shape
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.dims();
        write!(f, "[{}, {}, {}, {}]", a, b, c, d)
    }
}

/// Fixed-shape model input
#[derive(Debug, Clone)]
pub struct InputTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl InputTensor {
    /// Wrap `data`, checking that its length matches `shape`
    pub fn new(shape: TensorShape, data: Vec<f32>) -> crate::Result<Self> {
        if data.len() != shape.len() {
            return Err(crate::Error::ShapeMismatch {
                expected: format!("{} ({} values)", shape, shape.len()),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Raw per-class scores, in class-index order
pub type ScoreVector = Vec<f32>;

/// One ranked class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class name
    #[serde(rename = "class")]
    pub label: String,
    /// Index of the class in the configured list
    pub class_index: usize,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

/// Response payload of a single classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Top-1 class name
    pub predicted_class: String,
    /// Confidence of the top-1 class
    pub confidence: f32,
    /// Top-k ranked predictions, best first
    pub all_predictions: Vec<Prediction>,
}

impl ClassificationResult {
    /// Build from a ranked list; `None` when the list is empty
    pub fn from_ranked(ranked: Vec<Prediction>) -> Option<Self> {
        let best = ranked.first()?;
        Some(Self {
            predicted_class: best.label.clone(),
            confidence: best.confidence,
            all_predictions: ranked,
        })
    }
}
