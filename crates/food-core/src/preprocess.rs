//! Image preprocessing: resize and normalise a decoded bitmap into the
//! model's input tensor.
//!
//! Resizing is an exact (non aspect-preserving) resize with the bilinear
//! `Triangle` filter, so the same input always yields the same tensor.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::config::Normalization;
use crate::decode::DecodedImage;
use crate::types::{InputTensor, TensorLayout, TensorShape};
use crate::{Error, Result};

/// Interpolation used for every resize
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Converts decoded images into model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    shape: TensorShape,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(shape: TensorShape, normalization: Normalization) -> Result<Self> {
        if shape.size.width == 0 || shape.size.height == 0 {
            return Err(Error::Config(format!(
                "target size must be non-zero, got {}",
                shape.size
            )));
        }
        normalization.validate()?;
        Ok(Self {
            shape,
            normalization,
        })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    /// Resize to the target size and normalise into the configured layout
    pub fn prepare(&self, image: &DecodedImage) -> Result<InputTensor> {
        let resized = self.resize(image.pixels());

        let target = self.shape.size;
        if resized.width() != target.width || resized.height() != target.height {
            return Err(Error::ShapeMismatch {
                expected: target.to_string(),
                actual: format!("{}x{}", resized.width(), resized.height()),
            });
        }

        let data = match self.shape.layout {
            TensorLayout::Nhwc => self.normalize_hwc(&resized),
            TensorLayout::Nchw => self.normalize_chw(&resized),
        };
        InputTensor::new(self.shape, data)
    }

    fn resize(&self, image: &RgbImage) -> RgbImage {
        let target = self.shape.size;
        if image.width() == target.width && image.height() == target.height {
            return image.clone();
        }
        imageops::resize(image, target.width, target.height, RESIZE_FILTER)
    }

    /// Interleaved layout: R, G, B of pixel 0, then pixel 1, ...
    fn normalize_hwc(&self, image: &RgbImage) -> Vec<f32> {
        image
            .as_raw()
            .chunks_exact(3)
            .flat_map(|px| (0..3).map(move |c| (px[c], c)))
            .map(|(value, c)| self.normalization.apply(value, c))
            .collect()
    }

    /// Planar layout: all R values, then all G values, then all B values
    fn normalize_chw(&self, image: &RgbImage) -> Vec<f32> {
        let num_pixels = (image.width() * image.height()) as usize;
        let mut normalized = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in image.pixels().enumerate() {
            normalized[i] = self.normalization.apply(pixel[0], 0);
            normalized[num_pixels + i] = self.normalization.apply(pixel[1], 1);
            normalized[2 * num_pixels + i] = self.normalization.apply(pixel[2], 2);
        }

        normalized
    }
}
