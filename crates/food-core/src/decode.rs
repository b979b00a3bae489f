//! Upload validation and image decoding.
//!
//! Every accepted upload ends up as an 8-bit RGB bitmap, whatever the source
//! colour mode (grayscale, RGBA, palette, CMYK, 16-bit).

use std::io::Cursor;

use image::{ImageFormat, ImageReader, RgbImage};

use crate::config::UploadLimits;
use crate::{Error, Result};

/// Image formats the decoder accepts
pub const SUPPORTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// An uploaded file, as received
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    /// Declared filename
    pub filename: Option<String>,
    /// Declared MIME type
    pub content_type: Option<String>,
}

impl RawUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            filename: None,
            content_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Filename for logs and responses
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

/// A decoded, colour-normalised bitmap
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
    /// Format detected from the bytes
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn new(pixels: RgbImage, format: ImageFormat) -> Self {
        Self { pixels, format }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Validates uploads and decodes them to RGB
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    max_bytes: usize,
    allowed_content_types: Vec<String>,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(&UploadLimits::default())
    }
}

impl ImageDecoder {
    pub fn new(limits: &UploadLimits) -> Self {
        Self {
            max_bytes: limits.max_upload_bytes,
            allowed_content_types: limits
                .allowed_content_types
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Cheap checks that run before any decoding: size and declared type
    pub fn validate(&self, upload: &RawUpload) -> Result<()> {
        if upload.bytes.len() > self.max_bytes {
            return Err(Error::PayloadTooLarge {
                size: upload.bytes.len(),
                limit: self.max_bytes,
            });
        }
        if upload.bytes.is_empty() {
            return Err(Error::InvalidImage("file is empty".to_string()));
        }

        if let Some(declared) = upload.content_type.as_deref() {
            // Parameters such as "; charset=..." are irrelevant for images
            let essence = declared
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            let deferred = essence.is_empty() || essence == "application/octet-stream";
            if !deferred && !self.allowed_content_types.iter().any(|t| *t == essence) {
                return Err(Error::InvalidImage(format!(
                    "content type '{}' is not allowed (expected one of: {})",
                    declared,
                    self.allowed_content_types.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Validate, sniff the format and decode to RGB8
    pub fn decode(&self, upload: &RawUpload) -> Result<DecodedImage> {
        self.validate(upload)?;
        decode_bytes(&upload.bytes)
    }
}

/// Decode raw bytes of a supported format to RGB8
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;

    let format = reader
        .format()
        .ok_or_else(|| Error::InvalidImage("unrecognised image format".to_string()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(Error::InvalidImage(format!(
            "unsupported image format {:?} (expected JPEG, PNG or WEBP)",
            format
        )));
    }

    let image = reader.decode()?;
    Ok(DecodedImage::new(image.to_rgb8(), format))
}
