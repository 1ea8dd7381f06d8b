//! Derivative assets: thumbnails, previews and reference compression.
//!
//! Every transform decodes with EXIF orientation applied, keeps the aspect
//! ratio, never upscales and re-encodes to JPEG at a fixed quality.

use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use tracing::debug;

pub mod resize;

use crate::error::AssetError;
use resize::{decode_oriented, dimensions_for_width, dimensions_within, encode_jpeg, resize_to};

pub const DERIVATIVE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeSettings {
    pub thumbnail_width: u32,
    pub preview_width: u32,
    pub thumbnail_quality: u8,
    pub preview_quality: u8,
    pub compress_quality: u8,
    /// Inputs larger than this are re-encoded.
    pub compress_threshold_bytes: usize,
    /// Inputs with a side longer than this are downsized.
    pub max_dimension: u32,
}

impl Default for DerivativeSettings {
    fn default() -> Self {
        Self {
            thumbnail_width: 480,
            preview_width: 1600,
            thumbnail_quality: 75,
            preview_quality: 82,
            compress_quality: 90,
            compress_threshold_bytes: 5 * 1024 * 1024,
            max_dimension: 4096,
        }
    }
}

/// An encoded derivative image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
}

/// Thumbnail and preview of one original, plus the original's dimensions.
#[derive(Debug, Clone)]
pub struct DerivativeSet {
    pub original_width: u32,
    pub original_height: u32,
    pub thumbnail: Derivative,
    pub preview: Derivative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub changed: bool,
    pub original_size: usize,
    pub compressed_size: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AssetBuilder {
    settings: DerivativeSettings,
}

impl AssetBuilder {
    pub fn new(settings: DerivativeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DerivativeSettings {
        &self.settings
    }

    pub fn build_thumbnail(&self, bytes: &[u8]) -> Result<Derivative, AssetError> {
        let img = decode_oriented(bytes)?;
        self.fit_width(&img, self.settings.thumbnail_width, self.settings.thumbnail_quality)
    }

    pub fn build_preview(&self, bytes: &[u8]) -> Result<Derivative, AssetError> {
        let img = decode_oriented(bytes)?;
        self.fit_width(&img, self.settings.preview_width, self.settings.preview_quality)
    }

    /// Decodes once and produces both variants.
    pub fn build_derivatives(&self, bytes: &[u8]) -> Result<DerivativeSet, AssetError> {
        let img = decode_oriented(bytes)?;
        let (original_width, original_height) = img.dimensions();
        let thumbnail =
            self.fit_width(&img, self.settings.thumbnail_width, self.settings.thumbnail_quality)?;
        let preview =
            self.fit_width(&img, self.settings.preview_width, self.settings.preview_quality)?;
        debug!(
            original_width,
            original_height,
            thumbnail_bytes = thumbnail.bytes.len(),
            preview_bytes = preview.bytes.len(),
            "derivatives built"
        );
        Ok(DerivativeSet {
            original_width,
            original_height,
            thumbnail,
            preview,
        })
    }

    /// Re-encodes images over the byte threshold or the dimension limit.
    /// Anything else is returned untouched with `changed == false`.
    pub fn compress_if_oversized(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<CompressionResult, AssetError> {
        let original_size = bytes.len();
        let img = decode_oriented(bytes)?;
        let (width, height) = img.dimensions();

        let too_big = original_size > self.settings.compress_threshold_bytes;
        let too_wide = width > self.settings.max_dimension || height > self.settings.max_dimension;
        if !too_big && !too_wide {
            return Ok(CompressionResult {
                bytes: bytes.to_vec(),
                mime_type: mime_type.to_string(),
                changed: false,
                original_size,
                compressed_size: original_size,
                width,
                height,
            });
        }

        let (w, h) = dimensions_within(width, height, self.settings.max_dimension);
        let resized = resize_to(&img, w, h);
        let encoded = encode_jpeg(&resized, self.settings.compress_quality)?;
        debug!(
            original_size,
            compressed_size = encoded.len(),
            width = w,
            height = h,
            "reference image compressed"
        );

        Ok(CompressionResult {
            compressed_size: encoded.len(),
            bytes: encoded,
            mime_type: DERIVATIVE_MIME.to_string(),
            changed: true,
            original_size,
            width: w,
            height: h,
        })
    }

    /// [`build_derivatives`](Self::build_derivatives) on the blocking pool.
    pub async fn build_derivatives_async(
        &self,
        bytes: Arc<Vec<u8>>,
    ) -> Result<DerivativeSet, AssetError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.build_derivatives(&bytes))
            .await
            .map_err(|e| AssetError::Task(e.to_string()))?
    }

    /// [`compress_if_oversized`](Self::compress_if_oversized) on the blocking pool.
    pub async fn compress_if_oversized_async(
        &self,
        bytes: Vec<u8>,
        mime_type: String,
    ) -> Result<CompressionResult, AssetError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.compress_if_oversized(&bytes, &mime_type))
            .await
            .map_err(|e| AssetError::Task(e.to_string()))?
    }

    fn fit_width(
        &self,
        img: &DynamicImage,
        target_width: u32,
        quality: u8,
    ) -> Result<Derivative, AssetError> {
        let (w, h) = img.dimensions();
        let (tw, th) = dimensions_for_width(w, h, target_width);
        let resized = resize_to(img, tw, th);
        Ok(Derivative {
            bytes: encode_jpeg(&resized, quality)?,
            width: tw,
            height: th,
            mime_type: DERIVATIVE_MIME,
        })
    }
}
