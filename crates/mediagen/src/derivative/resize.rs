//! Decode, resize and encode helpers. All of these are CPU-bound and run
//! on the blocking pool when called from async code.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader};

use crate::error::AssetError;

/// Decodes an image and applies its EXIF orientation so that width and
/// height describe the image as displayed.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, AssetError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| AssetError::Decode(e.to_string()))?;
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| AssetError::Decode(e.to_string()))?;
    img.apply_orientation(orientation);

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(AssetError::EmptyImage);
    }
    Ok(img)
}

/// Target size for fitting `width` to `target_width`, never upscaling.
pub fn dimensions_for_width(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    if width <= target_width || width == 0 {
        return (width, height);
    }
    let ratio = target_width as f64 / width as f64;
    let new_height = ((height as f64) * ratio).round().max(1.0) as u32;
    (target_width, new_height)
}

/// Target size for fitting both sides within `max_dimension`, never upscaling.
pub fn dimensions_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let ratio = f64::min(
        max_dimension as f64 / width as f64,
        max_dimension as f64 / height as f64,
    );
    let w = ((width as f64) * ratio).round().clamp(1.0, max_dimension as f64) as u32;
    let h = ((height as f64) * ratio).round().clamp(1.0, max_dimension as f64) as u32;
    (w, h)
}

pub fn resize_to(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    img.resize_exact(width, height, FilterType::Lanczos3)
}

/// Encodes as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssetError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| AssetError::Encode(e.to_string()))?;
    Ok(buf)
}
