use crate::card;
use crate::config::Config;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Deserialize;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CropSpec {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub want_resize: bool,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("image decode failed")]
    Decode(#[source] image::ImageError),
    #[error("png encode failed")]
    Encode(#[source] image::ImageError),
    #[error("image read failed")]
    Io(#[from] std::io::Error),
}

pub fn transform_buffer(
    bytes: &[u8],
    crop: Option<CropSpec>,
    config: &Config,
) -> Result<Vec<u8>, TransformError> {
    let image = decode(bytes, config.max_decoded_pixels)?;
    finish(image, crop, config)
}

pub fn transform_file(
    path: &Path,
    crop: Option<CropSpec>,
    config: &Config,
) -> Result<Vec<u8>, TransformError> {
    let bytes = std::fs::read(path)?;
    if card::is_animated(&bytes) {
        debug!(path = %path.display(), "animated png, storing raw bytes");
        return Ok(bytes);
    }
    match decode(&bytes, config.max_decoded_pixels) {
        Ok(image) => finish(image, crop, config),
        Err(err) => {
            debug!(path = %path.display(), error = ?err, "undecodable image, storing raw bytes");
            Ok(bytes)
        }
    }
}

fn decode(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage, TransformError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(TransformError::Io)?;
    reader.limits(decode_limits(max_pixels));
    reader.decode().map_err(TransformError::Decode)
}

fn decode_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u64::from(u32::MAX)) as u32;
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_pixels.saturating_mul(4));
    limits
}

fn finish(
    image: DynamicImage,
    crop: Option<CropSpec>,
    config: &Config,
) -> Result<Vec<u8>, TransformError> {
    let (image, target) = match crop {
        Some(spec) => {
            let cropped = apply_crop(image, &spec);
            let target = if spec.want_resize {
                (config.avatar_width, config.avatar_height)
            } else {
                (spec.width.max(1), spec.height.max(1))
            };
            (cropped, target)
        }
        None => {
            let size = (image.width(), image.height());
            (image, size)
        }
    };
    encode_png(&cover(image, target.0, target.1))
}

fn apply_crop(image: DynamicImage, spec: &CropSpec) -> DynamicImage {
    if image.width() == 0 || image.height() == 0 {
        return image;
    }
    let x = spec.x.min(image.width() - 1);
    let y = spec.y.min(image.height() - 1);
    let width = spec.width.clamp(1, image.width() - x);
    let height = spec.height.clamp(1, image.height() - y);
    image.crop_imm(x, y, width, height)
}

// Cover semantics: aspect-preserving scale, center crop of the overflow.
fn cover(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    image.resize_to_fill(width, height, FilterType::Lanczos3)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(TransformError::Encode)?;
    Ok(bytes)
}
