//! Image decoding and encoding for slide sources.
//!
//! Sources hand out encoded bytes so that remote implementations can pass
//! through whatever their backend serves. Decoding guesses the format from
//! the content; encoding always produces lossless PNG so that local sources
//! do not add compression artifacts to the pixels being scored.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ImageEncoder, ImageReader, RgbImage};

use crate::error::SourceError;

/// Decode PNG or JPEG bytes into an 8-bit RGB raster.
///
/// Alpha and grayscale inputs are converted to RGB.
pub fn decode_rgb(source: &[u8]) -> Result<RgbImage, SourceError> {
    let reader = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| SourceError::Decode {
            message: e.to_string(),
        })?;

    let img = reader.decode().map_err(|e| SourceError::Decode {
        message: e.to_string(),
    })?;

    Ok(img.into_rgb8())
}

/// Encode an RGB raster as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Bytes, SourceError> {
    let mut output = Vec::new();
    PngEncoder::new(&mut output)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| SourceError::Encode {
            message: e.to_string(),
        })?;
    Ok(Bytes::from(output))
}

/// Resize to exactly `width × height`, returning the input untouched when it
/// already has that size.
pub fn resize_exact(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width.max(1), height.max(1), FilterType::Triangle)
}
