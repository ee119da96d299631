//! PNG and JPEG encoding of snapshots

use super::RasterSnapshot;
use crate::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// Lossless; identical snapshots give identical bytes.
pub fn encode_png(snapshot: &RasterSnapshot) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(&snapshot.pixels, snapshot.width, snapshot.height, ExtendedColorType::Rgba8)
        .map_err(|e| Error::Encoding(format!("PNG encoding failed: {}", e)))?;
    Ok(buf)
}

/// JPEG has no alpha channel; transparent areas are flattened onto white.
pub fn encode_jpeg(snapshot: &RasterSnapshot, quality: u8) -> Result<Vec<u8>> {
    let rgb = snapshot.to_rgb();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .write_image(&rgb, snapshot.width, snapshot.height, ExtendedColorType::Rgb8)
        .map_err(|e| Error::Encoding(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf)
}
