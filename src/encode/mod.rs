//! Format encoders: raster snapshot in, artifact bytes out
//!
//! Encoders work purely in memory. They never touch the rendering engine and
//! reject malformed snapshots instead of producing empty output.

pub mod pdf;
pub mod raster;

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// One captured frame of a rendered viewport
///
/// Pixels are tightly packed RGBA8 rows, top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSnapshot {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl RasterSnapshot {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            width,
            height,
            pixels,
            captured_at,
        }
    }

    /// Decode an encoded screenshot (PNG from the engine) into RGBA pixels.
    pub fn decode(encoded: &[u8], captured_at: DateTime<Utc>) -> std::result::Result<Self, image::ImageError> {
        let img = image::load_from_memory(encoded)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::new(width, height, img.into_raw(), captured_at))
    }

    fn check(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Encoding(format!(
                "snapshot has zero size ({}x{})",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(Error::Encoding(format!(
                "snapshot buffer holds {} bytes, {}x{} RGBA needs {}",
                self.pixels.len(),
                self.width,
                self.height,
                expected
            )));
        }
        Ok(())
    }

    /// RGB pixels with alpha composited over white
    pub(crate) fn to_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() / 4 * 3);
        for px in self.pixels.chunks_exact(4) {
            let a = px[3] as u32;
            for c in &px[..3] {
                out.push(((*c as u32 * a + 255 * (255 - a) + 127) / 255) as u8);
            }
        }
        out
    }
}

/// Compressed image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterEncoding {
    Png,
    Jpeg,
}

impl RasterEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            RasterEncoding::Png => "image/png",
            RasterEncoding::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RasterEncoding::Png => "png",
            RasterEncoding::Jpeg => "jpg",
        }
    }
}

impl FromStr for RasterEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(RasterEncoding::Png),
            "jpg" | "jpeg" => Ok(RasterEncoding::Jpeg),
            other => Err(Error::Validation(format!("unsupported image encoding '{}'", other))),
        }
    }
}

/// PDF page size in points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Largest page side PDF viewers are required to support
pub const MAX_PAGE_POINTS: f32 = 14_400.0;

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn a4() -> Self {
        Self::new(595.0, 842.0)
    }

    pub fn validate(&self) -> Result<()> {
        let ok = |v: f32| v.is_finite() && v > 0.0 && v <= MAX_PAGE_POINTS;
        if !ok(self.width) || !ok(self.height) {
            return Err(Error::Validation(format!(
                "page size {}x{}pt outside (0, {}]",
                self.width, self.height, MAX_PAGE_POINTS
            )));
        }
        Ok(())
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::new(700.0, 500.0)
    }
}

/// What the encoder should produce from a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodeTarget {
    Raster(RasterEncoding),
    Document(PageSize),
}

/// Snapshot encoder with its fixed settings
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    pub jpeg_quality: u8,
}

impl Default for Encoder {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

impl Encoder {
    pub fn encode(&self, snapshot: &RasterSnapshot, target: EncodeTarget) -> Result<Vec<u8>> {
        snapshot.check()?;
        let bytes = match target {
            EncodeTarget::Raster(RasterEncoding::Png) => raster::encode_png(snapshot)?,
            EncodeTarget::Raster(RasterEncoding::Jpeg) => raster::encode_jpeg(snapshot, self.jpeg_quality)?,
            EncodeTarget::Document(page) => {
                page.validate()?;
                pdf::encode_pdf(snapshot, page)?
            }
        };
        if bytes.is_empty() {
            return Err(Error::Encoding("encoder produced no output".into()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
pub(crate) fn solid_snapshot(width: u32, height: u32, rgba: [u8; 4]) -> RasterSnapshot {
    let pixels = rgba.iter().copied().cycle().take(width as usize * height as usize * 4).collect();
    RasterSnapshot::new(width, height, pixels, Utc::now())
}
