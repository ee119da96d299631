//! Single-page PDF wrapping a snapshot
//!
//! The document is built directly as a `lopdf` object graph: one page, one
//! image XObject (DeviceRGB, Flate-compressed) and a content stream that
//! places it with a single `cm` transform.

use super::{PageSize, RasterSnapshot};
use crate::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::io::Write;

const IMAGE_NAME: &str = "Im0";

/// Where the image lands on the page, in points from the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scale the image to the largest size that fits the page without
/// distortion and centre it. Matching aspect ratios fill the page exactly.
pub fn fit_image(image_width: u32, image_height: u32, page: PageSize) -> Placement {
    let iw = image_width as f32;
    let ih = image_height as f32;
    let scale = (page.width / iw).min(page.height / ih);
    let width = iw * scale;
    let height = ih * scale;
    Placement {
        x: (page.width - width) / 2.0,
        y: (page.height - height) / 2.0,
        width,
        height,
    }
}

pub fn encode_pdf(snapshot: &RasterSnapshot, page: PageSize) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&snapshot.to_rgb())
        .map_err(|e| Error::Encoding(format!("image compression failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::Encoding(format!("image compression failed: {}", e)))?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => snapshot.width as i64,
            "Height" => snapshot.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8_i64,
            "Filter" => "FlateDecode",
        },
        compressed,
    );
    let image_id = doc.add_object(image);

    let placed = fit_image(snapshot.width, snapshot.height, page);
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    placed.width.into(),
                    0.0_f32.into(),
                    0.0_f32.into(),
                    placed.height.into(),
                    placed.x.into(),
                    placed.y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| Error::Encoding(format!("content stream encoding failed: {}", e)))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.0_f32.into(), 0.0_f32.into(), page.width.into(), page.height.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { IMAGE_NAME => image_id },
        },
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1_i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let created = snapshot.captured_at.format("D:%Y%m%d%H%M%SZ").to_string();
    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::String(format!("mapexport {}", env!("CARGO_PKG_VERSION")).into_bytes(), StringFormat::Literal),
        "CreationDate" => Object::String(created.into_bytes(), StringFormat::Literal),
    });
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| Error::Encoding(format!("PDF serialization failed: {}", e)))?;
    Ok(out)
}
