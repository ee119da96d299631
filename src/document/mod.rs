//! Scene serializer: turns a `Scene` into a single self-contained HTML page
//!
//! The page carries its own map runtime (projection, tile placement, overlay
//! drawing) and styling, so the only network traffic at render time is tile
//! fetches. A failed tile is hidden and never stops the render.

use crate::scene::{BaseLayer, LatLng, MapView, MarkerIcon, Overlay, Scene, Shape, ShapeStyle, TextAnnotation};
use base64::Engine as Base64Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

const RUNTIME_JS: &str = include_str!("runtime.js");
const RUNTIME_CSS: &str = include_str!("runtime.css");

/// Root attribute set by the runtime once the map object exists
pub const READY_ATTRIBUTE: &str = "data-map-ready";

/// Self-contained markup produced from a scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderDocument {
    bytes: Vec<u8>,
}

impl RenderDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 of the document bytes, hex encoded
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    view: &'a MapView,
    layers: &'a [BaseLayer],
    overlays: Vec<OverlayData<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OverlayData<'a> {
    Marker {
        position: LatLng,
        label: Option<&'a str>,
        icon: IconData<'a>,
    },
    Shape {
        shape: &'a Shape,
        style: &'a ShapeStyle,
    },
    Text(&'a TextAnnotation),
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IconData<'a> {
    Pin { color: &'a str },
    Image { src: String, width: u32, height: u32 },
}

impl<'a> IconData<'a> {
    fn from_icon(icon: &'a MarkerIcon) -> Self {
        match icon {
            MarkerIcon::Pin { color } => IconData::Pin { color },
            MarkerIcon::Image {
                mime_type,
                data,
                width,
                height,
            } => IconData::Image {
                src: format!(
                    "data:{};base64,{}",
                    mime_type,
                    base64::engine::general_purpose::STANDARD.encode(data)
                ),
                width: *width,
                height: *height,
            },
        }
    }
}

/// Serialize a scene into a renderable document.
///
/// Base layers keep their order (later layers paint on top), overlays follow,
/// and script fragments are appended last, each in its own `<script>` element
/// so they run after `window.map` exists. A fragment is embedded as a string
/// and run through global `eval`, so a syntax or runtime error stays inside
/// its own element. Equal scenes always produce byte-identical output.
pub fn serialize(scene: &Scene) -> RenderDocument {
    let overlays = scene
        .overlays
        .iter()
        .filter_map(|overlay| match overlay {
            Overlay::Marker(m) => Some(OverlayData::Marker {
                position: m.position,
                label: m.label.as_deref(),
                icon: IconData::from_icon(&m.icon),
            }),
            Overlay::Shape { shape, style } => Some(OverlayData::Shape { shape, style }),
            Overlay::Text(t) => Some(OverlayData::Text(t)),
            Overlay::Script { .. } => None,
        })
        .collect();

    let payload = Payload {
        view: &scene.view,
        layers: &scene.base_layers,
        overlays,
    };
    // Plain structs with string keys; serialization has no failure path here.
    let data = serde_json::to_string(&payload).unwrap_or_else(|_| String::from("null"));

    let mut html = String::with_capacity(RUNTIME_JS.len() + RUNTIME_CSS.len() + data.len() + 1024);
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str("<title>Map export</title>\n<style>\n");
    html.push_str(RUNTIME_CSS);
    if !scene.style_sheet.is_empty() {
        html.push_str("\n/* scene */\n");
        html.push_str(&escape_closing_tag(&scene.style_sheet, "style"));
    }
    html.push_str("\n</style>\n</head>\n<body>\n<div id=\"map\"></div>\n");

    html.push_str("<script type=\"application/json\" id=\"scene-data\">");
    html.push_str(&data.replace('<', "\\u003c"));
    html.push_str("</script>\n<script>\n");
    html.push_str(RUNTIME_JS);
    html.push_str("</script>\n");

    let fragments = scene.overlays.iter().filter_map(|o| match o {
        Overlay::Script { source } => Some(source.as_str()),
        _ => None,
    });
    for (i, source) in fragments.enumerate() {
        html.push_str("<script>\ntry {\n(0, eval)(");
        html.push_str(&script_literal(source));
        html.push_str(&format!(
            ");\n}} catch (e) {{ console.error(\"scene script {} failed:\", e); }}\n</script>\n",
            i
        ));
    }

    html.push_str("</body>\n</html>\n");
    RenderDocument {
        bytes: html.into_bytes(),
    }
}

/// A fragment as a JS string literal. No `<` survives, so nothing in the
/// source can end the element or switch the parser into a comment state.
fn script_literal(source: &str) -> String {
    serde_json::Value::from(source).to_string().replace('<', "\\u003c")
}

/// Break up `</tag` (any case) so embedded text cannot close its element.
fn escape_closing_tag(text: &str, tag: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1] == b'/' {
            let rest = &bytes[i + 2..];
            if rest.len() >= tag.len() && rest[..tag.len()].eq_ignore_ascii_case(tag.as_bytes()) {
                out.push_str(&text[last..i]);
                out.push_str("<\\/");
                last = i + 2;
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[last..]);
    out
}
