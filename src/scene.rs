//! Declarative description of a map view and everything drawn on it
//!
//! A `Scene` is plain data. It is built by the caller (or deserialized from
//! JSON by the CLI) and handed to the pipeline by shared reference; nothing in
//! this crate mutates it.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Highest zoom level accepted for a view
pub const MAX_ZOOM: u8 = 22;

/// Largest accepted width or height in pixels
pub const MAX_DIMENSION: u32 = 8192;

/// A geographic position in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::Validation(format!("{}: latitude {} out of range", what, self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::Validation(format!("{}: longitude {} out of range", what, self.lng)));
        }
        Ok(())
    }
}

/// The visible region of the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: LatLng,
    pub zoom: u8,
    /// Pixel width used when an export request does not override it
    pub width: u32,
    /// Pixel height used when an export request does not override it
    pub height: u32,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: LatLng::new(0.0, 0.0),
            zoom: 2,
            width: 700,
            height: 500,
        }
    }
}

/// Where tiles for a base layer come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSource {
    /// URL template with `{z}`, `{x}` and `{y}` placeholders and an optional
    /// `{s}` subdomain placeholder
    pub url_template: String,
    #[serde(default)]
    pub subdomains: Vec<String>,
    #[serde(default)]
    pub attribution: String,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
}

fn default_max_zoom() -> u8 {
    19
}

impl TileSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            subdomains: Vec::new(),
            attribution: String::new(),
            max_zoom: default_max_zoom(),
        }
    }

    /// The public OpenStreetMap tile server
    pub fn openstreetmap() -> Self {
        Self {
            url_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            subdomains: Vec::new(),
            attribution: "\u{a9} OpenStreetMap contributors".to_string(),
            max_zoom: 19,
        }
    }
}

/// A tile layer painted beneath the overlays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseLayer {
    pub source: TileSource,
    pub name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_true() -> bool {
    true
}

fn default_opacity() -> f64 {
    1.0
}

impl BaseLayer {
    pub fn new(name: impl Into<String>, source: TileSource) -> Self {
        Self {
            source,
            name: name.into(),
            visible: true,
            opacity: 1.0,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// How a marker is drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerIcon {
    /// Teardrop pin drawn with inline SVG
    Pin { color: String },
    /// Caller supplied image, embedded into the document as a data URI
    Image {
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
}

impl Default for MarkerIcon {
    fn default() -> Self {
        MarkerIcon::Pin {
            color: "#2a81cb".to_string(),
        }
    }
}

/// A point of interest with an optional label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub position: LatLng,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: MarkerIcon,
}

impl Marker {
    pub fn new(position: LatLng) -> Self {
        Self {
            position,
            label: None,
            icon: MarkerIcon::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Stroke and fill used by shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    pub stroke: String,
    pub stroke_width: f64,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default = "default_fill_opacity")]
    pub fill_opacity: f64,
}

fn default_fill_opacity() -> f64 {
    0.2
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke: "#3388ff".to_string(),
            stroke_width: 3.0,
            fill: None,
            fill_opacity: default_fill_opacity(),
        }
    }
}

/// Drawn geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Polyline { points: Vec<LatLng> },
    Polygon { points: Vec<LatLng> },
    Circle { center: LatLng, radius_m: f64 },
    Rectangle { south_west: LatLng, north_east: LatLng },
}

/// Free text placed at a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub position: LatLng,
    pub text: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "default_text_color")]
    pub color: String,
}

fn default_font_size() -> f64 {
    14.0
}

fn default_text_color() -> String {
    "#222222".to_string()
}

/// Anything drawn on top of the base layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Overlay {
    Marker(Marker),
    Shape {
        shape: Shape,
        #[serde(default)]
        style: ShapeStyle,
    },
    Text(TextAnnotation),
    /// Script fragment run after the map object exists (`window.map`)
    Script { source: String },
}

/// A complete map scene
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub view: MapView,
    #[serde(default)]
    pub base_layers: Vec<BaseLayer>,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    /// CSS appended after the built-in styles
    #[serde(default)]
    pub style_sheet: String,
}

impl Scene {
    pub fn new(view: MapView) -> Self {
        Self {
            view,
            ..Default::default()
        }
    }

    pub fn with_base_layer(mut self, layer: BaseLayer) -> Self {
        self.base_layers.push(layer);
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.overlays.push(Overlay::Marker(marker));
        self
    }

    pub fn with_shape(mut self, shape: Shape, style: ShapeStyle) -> Self {
        self.overlays.push(Overlay::Shape { shape, style });
        self
    }

    pub fn with_text(mut self, text: TextAnnotation) -> Self {
        self.overlays.push(Overlay::Text(text));
        self
    }

    pub fn with_script(mut self, source: impl Into<String>) -> Self {
        self.overlays.push(Overlay::Script {
            source: source.into(),
        });
        self
    }

    pub fn with_style_sheet(mut self, css: impl Into<String>) -> Self {
        self.style_sheet = css.into();
        self
    }

    /// Reject scenes the serializer cannot faithfully express.
    pub fn validate(&self) -> Result<()> {
        self.view.center.validate("view center")?;
        if self.view.zoom > MAX_ZOOM {
            return Err(Error::Validation(format!(
                "zoom {} exceeds maximum {}",
                self.view.zoom, MAX_ZOOM
            )));
        }
        validate_dimensions(self.view.width, self.view.height)?;

        for (i, layer) in self.base_layers.iter().enumerate() {
            let tpl = &layer.source.url_template;
            for placeholder in ["{z}", "{x}", "{y}"] {
                if !tpl.contains(placeholder) {
                    return Err(Error::Validation(format!(
                        "base layer {} ('{}'): url template lacks {}",
                        i, layer.name, placeholder
                    )));
                }
            }
            if tpl.contains("{s}") && layer.source.subdomains.is_empty() {
                return Err(Error::Validation(format!(
                    "base layer {} ('{}'): {{s}} used without subdomains",
                    i, layer.name
                )));
            }
            if !layer.opacity.is_finite() || !(0.0..=1.0).contains(&layer.opacity) {
                return Err(Error::Validation(format!(
                    "base layer {} ('{}'): opacity {} not within 0..=1",
                    i, layer.name, layer.opacity
                )));
            }
        }

        for (i, overlay) in self.overlays.iter().enumerate() {
            let what = format!("overlay {}", i);
            match overlay {
                Overlay::Marker(m) => {
                    m.position.validate(&what)?;
                    if let MarkerIcon::Image { data, width, height, .. } = &m.icon {
                        if data.is_empty() || *width == 0 || *height == 0 {
                            return Err(Error::Validation(format!("{}: empty marker image", what)));
                        }
                    }
                }
                Overlay::Shape { shape, style } => {
                    if !style.stroke_width.is_finite() || style.stroke_width < 0.0 {
                        return Err(Error::Validation(format!("{}: invalid stroke width", what)));
                    }
                    match shape {
                        Shape::Polyline { points } | Shape::Polygon { points } => {
                            if points.len() < 2 {
                                return Err(Error::Validation(format!("{}: shape needs at least two points", what)));
                            }
                            for p in points {
                                p.validate(&what)?;
                            }
                        }
                        Shape::Circle { center, radius_m } => {
                            center.validate(&what)?;
                            if !radius_m.is_finite() || *radius_m <= 0.0 {
                                return Err(Error::Validation(format!("{}: circle radius must be positive", what)));
                            }
                        }
                        Shape::Rectangle { south_west, north_east } => {
                            south_west.validate(&what)?;
                            north_east.validate(&what)?;
                        }
                    }
                }
                Overlay::Text(t) => {
                    t.position.validate(&what)?;
                    if !t.font_size.is_finite() || t.font_size <= 0.0 {
                        return Err(Error::Validation(format!("{}: invalid font size", what)));
                    }
                }
                Overlay::Script { .. } => {}
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::Validation(format!(
            "dimensions {}x{} outside 1..={}",
            width, height, MAX_DIMENSION
        )));
    }
    Ok(())
}

mod base64_bytes {
    use base64::Engine as Base64Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
