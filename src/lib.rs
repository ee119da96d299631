//! Map scene export
//!
//! Turns a declarative map [`Scene`] into a static artifact: a self-contained
//! HTML page, a PNG or JPEG image, or a single-page PDF. Raster and PDF
//! exports load the serialized scene into a headless browser, wait for it to
//! settle, take one screenshot and re-encode it.
//!
//! # Features
//!
//! - **CDP Backend** (default): Uses Chrome DevTools Protocol via headless Chrome
//! - **Pluggable engines**: the [`Engine`] and [`Launcher`] traits let callers
//!   (and tests) drive the pipeline with any backend
//! - **Scoped resources**: engine instances and temporary documents are
//!   released on every exit path
//!
//! # Example
//!
//! ```no_run
//! use mapexport::{ExportFormat, ExportRequest, Exporter, RasterEncoding};
//! use mapexport::scene::{BaseLayer, LatLng, MapView, Marker, Scene, TileSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scene = Scene::new(MapView { center: LatLng::new(40.0, -74.0), zoom: 11, ..Default::default() })
//!     .with_base_layer(BaseLayer::new("OpenStreetMap", TileSource::openstreetmap()))
//!     .with_marker(Marker::new(LatLng::new(40.0, -74.0)).with_label("Start"));
//!
//! let exporter = Exporter::new(Default::default());
//! let request = ExportRequest::new(ExportFormat::RasterImage { encoding: RasterEncoding::Png });
//! let artifact = exporter.export(&scene, &request)?;
//! std::fs::write(&artifact.filename, &artifact.bytes)?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{CleanupResource, CleanupWarning, Error, ErrorKind, Result};

pub mod scene;
pub use scene::Scene;

pub mod document;
pub use document::{serialize, RenderDocument};

pub mod encode;
pub use encode::{PageSize, RasterEncoding, RasterSnapshot};

pub mod session;
pub use session::{RenderOptions, Rendered};

pub mod export;
pub use export::{ExportArtifact, ExportConfig, ExportFormat, ExportRequest, ExportStage, Exporter};

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly exporter (worker-thread backed)
pub mod async_api;
pub use async_api::AsyncExporter;

/// Configuration for a headless engine instance
///
/// Defaults are conservative: sandboxing stays on and the user agent
/// identifies this crate, which public tile servers require.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// User agent string sent with tile requests
    pub user_agent: String,
    /// Viewport dimensions; the snapshot has exactly this size
    pub viewport: Viewport,
    /// Longest the engine is expected to live, in milliseconds. Backends may
    /// treat a connection that stays silent this long as dead.
    pub timeout_ms: u64,
    /// Explicit browser executable; autodetected when `None`
    pub browser_path: Option<PathBuf>,
    /// Whether to keep the browser sandbox enabled
    pub sandbox: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("mapexport/{} (+headless)", env!("CARGO_PKG_VERSION")),
            viewport: Viewport::default(),
            timeout_ms: 10_000,
            browser_path: None,
            sandbox: true,
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 700,
            height: 500,
        }
    }
}

/// Result of JavaScript execution
///
/// `value` is the serialized result of the evaluation (usually a JSON-like
/// string). `is_error` indicates whether the script threw an exception.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    /// Serialized result value
    pub value: String,
    /// Whether the script threw an error
    pub is_error: bool,
}

/// Core trait for headless engine implementations
///
/// Every page call takes a `timeout` and must return within it, with
/// [`Error::RenderTimeout`] when the page did not answer in time. The render
/// session hands each call only what is left of its deadline.
pub trait Engine {
    /// Launch a new engine instance with the given configuration
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Navigate to a URL and wait for the navigation to commit.
    fn load_url(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate JavaScript in the page context
    fn evaluate_script(&mut self, script: &str, timeout: Duration) -> Result<ScriptResult>;

    /// Capture the viewport as a PNG image
    fn render_png(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Close the engine and clean up resources
    fn close(self) -> Result<()>;
}

/// Starts engine instances for render sessions
///
/// Every render session asks its launcher for a fresh engine; instances are
/// never shared between sessions.
pub trait Launcher: Send + Sync {
    type Engine: Engine;

    fn launch(&self, config: EngineConfig) -> Result<Self::Engine>;
}

/// Launcher that calls [`Engine::new`] for a concrete engine type
pub struct EngineLauncher<E> {
    _engine: std::marker::PhantomData<fn() -> E>,
}

impl<E> EngineLauncher<E> {
    pub fn new() -> Self {
        Self {
            _engine: std::marker::PhantomData,
        }
    }
}

impl<E> Default for EngineLauncher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Launcher for EngineLauncher<E> {
    type Engine = E;

    fn launch(&self, config: EngineConfig) -> Result<E> {
        E::new(config)
    }
}

/// Launcher for the headless Chrome backend
#[cfg(feature = "cdp")]
pub type CdpLauncher = EngineLauncher<cdp::CdpEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.viewport.width, 700);
        assert_eq!(config.viewport.height, 500);
        assert!(config.sandbox);
        assert!(config.user_agent.starts_with("mapexport/"));
    }
}
