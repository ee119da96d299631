//! Export orchestrator: the public entry point of the pipeline
//!
//! ```text
//! Validating -> Serializing -> Rendering -> Encoding -> Done
//!                          \-> DirectMarkup ---------/
//! any stage -> Failed (original error kind preserved)
//! ```

use crate::document::serialize;
use crate::encode::{EncodeTarget, Encoder, PageSize, RasterEncoding};
use crate::scene::validate_dimensions;
use crate::session::{self, RenderOptions, DEFAULT_CAPTURE_TIMEOUT_MS};
use crate::{CleanupWarning, EngineConfig, Error, ErrorKind, Launcher, Result, Scene, Viewport};
use log::{debug, error, info, warn};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Requested artifact kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportFormat {
    /// The serialized scene itself; no rendering involved
    Markup,
    RasterImage { encoding: RasterEncoding },
    /// One PDF page holding the snapshot
    Document { page: PageSize },
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Markup => "text/html",
            ExportFormat::RasterImage { encoding } => encoding.mime_type(),
            ExportFormat::Document { .. } => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markup => "html",
            ExportFormat::RasterImage { encoding } => encoding.extension(),
            ExportFormat::Document { .. } => "pdf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    /// Parses the format selector: `html`, `png`, `jpeg` or `pdf`.
    /// Documents get the default page size.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" | "markup" => Ok(ExportFormat::Markup),
            "pdf" | "document" => Ok(ExportFormat::Document {
                page: PageSize::default(),
            }),
            other => other
                .parse::<RasterEncoding>()
                .map(|encoding| ExportFormat::RasterImage { encoding })
                .map_err(|_| Error::Validation(format!("unsupported export format '{}'", s))),
        }
    }
}

/// One export call's parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    /// Pixel width override; the scene's view width otherwise
    pub width: Option<u32>,
    /// Pixel height override; the scene's view height otherwise
    pub height: Option<u32>,
    /// Names temporary resources; `[A-Za-z0-9_-]{1,64}`
    pub correlation_id: String,
}

impl ExportRequest {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            correlation_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    fn validate(&self) -> Result<()> {
        let id = &self.correlation_id;
        let id_ok = !id.is_empty()
            && id.len() <= 64
            && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !id_ok {
            return Err(Error::Validation(format!("invalid correlation id '{}'", id)));
        }
        if let ExportFormat::Document { page } = &self.format {
            page.validate()?;
        }
        Ok(())
    }
}

/// Final export result
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// `map-<random id>.<ext>`, unique per export
    pub filename: String,
    /// Teardown problems that did not affect the artifact
    pub warnings: Vec<CleanupWarning>,
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Validating,
    Serializing,
    Rendering,
    Encoding,
    DirectMarkup,
    Done,
    Failed,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Validating => "validating",
            ExportStage::Serializing => "serializing",
            ExportStage::Rendering => "rendering",
            ExportStage::Encoding => "encoding",
            ExportStage::DirectMarkup => "direct-markup",
            ExportStage::Done => "done",
            ExportStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Exporter configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Fixed wait after the map is built and before capture, in milliseconds.
    /// Tiles arriving later are missing from the snapshot; raising this costs
    /// latency on every raster or document export.
    pub settle_ms: u64,
    /// Deadline for loading the document and building the map, in milliseconds
    pub load_timeout_ms: u64,
    /// Time allowed for the screenshot after settling, in milliseconds. A
    /// render that overruns `settle_ms + capture_timeout_ms` is a timeout.
    pub capture_timeout_ms: u64,
    /// JPEG quality, 1..=100
    pub jpeg_quality: u8,
    /// Extra launch attempts after an engine launch failure
    pub launch_retries: u32,
    /// Directory for staged documents; the system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
    /// Base engine settings (user agent, browser path, sandbox)
    pub engine: EngineConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1_500,
            load_timeout_ms: 10_000,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
            jpeg_quality: 90,
            launch_retries: 0,
            scratch_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Runs exports. Holds no per-export state, so one exporter can serve
/// concurrent calls from several threads.
pub struct Exporter<L> {
    launcher: L,
    config: ExportConfig,
}

#[cfg(feature = "cdp")]
impl Exporter<crate::CdpLauncher> {
    /// Exporter backed by headless Chrome
    pub fn new(config: ExportConfig) -> Self {
        Self::with_launcher(crate::CdpLauncher::new(), config)
    }
}

impl<L: Launcher> Exporter<L> {
    pub fn with_launcher(launcher: L, config: ExportConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Export a scene. Either a complete artifact comes back or an error does;
    /// every resource acquired along the way has been released by then.
    pub fn export(&self, scene: &Scene, request: &ExportRequest) -> Result<ExportArtifact> {
        let started = Instant::now();
        let mut stage = ExportStage::Validating;
        match self.run(scene, request, &mut stage) {
            Ok(artifact) => {
                advance(&mut stage, ExportStage::Done, &request.correlation_id);
                for w in &artifact.warnings {
                    warn!("[{}] {}", request.correlation_id, w);
                }
                info!(
                    "[{}] exported {} ({} bytes) in {}ms",
                    request.correlation_id,
                    artifact.filename,
                    artifact.bytes.len(),
                    started.elapsed().as_millis()
                );
                Ok(artifact)
            }
            Err(e) => {
                error!(
                    "[{}] export failed while {}: {}",
                    request.correlation_id, stage, e
                );
                advance(&mut stage, ExportStage::Failed, &request.correlation_id);
                Err(e)
            }
        }
    }

    fn run(&self, scene: &Scene, request: &ExportRequest, stage: &mut ExportStage) -> Result<ExportArtifact> {
        let id = &request.correlation_id;

        request.validate()?;
        scene.validate()?;
        let viewport = Viewport {
            width: request.width.unwrap_or(scene.view.width),
            height: request.height.unwrap_or(scene.view.height),
        };
        validate_dimensions(viewport.width, viewport.height)?;
        let jpeg = ExportFormat::RasterImage {
            encoding: RasterEncoding::Jpeg,
        };
        if request.format == jpeg && !(1..=100).contains(&self.config.jpeg_quality) {
            return Err(Error::Validation(format!(
                "jpeg quality {} outside 1..=100",
                self.config.jpeg_quality
            )));
        }

        advance(stage, ExportStage::Serializing, id);
        let document = serialize(scene);
        debug!("[{}] document {} bytes, sha256 {}", id, document.len(), document.fingerprint());

        let target = match request.format {
            ExportFormat::Markup => {
                advance(stage, ExportStage::DirectMarkup, id);
                return Ok(self.artifact(request.format, document.into_bytes(), Vec::new()));
            }
            ExportFormat::RasterImage { encoding } => EncodeTarget::Raster(encoding),
            ExportFormat::Document { page } => EncodeTarget::Document(page),
        };

        advance(stage, ExportStage::Rendering, id);
        let options = RenderOptions {
            viewport,
            load_timeout: Duration::from_millis(self.config.load_timeout_ms),
            settle: Duration::from_millis(self.config.settle_ms),
            capture_timeout: Duration::from_millis(self.config.capture_timeout_ms),
            correlation_id: id.clone(),
            scratch_dir: self
                .config
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            engine: self.config.engine.clone(),
        };
        let rendered = self.render_with_retries(&document, &options)?;
        drop(document);

        advance(stage, ExportStage::Encoding, id);
        let encoder = Encoder {
            jpeg_quality: self.config.jpeg_quality,
        };
        let bytes = encoder.encode(&rendered.snapshot, target)?;
        Ok(self.artifact(request.format, bytes, rendered.warnings))
    }

    fn render_with_retries(
        &self,
        document: &crate::RenderDocument,
        options: &RenderOptions,
    ) -> Result<session::Rendered> {
        let mut attempt = 0;
        loop {
            match session::render(&self.launcher, document, options) {
                Err(e) if e.kind() == ErrorKind::EngineLaunch && attempt < self.config.launch_retries => {
                    attempt += 1;
                    warn!(
                        "[{}] {}; retrying launch ({}/{})",
                        options.correlation_id, e, attempt, self.config.launch_retries
                    );
                }
                other => return other,
            }
        }
    }

    fn artifact(&self, format: ExportFormat, bytes: Vec<u8>, warnings: Vec<CleanupWarning>) -> ExportArtifact {
        ExportArtifact {
            bytes,
            mime_type: format.mime_type(),
            filename: format!("map-{}.{}", Uuid::new_v4().simple(), format.extension()),
            warnings,
        }
    }
}

fn advance(stage: &mut ExportStage, next: ExportStage, id: &str) {
    debug!("[{}] {} -> {}", id, stage, next);
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selector_parses() {
        assert_eq!("HTML".parse::<ExportFormat>().unwrap(), ExportFormat::Markup);
        assert_eq!(
            "png".parse::<ExportFormat>().unwrap(),
            ExportFormat::RasterImage { encoding: RasterEncoding::Png }
        );
        assert_eq!(
            "jpeg".parse::<ExportFormat>().unwrap(),
            ExportFormat::RasterImage { encoding: RasterEncoding::Jpeg }
        );
        assert_eq!(
            "pdf".parse::<ExportFormat>().unwrap(),
            ExportFormat::Document { page: PageSize::new(700.0, 500.0) }
        );
        let err = "svg".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn mime_types_match_formats() {
        assert_eq!(ExportFormat::Markup.mime_type(), "text/html");
        assert_eq!(ExportFormat::RasterImage { encoding: RasterEncoding::Png }.mime_type(), "image/png");
        assert_eq!(ExportFormat::RasterImage { encoding: RasterEncoding::Jpeg }.mime_type(), "image/jpeg");
        assert_eq!(ExportFormat::Document { page: PageSize::a4() }.mime_type(), "application/pdf");
    }

    #[test]
    fn correlation_ids_are_restricted() {
        let req = ExportRequest::new(ExportFormat::Markup);
        assert!(req.validate().is_ok());
        assert_eq!(req.correlation_id.len(), 32);

        let long = "x".repeat(65);
        for bad in ["", "../etc", "a b", long.as_str()] {
            let req = ExportRequest::new(ExportFormat::Markup).with_correlation_id(bad);
            assert!(req.validate().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(ExportStage::DirectMarkup.to_string(), "direct-markup");
        assert_eq!(ExportStage::Failed.to_string(), "failed");
    }
}
