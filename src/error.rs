//! Error types for the export pipeline

use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort an export
///
/// The `Display` output carries diagnostic detail meant for logs. Use
/// [`Error::user_message`] for text that can be shown to an end user.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed scene, unsupported format or dimensions
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The rendering backend could not be started
    #[error("Engine launch failed: {0}")]
    EngineLaunch(String),

    /// The engine rejected the document or died while loading it
    #[error("Failed to load document: {0}")]
    Load(String),

    /// The document did not become ready within the load deadline
    #[error("Render timed out after {0}ms")]
    RenderTimeout(u64),

    /// No snapshot could be taken
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The encoder rejected the snapshot
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Stable classification of [`Error`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    EngineLaunch,
    Load,
    RenderTimeout,
    Capture,
    Encoding,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::EngineLaunch(_) => ErrorKind::EngineLaunch,
            Error::Load(_) => ErrorKind::Load,
            Error::RenderTimeout(_) => ErrorKind::RenderTimeout,
            Error::Capture(_) => ErrorKind::Capture,
            Error::Encoding(_) => ErrorKind::Encoding,
        }
    }

    /// Fixed, user-facing description of the failure. Never contains
    /// internal paths, backend messages or scene content.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "The map or export settings are invalid.",
            ErrorKind::EngineLaunch => "The map renderer is not available right now.",
            ErrorKind::Load => "The map could not be loaded for export.",
            ErrorKind::RenderTimeout => "The map took too long to render.",
            ErrorKind::Capture => "The map image could not be captured.",
            ErrorKind::Encoding => "The exported file could not be produced.",
        }
    }
}

/// Resource whose release failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupResource {
    /// The temporary document handed to the engine
    Document,
    /// The headless engine instance
    Engine,
}

/// A teardown step that failed
///
/// Warnings never turn a produced artifact into a failure. They are logged and
/// attached to the artifact so callers can surface them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub resource: CleanupResource,
    pub detail: String,
}

impl CleanupWarning {
    pub fn new(resource: CleanupResource, detail: impl Into<String>) -> Self {
        Self {
            resource,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.resource {
            CleanupResource::Document => "temporary document",
            CleanupResource::Engine => "render engine",
        };
        write!(f, "failed to release {}: {}", what, self.detail)
    }
}
