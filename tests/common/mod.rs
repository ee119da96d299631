//! In-process engine used to drive the pipeline without a browser

#![allow(dead_code)]

use mapexport::scene::{BaseLayer, LatLng, MapView, Marker, Scene, TileSource};
use mapexport::{Engine, EngineConfig, Error, Launcher, Result, ScriptResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    /// The ready marker never appears
    NeverReady,
    /// Navigation is rejected
    LoadFails,
    /// The engine dies before the screenshot
    CrashOnCapture,
    /// Screenshot bytes are not an image
    GarbageCapture,
    /// The page locks up from the start; every call uses its whole budget
    Wedged,
    /// The map builds, then the page locks up before the screenshot
    WedgedAfterReady,
    /// The backend panics while taking the screenshot
    PanicOnCapture,
}

fn hang(timeout: Duration) -> Error {
    std::thread::sleep(timeout);
    Error::RenderTimeout(timeout.as_millis() as u64)
}

pub struct FakeLauncher {
    behavior: Behavior,
    failing_launches: AtomicUsize,
    launches: AtomicUsize,
    live: Arc<AtomicUsize>,
    loaded: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            failing_launches: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            loaded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the first `n` launch attempts
    pub fn failing_first(self, n: usize) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }
}

impl Launcher for FakeLauncher {
    type Engine = FakeEngine;

    fn launch(&self, config: EngineConfig) -> Result<FakeEngine> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_launches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_launches.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::EngineLaunch("no browser binary found".into()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(FakeEngine {
            config,
            behavior: self.behavior,
            live: self.live.clone(),
            loaded: self.loaded.clone(),
            document: None,
        })
    }
}

pub struct FakeEngine {
    config: EngineConfig,
    behavior: Behavior,
    live: Arc<AtomicUsize>,
    loaded: Arc<Mutex<Vec<PathBuf>>>,
    document: Option<String>,
}

impl Engine for FakeEngine {
    fn new(_config: EngineConfig) -> Result<Self> {
        Err(Error::EngineLaunch("fake engines come from FakeLauncher".into()))
    }

    fn load_url(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        if self.behavior == Behavior::LoadFails {
            return Err(Error::Load("net::ERR_ABORTED".into()));
        }
        let path = url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| Error::Load(format!("not a file URL: {}", url)))?;
        let html = std::fs::read_to_string(&path).map_err(|e| Error::Load(e.to_string()))?;
        self.loaded.lock().unwrap().push(path);
        self.document = Some(html);
        Ok(())
    }

    fn evaluate_script(&mut self, script: &str, timeout: Duration) -> Result<ScriptResult> {
        let is_ready_check = script.contains("data-map-ready");
        match self.behavior {
            Behavior::Wedged => return Err(hang(timeout)),
            Behavior::WedgedAfterReady if !is_ready_check => return Err(hang(timeout)),
            _ => {}
        }
        let value = if is_ready_check {
            let ready = self.behavior != Behavior::NeverReady
                && self.document.as_deref().is_some_and(|d| d.contains("data-map-ready"));
            ready.to_string()
        } else {
            "0".to_string()
        };
        Ok(ScriptResult { value, is_error: false })
    }

    fn render_png(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        match self.behavior {
            Behavior::WedgedAfterReady => Err(hang(timeout)),
            Behavior::PanicOnCapture => panic!("renderer exploded"),
            Behavior::CrashOnCapture => Err(Error::Capture("target closed".into())),
            Behavior::GarbageCapture => Ok(b"not a png".to_vec()),
            _ => {
                let vp = self.config.viewport;
                let img = image::RgbaImage::from_pixel(vp.width, vp.height, image::Rgba([170, 211, 223, 255]));
                let mut buf = Vec::new();
                img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                    .map_err(|e| Error::Capture(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    fn close(self) -> Result<()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One base layer, one marker at (40.0, -74.0), 700x500 view
pub fn sample_scene() -> Scene {
    Scene::new(MapView {
        center: LatLng::new(40.0, -74.0),
        zoom: 10,
        width: 700,
        height: 500,
    })
    .with_base_layer(BaseLayer::new("OpenStreetMap", TileSource::openstreetmap()))
    .with_marker(Marker::new(LatLng::new(40.0, -74.0)).with_label("Marker 1"))
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
