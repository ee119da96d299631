//! Headless render session
//!
//! One session = one staged document + one engine instance + one snapshot.
//! Both resources live in a guard that releases them on every exit path:
//! explicitly (collecting [`CleanupWarning`]s) on normal returns, and from
//! `Drop` if the stack unwinds.
//!
//! Timing has two independent bounds. The *load deadline* covers navigation
//! to the staged file and the wait for the map runtime to report that the map
//! object exists. The *settle deadline* starts once the map is ready: a fixed
//! sleep that gives tiles time to arrive, plus `capture_timeout` for the
//! pending-tile check and the screenshot. Missing either deadline is a
//! [`Error::RenderTimeout`]. Every engine call is handed only what is left of
//! the current deadline, so a wedged page cannot stretch either bound.
//! Tile loading has no reliable completion signal, so a longer settle trades
//! latency for fewer missing tiles; tiles still pending at capture are logged.

use crate::document::{RenderDocument, READY_ATTRIBUTE};
use crate::encode::RasterSnapshot;
use crate::{CleanupResource, CleanupWarning, Engine, EngineConfig, Error, ErrorKind, Launcher, Result, Viewport};
use chrono::Utc;
use log::{debug, warn};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Script returning `true` once the runtime has built the map
pub fn ready_check() -> String {
    format!(
        "document.documentElement.getAttribute('{}') === '1'",
        READY_ATTRIBUTE
    )
}

/// Script returning the number of tiles still in flight, or -1 without a map
pub const PENDING_TILES_CHECK: &str = "window.map ? window.map.pendingTiles() : -1";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default screenshot budget after the settle sleep, in milliseconds
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 2_000;

/// Parameters for one render
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Engine viewport and exact snapshot size
    pub viewport: Viewport,
    /// Bound on navigation plus map construction
    pub load_timeout: Duration,
    /// Fixed wait between readiness and capture
    pub settle: Duration,
    /// Budget for the tile check and screenshot once settling is over
    pub capture_timeout: Duration,
    /// Used to name the staged document
    pub correlation_id: String,
    /// Directory for the staged document
    pub scratch_dir: PathBuf,
    /// Base engine configuration; viewport and timeout are overridden
    pub engine: EngineConfig,
}

impl RenderOptions {
    pub fn new(viewport: Viewport, correlation_id: impl Into<String>) -> Self {
        Self {
            viewport,
            load_timeout: Duration::from_millis(10_000),
            settle: Duration::from_millis(1_500),
            capture_timeout: Duration::from_millis(DEFAULT_CAPTURE_TIMEOUT_MS),
            correlation_id: correlation_id.into(),
            scratch_dir: std::env::temp_dir(),
            engine: EngineConfig::default(),
        }
    }
}

/// A captured snapshot plus any teardown problems seen while releasing the session
#[derive(Debug)]
pub struct Rendered {
    pub snapshot: RasterSnapshot,
    pub warnings: Vec<CleanupWarning>,
}

struct SessionGuard<E: Engine> {
    engine: Option<E>,
    document: Option<NamedTempFile>,
}

impl<E: Engine> SessionGuard<E> {
    fn new() -> Self {
        Self {
            engine: None,
            document: None,
        }
    }

    /// Engine first so it lets go of the file, then the file.
    fn release(&mut self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close() {
                warnings.push(CleanupWarning::new(CleanupResource::Engine, e.to_string()));
            }
        }
        if let Some(file) = self.document.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warnings.push(CleanupWarning::new(
                    CleanupResource::Document,
                    format!("{}: {}", path.display(), e),
                ));
            }
        }
        warnings
    }
}

impl<E: Engine> Drop for SessionGuard<E> {
    fn drop(&mut self) {
        for w in self.release() {
            warn!("render session teardown: {}", w);
        }
    }
}

/// Render a document into exactly one snapshot of `options.viewport`.
///
/// Never retries. The engine and staged document are released before this
/// returns, whatever the outcome.
pub fn render<L: Launcher>(launcher: &L, document: &RenderDocument, options: &RenderOptions) -> Result<Rendered> {
    let mut guard = SessionGuard::new();
    let result = run(launcher, document, options, &mut guard);
    let warnings = guard.release();
    match result {
        Ok(snapshot) => Ok(Rendered { snapshot, warnings }),
        Err(e) => {
            for w in &warnings {
                warn!("[{}] render session teardown: {}", options.correlation_id, w);
            }
            Err(e)
        }
    }
}

fn run<L: Launcher>(
    launcher: &L,
    document: &RenderDocument,
    options: &RenderOptions,
    guard: &mut SessionGuard<L::Engine>,
) -> Result<RasterSnapshot> {
    let id = &options.correlation_id;

    let staged = stage_document(document, options)?;
    let url = url::Url::from_file_path(staged.path())
        .map_err(|_| Error::Load(format!("cannot express {} as a file URL", staged.path().display())))?;
    debug!("[{}] staged document at {}", id, staged.path().display());
    guard.document = Some(staged);

    let lifetime = options.load_timeout + options.settle + options.capture_timeout;
    let config = EngineConfig {
        viewport: options.viewport,
        timeout_ms: lifetime.as_millis() as u64,
        ..options.engine.clone()
    };
    let engine = launcher.launch(config).map_err(|e| match e {
        Error::EngineLaunch(_) => e,
        other => Error::EngineLaunch(other.to_string()),
    })?;
    let engine = guard.engine.insert(engine);
    debug!("[{}] engine launched ({}x{})", id, options.viewport.width, options.viewport.height);

    wait_until_ready(engine, url.as_str(), options.load_timeout)?;
    debug!("[{}] map ready, settling for {}ms", id, options.settle.as_millis());

    let budget = options.settle + options.capture_timeout;
    let settle_deadline = Instant::now() + budget;
    let timed_out = || Error::RenderTimeout(budget.as_millis() as u64);

    thread::sleep(options.settle);

    // The check gets half of what is left; the screenshot needs the rest.
    let left = settle_deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        debug!("[{}] no time left for the tile check", id);
    } else {
        match engine.evaluate_script(PENDING_TILES_CHECK, left / 2) {
            Ok(r) if !r.is_error => match r.value.trim().parse::<i64>() {
                Ok(n) if n > 0 => warn!("[{}] capturing with {} tile(s) still loading", id, n),
                _ => {}
            },
            Ok(r) => debug!("[{}] tile check threw: {}", id, r.value),
            Err(e) => debug!("[{}] tile check failed: {}", id, e),
        }
    }

    let left = settle_deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(timed_out());
    }
    let png = engine.render_png(left).map_err(|e| {
        if e.kind() == ErrorKind::RenderTimeout || Instant::now() >= settle_deadline {
            return timed_out();
        }
        match e {
            Error::Capture(_) => e,
            other => Error::Capture(other.to_string()),
        }
    })?;
    let snapshot = RasterSnapshot::decode(&png, Utc::now())
        .map_err(|e| Error::Capture(format!("screenshot is not a decodable image: {}", e)))?;

    if (snapshot.width, snapshot.height) != (options.viewport.width, options.viewport.height) {
        return Err(Error::Capture(format!(
            "snapshot is {}x{}, expected {}x{}",
            snapshot.width, snapshot.height, options.viewport.width, options.viewport.height
        )));
    }
    debug!("[{}] captured {}x{}", id, snapshot.width, snapshot.height);
    Ok(snapshot)
}

fn stage_document(document: &RenderDocument, options: &RenderOptions) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("mapexport-{}-", options.correlation_id))
        .suffix(".html")
        .tempfile_in(&options.scratch_dir)
        .map_err(|e| {
            Error::Load(format!(
                "cannot create staging file in {}: {}",
                options.scratch_dir.display(),
                e
            ))
        })?;
    file.write_all(document.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::Load(format!("cannot write staging file: {}", e)))?;
    Ok(file)
}

/// Navigate and poll the ready marker until the load deadline.
fn wait_until_ready<E: Engine>(engine: &mut E, url: &str, deadline: Duration) -> Result<()> {
    let started = Instant::now();
    let timed_out = || Error::RenderTimeout(deadline.as_millis() as u64);

    if let Err(e) = engine.load_url(url, deadline) {
        if e.kind() == ErrorKind::RenderTimeout || started.elapsed() >= deadline {
            return Err(timed_out());
        }
        return Err(match e {
            Error::Load(_) => e,
            other => Error::Load(other.to_string()),
        });
    }

    let check = ready_check();
    loop {
        let left = deadline.saturating_sub(started.elapsed());
        if left.is_zero() {
            return Err(timed_out());
        }
        match engine.evaluate_script(&check, left) {
            Ok(r) if !r.is_error && r.value.trim() == "true" => return Ok(()),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::RenderTimeout || started.elapsed() >= deadline => {
                return Err(timed_out())
            }
            Err(e) => return Err(Error::Load(format!("readiness check failed: {}", e))),
        }
        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return Err(timed_out());
        }
        thread::sleep(POLL_INTERVAL.min(deadline - elapsed));
    }
}
