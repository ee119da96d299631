//! Chrome DevTools Protocol adapter implementation

use crate::{Engine, EngineConfig, Error, Result, ScriptResult};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// CDP-based headless engine implementation (uses the `headless_chrome` crate)
///
/// This adapter launches a headless Chrome instance with its own profile,
/// manages a single tab sized to the configured viewport, and provides the
/// `Engine` trait implementation over it. Dropping the engine kills the
/// browser process.
///
/// The transport waits for every protocol reply for as long as the idle
/// timeout, whatever the caller's deadline. Page calls therefore run on a
/// helper thread and are abandoned once their own timeout passes.
pub struct CdpEngine {
    browser: Browser,
    tab: Arc<Tab>,
    config: EngineConfig,
}

/// Run `call` on a helper thread and wait at most `timeout` for it.
///
/// `fail` builds the error for a call that could not be started or that
/// panicked. An abandoned call keeps its thread until the transport gives up
/// on it; closing the engine kills the browser underneath it.
fn with_deadline<C, T, F>(ctx: C, timeout: Duration, what: &'static str, fail: fn(String) -> Error, call: F) -> Result<T>
where
    C: Send + 'static,
    T: Send + 'static,
    F: FnOnce(C) -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("cdp-{}", what))
        .spawn(move || {
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(call(ctx));
        })
        .map_err(|e| fail(format!("Failed to start {} call: {}", what, e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} call still pending after {}ms, abandoning it", what, timeout.as_millis());
            Err(Error::RenderTimeout(timeout.as_millis() as u64))
        }
        Err(RecvTimeoutError::Disconnected) => Err(fail(format!("{} call panicked", what))),
    }
}

impl Engine for CdpEngine {
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized,
    {
        // Configure headless Chrome launch options
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .path(config.browser_path.clone())
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .idle_browser_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::EngineLaunch(format!("Failed to build launch options: {}", e)))?;

        // Launch the browser
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::EngineLaunch(format!("Failed to launch browser: {}", e)))?;
        debug!("launched headless browser (pid {:?})", browser.get_process_id());

        let tab = browser
            .new_tab()
            .map_err(|e| Error::EngineLaunch(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_millis(config.timeout_ms));

        // Tile servers reject anonymous clients
        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| Error::EngineLaunch(format!("Failed to set user agent: {}", e)))?;

        Ok(Self { browser, tab, config })
    }

    fn load_url(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        let url = url.to_string();

        with_deadline(self.tab.clone(), timeout, "navigate", Error::Load, move |tab| {
            tab.navigate_to(&url)
                .map_err(|e| Error::Load(format!("Navigation failed: {}", e)))?;
            tab.wait_until_navigated()
                .map_err(|e| Error::Load(format!("Wait for navigation failed: {}", e)))?;
            Ok(())
        })
    }

    fn evaluate_script(&mut self, script: &str, timeout: Duration) -> Result<ScriptResult> {
        let script = script.to_string();

        with_deadline(self.tab.clone(), timeout, "evaluate", Error::Load, move |tab| {
            let result = tab
                .evaluate(&script, false)
                .map_err(|e| Error::Load(format!("Evaluation failed: {}", e)))?;

            let value = result
                .value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string());

            Ok(ScriptResult {
                value,
                is_error: false,
            })
        })
    }

    fn render_png(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.config.viewport.width as f64,
            height: self.config.viewport.height as f64,
            scale: 1.0,
        };

        with_deadline(self.tab.clone(), timeout, "screenshot", Error::Capture, move |tab| {
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
                .map_err(|e| Error::Capture(format!("Screenshot failed: {}", e)))
        })
    }

    fn close(self) -> Result<()> {
        // Dropping the tab and browser terminates the child process.
        let pid = self.browser.get_process_id();
        drop(self.tab);
        drop(self.browser);
        debug!("closed headless browser (pid {:?})", pid);
        Ok(())
    }
}
