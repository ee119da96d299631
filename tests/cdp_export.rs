//! Real-browser exports. Needs a local Chrome/Chromium; run with `--ignored`.

#![cfg(feature = "cdp")]

use lopdf::Document;
use mapexport::scene::{BaseLayer, LatLng, MapView, Marker, TileSource};
use mapexport::{CdpLauncher, ErrorKind, ExportConfig, ExportFormat, ExportRequest, Exporter, PageSize, RasterEncoding, Scene};
use std::sync::{Mutex, MutexGuard, Once};
use std::time::{Duration, Instant};
use tiny_http::{Header, Response, Server};

static INIT: Once = Once::new();

/// One browser at a time, so the process-table checks only see their own
static CHROME: Mutex<()> = Mutex::new(());

fn chrome_lock() -> MutexGuard<'static, ()> {
    CHROME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves a flat PNG for every tile, except paths under `/missing/` which 404
fn start_tile_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18093").unwrap();
            let tile = {
                let img = image::RgbaImage::from_pixel(256, 256, image::Rgba([200, 220, 200, 255]));
                let mut buf = Vec::new();
                img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                    .unwrap();
                buf
            };
            for request in server.incoming_requests() {
                if request.url().starts_with("/missing/") {
                    let _ = request.respond(Response::from_string("no such tile").with_status_code(tiny_http::StatusCode(404)));
                    continue;
                }
                let resp = Response::from_data(tile.clone())
                    .with_header("Content-Type: image/png".parse::<Header>().unwrap());
                let _ = request.respond(resp);
            }
        });
        std::thread::sleep(Duration::from_millis(100));
    });

    "http://127.0.0.1:18093".to_string()
}

fn scene_with_tiles(url_template: String) -> Scene {
    Scene::new(MapView {
        center: LatLng::new(48.85, 2.35),
        zoom: 12,
        width: 640,
        height: 480,
    })
    .with_base_layer(BaseLayer::new("Local", TileSource::new(url_template)))
    .with_marker(Marker::new(LatLng::new(48.85, 2.35)).with_label("Paris"))
}

fn local_scene() -> Scene {
    scene_with_tiles(format!("{}/{{z}}/{{x}}/{{y}}.png", start_tile_server()))
}

fn config() -> ExportConfig {
    let mut config = ExportConfig {
        settle_ms: 300,
        ..Default::default()
    };
    if std::env::var("CI").is_ok() {
        config.engine.sandbox = false;
    }
    config
}

fn exporter() -> Exporter<CdpLauncher> {
    Exporter::new(config())
}

fn png_request() -> ExportRequest {
    ExportRequest::new(ExportFormat::RasterImage {
        encoding: RasterEncoding::Png,
    })
}

#[cfg(target_os = "linux")]
fn child_processes() -> usize {
    let me = std::process::id().to_string();
    std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
        .filter(|stat| {
            // pid (comm) state ppid ...
            stat.rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().nth(1))
                .is_some_and(|ppid| ppid == me)
        })
        .count()
}

fn assert_no_browser_left() {
    #[cfg(target_os = "linux")]
    {
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(child_processes(), 0, "browser processes outlived the export");
    }
}

#[test]
#[ignore]
fn png_export_through_chrome() {
    let _chrome = chrome_lock();
    let artifact = exporter().export(&local_scene(), &png_request()).expect("export");

    let img = image::load_from_memory(&artifact.bytes).unwrap();
    assert_eq!((img.width(), img.height()), (640, 480));
    assert_no_browser_left();
}

#[test]
#[ignore]
fn pdf_export_through_chrome() {
    let _chrome = chrome_lock();
    let artifact = exporter()
        .export(
            &local_scene(),
            &ExportRequest::new(ExportFormat::Document { page: PageSize::a4() }),
        )
        .expect("export");

    let doc = Document::load_mem(&artifact.bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
    assert_no_browser_left();
}

#[test]
#[ignore]
fn missing_tiles_degrade_without_failing() {
    let _chrome = chrome_lock();
    let not_found = scene_with_tiles(format!("{}/missing/{{z}}/{{x}}/{{y}}.png", start_tile_server()));
    // Nothing listens on port 1, so every tile request is refused.
    let refused = scene_with_tiles("http://127.0.0.1:1/{z}/{x}/{y}.png".to_string());

    for scene in [not_found, refused] {
        let artifact = exporter().export(&scene, &png_request()).expect("export");
        let img = image::load_from_memory(&artifact.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (640, 480));
    }
    assert_no_browser_left();
}

#[test]
#[ignore]
fn broken_script_fragment_still_renders() {
    let _chrome = chrome_lock();
    let scene = local_scene().with_script("throw new Error('boom');");
    let result = exporter().export(
        &scene,
        &ExportRequest::new(ExportFormat::RasterImage {
            encoding: RasterEncoding::Jpeg,
        }),
    );
    match result {
        Ok(artifact) => assert_eq!(artifact.mime_type, "image/jpeg"),
        Err(e) => assert_ne!(e.kind(), ErrorKind::RenderTimeout, "{}", e),
    }
}

#[test]
#[ignore]
fn load_timeout_leaves_no_browser_behind() {
    let _chrome = chrome_lock();
    let exporter = Exporter::new(ExportConfig {
        load_timeout_ms: 1,
        ..config()
    });

    let err = exporter.export(&local_scene(), &png_request()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RenderTimeout);
    assert_no_browser_left();
}

#[test]
#[ignore]
fn wedged_page_times_out_within_bound() {
    let _chrome = chrome_lock();
    let config = ExportConfig {
        load_timeout_ms: 3_000,
        settle_ms: 200,
        capture_timeout_ms: 1_000,
        ..config()
    };
    let exporter = Exporter::new(config);
    let scene = local_scene().with_script("setTimeout(() => { for (;;) {} }, 0);");

    let started = Instant::now();
    let result = exporter.export(&scene, &png_request());
    // Browser start-up is outside both deadlines.
    let bound = Duration::from_millis(3_000 + 200 + 1_000 + 5_000);
    assert!(started.elapsed() < bound, "took {:?}", started.elapsed());
    assert_eq!(result.unwrap_err().kind(), ErrorKind::RenderTimeout);
    assert_no_browser_left();
}
