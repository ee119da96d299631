mod common;

use common::{dir_is_empty, sample_scene, Behavior, FakeLauncher};
use mapexport::{AsyncExporter, ErrorKind, ExportConfig, ExportFormat, ExportRequest, Exporter, PageSize, RasterEncoding};
use std::sync::Arc;

fn async_exporter(behavior: Behavior, scratch: &std::path::Path) -> AsyncExporter<FakeLauncher> {
    let config = ExportConfig {
        settle_ms: 10,
        load_timeout_ms: 200,
        scratch_dir: Some(scratch.to_path_buf()),
        ..Default::default()
    };
    AsyncExporter::new(Exporter::with_launcher(FakeLauncher::new(behavior), config))
}

#[tokio::test]
async fn async_png_export() {
    let scratch = tempfile::tempdir().unwrap();
    let exporter = async_exporter(Behavior::Normal, scratch.path());

    let request = ExportRequest::new(ExportFormat::RasterImage {
        encoding: RasterEncoding::Png,
    });
    let artifact = exporter.export(Arc::new(sample_scene()), request).await.unwrap();

    assert_eq!(artifact.mime_type, "image/png");
    let img = image::load_from_memory(&artifact.bytes).unwrap();
    assert_eq!((img.width(), img.height()), (700, 500));
    assert!(dir_is_empty(scratch.path()));
}

#[tokio::test]
async fn export_all_keeps_request_order() {
    let scratch = tempfile::tempdir().unwrap();
    let exporter = async_exporter(Behavior::Normal, scratch.path());

    let requests = vec![
        ExportRequest::new(ExportFormat::Markup),
        ExportRequest::new(ExportFormat::RasterImage {
            encoding: RasterEncoding::Jpeg,
        }),
        ExportRequest::new(ExportFormat::Document { page: PageSize::a4() }),
    ];
    let results = exporter.export_all(Arc::new(sample_scene()), requests).await;

    let mimes: Vec<&str> = results.iter().map(|r| r.as_ref().unwrap().mime_type).collect();
    assert_eq!(mimes, vec!["text/html", "image/jpeg", "application/pdf"]);
    assert!(dir_is_empty(scratch.path()));
}

#[tokio::test]
async fn async_failure_surfaces_kind() {
    let scratch = tempfile::tempdir().unwrap();
    let exporter = async_exporter(Behavior::NeverReady, scratch.path());

    let request = ExportRequest::new(ExportFormat::RasterImage {
        encoding: RasterEncoding::Png,
    });
    let err = exporter.export(Arc::new(sample_scene()), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RenderTimeout);
    assert!(dir_is_empty(scratch.path()));
}

#[tokio::test]
async fn panicking_worker_reports_capture_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let exporter = async_exporter(Behavior::PanicOnCapture, scratch.path());

    let request = ExportRequest::new(ExportFormat::RasterImage {
        encoding: RasterEncoding::Png,
    });
    let err = exporter.export(Arc::new(sample_scene()), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capture);
    assert!(err.to_string().contains("renderer exploded"), "{}", err);
    assert_eq!(exporter.exporter().launcher().live_engines(), 0);
    assert!(dir_is_empty(scratch.path()));
}
