use anyhow::{bail, Context};
use clap::Parser;
use mapexport::{EngineConfig, ExportConfig, ExportFormat, ExportRequest, Exporter, PageSize, Scene};
use std::path::PathBuf;

/// Export a map scene (JSON) to HTML, PNG, JPEG or PDF
#[derive(Parser, Debug)]
#[command(name = "mapexport", version, about)]
struct Args {
    /// Scene description in JSON
    #[arg(long)]
    scene: PathBuf,

    /// Output format: html, png, jpeg or pdf
    #[arg(long, default_value = "html")]
    format: ExportFormat,

    /// Viewport width in pixels (defaults to the scene's view width)
    #[arg(long)]
    width: Option<u32>,

    /// Viewport height in pixels (defaults to the scene's view height)
    #[arg(long)]
    height: Option<u32>,

    /// PDF page width in points
    #[arg(long, default_value_t = 700.0)]
    page_width: f32,

    /// PDF page height in points
    #[arg(long, default_value_t = 500.0)]
    page_height: f32,

    /// Wait between map construction and capture
    #[arg(long, default_value_t = 1500)]
    settle_ms: u64,

    /// Deadline for loading the map
    #[arg(long, default_value_t = 10000)]
    load_timeout_ms: u64,

    /// Time allowed for the screenshot once settled
    #[arg(long, default_value_t = 2000)]
    capture_timeout_ms: u64,

    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Browser executable (autodetected otherwise)
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Disable the browser sandbox (needed in some containers)
    #[arg(long)]
    no_sandbox: bool,

    /// Directory the artifact is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.scene)
        .with_context(|| format!("reading scene {}", args.scene.display()))?;
    let scene: Scene = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scene {}", args.scene.display()))?;

    let format = match args.format {
        ExportFormat::Document { .. } => ExportFormat::Document {
            page: PageSize::new(args.page_width, args.page_height),
        },
        other => other,
    };
    let mut request = ExportRequest::new(format);
    request.width = args.width;
    request.height = args.height;

    let config = ExportConfig {
        settle_ms: args.settle_ms,
        load_timeout_ms: args.load_timeout_ms,
        capture_timeout_ms: args.capture_timeout_ms,
        jpeg_quality: args.jpeg_quality,
        engine: EngineConfig {
            browser_path: args.chrome,
            sandbox: !args.no_sandbox,
            ..Default::default()
        },
        ..Default::default()
    };
    let exporter = Exporter::new(config);

    let artifact = match exporter.export(&scene, &request) {
        Ok(a) => a,
        Err(e) => {
            log::debug!("export error detail: {:?}", e);
            bail!("{} ({})", e.user_message(), e);
        }
    };
    for w in &artifact.warnings {
        eprintln!("warning: {}", w);
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let path = args.out_dir.join(&artifact.filename);
    std::fs::write(&path, &artifact.bytes).with_context(|| format!("writing {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
