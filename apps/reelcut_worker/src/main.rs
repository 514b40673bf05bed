use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use reelcut_core::{ClipList, StyleConfig};
use reelcut_render::{process_clips, FfmpegToolkit, RenderProgress};

#[derive(Parser, Debug)]
#[command(name = "reelcut-worker", version)]
struct Cli {
    /// Clip list JSON (`{"clips": [...]}`), or a folder of videos used as scenes.
    #[arg(long)]
    clips: PathBuf,

    /// Style JSON. Built-in defaults are used when omitted.
    #[arg(long)]
    style: Option<PathBuf>,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Print the ffmpeg render plan as JSON instead of rendering.
    #[arg(long, default_value_t = false)]
    plan_only: bool,

    /// Write sample RGBA frames of every see-through clip under this folder.
    #[arg(long, value_name = "DIR")]
    alpha_debug: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let clips = if cli.clips.is_dir() {
        ClipList::from_directory(&cli.clips)
    } else {
        ClipList::load_from_file(&cli.clips)
    }
    .with_context(|| format!("loading clips from {}", cli.clips.display()))?;

    let mut style = match &cli.style {
        Some(path) => StyleConfig::load_from_file(path)
            .with_context(|| format!("loading style {}", path.display()))?,
        None => StyleConfig::default(),
    };
    if let Some(dir) = &cli.alpha_debug {
        style.alpha_detection.verbose = true;
        style.alpha_detection.debug_export_dir = Some(dir.clone());
    }

    let toolkit = FfmpegToolkit::locate()
        .context("ffmpeg is required, install it with `sudo apt install ffmpeg`")?
        .with_ffprobe(style.alpha_detection.use_ffprobe);

    // Blocking: every clip is probed and filtered through ffmpeg in turn.
    let composed = process_clips(&clips, &style, &toolkit)?;

    if cli.plan_only {
        let plan = composed.render_plan(&cli.out)?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (tx, mut rx) = tokio::sync::watch::channel(RenderProgress::default());
        let reporter = tokio::spawn(async move {
            let mut last_decile = -1;
            while rx.changed().await.is_ok() {
                let progress = rx.borrow().clone();
                let decile = (progress.percent / 10.0).floor() as i64;
                if decile != last_decile {
                    last_decile = decile;
                    tracing::info!(
                        percent = progress.percent.round(),
                        speed = %progress.speed,
                        eta = ?progress.eta_seconds,
                        "rendering"
                    );
                }
            }
        });

        let result = composed.render(toolkit.ffmpeg_path(), &cli.out, tx).await;
        let _ = reporter.await;
        result
    })?;

    let (width, height) = composed.resolution();
    let summary = serde_json::json!({
        "output": cli.out,
        "duration_seconds": composed.duration().as_seconds(),
        "width": width,
        "height": height,
    });
    println!("{summary}");

    // Intermediate files go away with `composed`, after the render.
    drop(composed);
    Ok(())
}
