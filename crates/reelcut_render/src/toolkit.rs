use reelcut_core::types::{MediaInfo, TimeUs};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::chroma::{chroma_key_filter, ChromaKeyParams};
use crate::error::{RenderError, Result};
use crate::fill::{fill_filter, FillParams};
use crate::probe;

/// Side length of the downscaled alpha planes sampled from video.
pub const SAMPLE_WIDTH: u32 = 108;
pub const SAMPLE_HEIGHT: u32 = 192;

// ---------------------------------------------------------------------------
// Alpha measurements
// ---------------------------------------------------------------------------

/// One 8-bit alpha plane (255 = fully opaque).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaPlane {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl AlphaPlane {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(width, height, vec![value; (width * height) as usize])
    }

    pub fn has_non_opaque(&self) -> bool {
        self.data.iter().any(|&a| a < u8::MAX)
    }

    /// (min, mean, max) opacity in `[0, 1]`.
    pub fn opacity_summary(&self) -> Option<(f64, f64, f64)> {
        let min = *self.data.iter().min()?;
        let max = *self.data.iter().max()?;
        let sum: u64 = self.data.iter().map(|&a| a as u64).sum();
        let mean = sum as f64 / self.data.len() as f64;
        Some((min as f64 / 255.0, mean / 255.0, max as f64 / 255.0))
    }

    pub fn coverage(&self) -> Option<AlphaCoverage> {
        if self.data.is_empty() {
            return None;
        }
        let total = self.data.len() as f64;
        let transparent = self.data.iter().filter(|&&a| (a as f64) < 0.05 * 255.0).count();
        let opaque = self.data.iter().filter(|&&a| (a as f64) > 0.95 * 255.0).count();
        Some(AlphaCoverage {
            transparent_ratio: transparent as f64 / total,
            opaque_ratio: opaque as f64 / total,
        })
    }
}

/// Opacity statistics across a set of sampled mask frames, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl MaskStats {
    /// Mean of per-frame means, min of mins, max of maxes.
    pub fn from_planes(planes: &[AlphaPlane]) -> Option<Self> {
        let summaries: Vec<_> = planes.iter().filter_map(AlphaPlane::opacity_summary).collect();
        if summaries.is_empty() {
            return None;
        }
        let mean = summaries.iter().map(|s| s.1).sum::<f64>() / summaries.len() as f64;
        let min = summaries.iter().map(|s| s.0).fold(f64::INFINITY, f64::min);
        let max = summaries.iter().map(|s| s.2).fold(f64::NEG_INFINITY, f64::max);
        Some(Self { mean, min, max })
    }
}

/// Share of clearly transparent and clearly opaque pixels in a still image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaCoverage {
    pub transparent_ratio: f64,
    pub opaque_ratio: f64,
}

/// `signalstats` luma statistics of an extracted alpha plane, 8-bit scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Aggregate the `lavfi.signalstats.Y*` lines printed by `metadata=print`
/// over every frame.
pub fn parse_signalstats(log: &str) -> Option<SignalStats> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut avg_sum = 0.0;
    let mut avg_count = 0usize;

    for line in log.lines() {
        let Some((_, key_val)) = line.split_once("lavfi.signalstats.") else {
            continue;
        };
        let Some((key, val)) = key_val.split_once('=') else {
            continue;
        };
        let Ok(val) = val.trim().parse::<f64>() else {
            continue;
        };
        match key.trim() {
            "YMIN" => min = min.min(val),
            "YMAX" => max = max.max(val),
            "YAVG" => {
                avg_sum += val;
                avg_count += 1;
            }
            _ => {}
        }
    }

    (min.is_finite() && max.is_finite() && avg_count > 0).then(|| SignalStats {
        min,
        max,
        avg: avg_sum / avg_count as f64,
    })
}

/// Evenly spaced sample times over `[0, duration - 1ms]`.
pub fn sample_times(duration: TimeUs, count: usize) -> Vec<f64> {
    let count = count.max(1);
    let secs = duration.as_seconds();
    if secs <= 0.0 || count == 1 {
        return vec![0.0];
    }
    let end = (secs - 0.001).max(0.0);
    (0..count)
        .map(|i| end * i as f64 / (count - 1) as f64)
        .collect()
}

// ---------------------------------------------------------------------------
// MediaToolkit
// ---------------------------------------------------------------------------

/// The media operations the compositing engine needs from the outside world.
pub trait MediaToolkit {
    fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Alpha planes of `samples` evenly spaced frames (one plane for a still).
    fn extract_alpha(&self, path: &Path, info: &MediaInfo, samples: usize) -> Result<Vec<AlphaPlane>>;

    /// Alpha-plane statistics over the whole file.
    fn alpha_stats(&self, path: &Path) -> Result<SignalStats>;

    /// Write a copy of `source` whose alpha is keyed from `params`.
    fn chroma_key(&self, source: &Path, params: &ChromaKeyParams, output: &Path) -> Result<()>;

    /// Write a slowed, blurred, silent copy of `source` of exactly `params.duration`.
    fn blur_and_stretch(&self, source: &Path, params: &FillParams, output: &Path) -> Result<()>;

    /// Write the frame at `at` seconds as an RGBA PNG. Sources without
    /// alpha come out fully opaque.
    fn export_rgba_frame(&self, source: &Path, at: f64, invert_alpha: bool, output: &Path) -> Result<()>;
}

/// `MediaToolkit` backed by the ffmpeg/ffprobe command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe,
        }
    }

    /// Find both tools on `PATH`. Only ffmpeg is mandatory.
    pub fn locate() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| RenderError::FfmpegNotFound)?;
        let ffprobe = which::which("ffprobe").ok();
        if ffprobe.is_none() {
            tracing::warn!("ffprobe not found, probing will parse ffmpeg's stream dump");
        }
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Disable ffprobe and always probe through the stream dump.
    pub fn with_ffprobe(mut self, enabled: bool) -> Self {
        if !enabled {
            self.ffprobe = None;
        }
        self
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    fn run(&self, args: &[String]) -> Result<std::process::Output> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::FfmpegNotFound
                } else {
                    RenderError::Io(e)
                }
            })?;
        if !output.status.success() {
            return Err(RenderError::FfmpegFailed(stderr_tail(&output.stderr)));
        }
        Ok(output)
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        match &self.ffprobe {
            Some(ffprobe) => probe::probe_with_ffprobe(ffprobe, path),
            None => probe::probe_with_ffmpeg(&self.ffmpeg, path),
        }
    }

    fn extract_alpha(&self, path: &Path, info: &MediaInfo, samples: usize) -> Result<Vec<AlphaPlane>> {
        if info.is_image {
            return Ok(vec![image_alpha_plane(path)?]);
        }

        let expected = (SAMPLE_WIDTH * SAMPLE_HEIGHT) as usize;
        let mut planes = Vec::new();
        for t in sample_times(info.duration_us, samples) {
            let args: Vec<String> = vec![
                "-v".into(),
                "error".into(),
                "-ss".into(),
                format!("{t:.3}"),
                "-i".into(),
                path.to_string_lossy().into_owned(),
                "-frames:v".into(),
                "1".into(),
                "-vf".into(),
                format!("alphaextract,scale={SAMPLE_WIDTH}:{SAMPLE_HEIGHT}:flags=area"),
                "-f".into(),
                "rawvideo".into(),
                "-pix_fmt".into(),
                "gray".into(),
                "-".into(),
            ];
            let output = self
                .run(&args)
                .map_err(|e| RenderError::decode(path, format!("alpha sample at {t:.3}s: {e}")))?;
            if output.stdout.len() != expected {
                return Err(RenderError::decode(
                    path,
                    format!("alpha sample at {t:.3}s has {} bytes, expected {expected}", output.stdout.len()),
                ));
            }
            planes.push(AlphaPlane::new(SAMPLE_WIDTH, SAMPLE_HEIGHT, output.stdout));
        }
        Ok(planes)
    }

    fn alpha_stats(&self, path: &Path) -> Result<SignalStats> {
        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-i".into(),
            path.to_string_lossy().into_owned(),
            "-vf".into(),
            "alphaextract,signalstats,metadata=print".into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        let output = self.run(&args)?;
        parse_signalstats(&String::from_utf8_lossy(&output.stderr)).ok_or_else(|| {
            RenderError::AlphaSynthesis(format!("no alpha statistics for {}", path.display()))
        })
    }

    fn chroma_key(&self, source: &Path, params: &ChromaKeyParams, output: &Path) -> Result<()> {
        let args: Vec<String> = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-i".into(),
            source.to_string_lossy().into_owned(),
            "-vf".into(),
            chroma_key_filter(params),
            "-an".into(),
            "-c:v".into(),
            "qtrle".into(),
            output.to_string_lossy().into_owned(),
        ];
        self.run(&args)?;
        Ok(())
    }

    fn blur_and_stretch(&self, source: &Path, params: &FillParams, output: &Path) -> Result<()> {
        let duration = format!("{:.3}", params.duration.as_seconds());
        let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];
        if params.still_image {
            args.extend(["-loop".into(), "1".into()]);
        }
        args.extend([
            "-i".into(),
            source.to_string_lossy().into_owned(),
            "-vf".into(),
            fill_filter(params),
            "-t".into(),
            duration,
            "-an".into(),
            "-c:v".into(),
            "libx264".into(),
            "-crf".into(),
            "23".into(),
            "-preset".into(),
            "fast".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            output.to_string_lossy().into_owned(),
        ]);
        self.run(&args)?;
        Ok(())
    }

    fn export_rgba_frame(&self, source: &Path, at: f64, invert_alpha: bool, output: &Path) -> Result<()> {
        let filter = if invert_alpha {
            "format=rgba,lut=a=negval"
        } else {
            "format=rgba"
        };
        let args: Vec<String> = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-ss".into(),
            format!("{at:.3}"),
            "-i".into(),
            source.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            filter.into(),
            output.to_string_lossy().into_owned(),
        ];
        self.run(&args)?;
        Ok(())
    }
}

/// Alpha channel of a still image, decoded in-process. Images without an
/// alpha channel come back fully opaque.
pub fn image_alpha_plane(path: &Path) -> Result<AlphaPlane> {
    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let data = rgba.pixels().map(|p| p.0[3]).collect();
    Ok(AlphaPlane::new(width, height, data))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
