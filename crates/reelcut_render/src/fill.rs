//! Blurred, slowed backdrops for transparent clips.

use reelcut_core::config::AlphaFillConfig;
use reelcut_core::types::TimeUs;
use std::path::{Path, PathBuf};

use crate::arena::TempFileArena;
use crate::error::{RenderError, Result};
use crate::toolkit::MediaToolkit;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillParams {
    pub blur_sigma: f64,
    /// Effective stretch, already raised to cover `duration`.
    pub slow_factor: f64,
    pub duration: TimeUs,
    /// Source is a still image and must be looped instead of stretched.
    pub still_image: bool,
    /// Append a reversed copy so the echo runs forward then back.
    pub pingpong: bool,
}

/// Stretch needed so that a `source` long clip covers `target`, never less
/// than the configured `slow_factor` (and never below 1).
pub fn effective_slow_factor(slow_factor: f64, target: TimeUs, source: TimeUs) -> f64 {
    let mut slow = slow_factor.max(1.0);
    if source.is_positive() {
        slow = slow.max(target.as_seconds() / source.as_seconds());
    }
    slow
}

pub fn fill_filter(params: &FillParams) -> String {
    if params.still_image {
        return format!("gblur=sigma={}", params.blur_sigma);
    }
    let base = format!("setpts=PTS*{},gblur=sigma={}", params.slow_factor, params.blur_sigma);
    if params.pingpong {
        format!("{base},split[fwd][rev];[rev]reverse[bwd];[fwd][bwd]concat=n=2:v=1:a=0")
    } else {
        base
    }
}

/// Render a blurred, slowed, silent echo of `source` lasting exactly
/// `target_duration`. The file is owned by `arena`.
///
/// With `fill_pingpong` the slowed echo plays forward then in reverse, so it
/// only has to be stretched over half the target and never jumps back to
/// its first frame.
pub fn build_fill_background(
    toolkit: &dyn MediaToolkit,
    arena: &mut TempFileArena,
    source: &Path,
    target_duration: TimeUs,
    config: &AlphaFillConfig,
) -> Result<PathBuf> {
    let (source_duration, still_image) = match toolkit.probe(source) {
        Ok(info) => (info.duration_us, info.is_image),
        Err(e) => {
            tracing::warn!(source = %source.display(), error = %e, "cannot probe fill source, using configured slow factor");
            (TimeUs::ZERO, false)
        }
    };
    let target_duration = target_duration.max(TimeUs(10_000));
    let pingpong = config.fill_pingpong && !still_image;
    let cover = if pingpong {
        TimeUs(target_duration.0 / 2)
    } else {
        target_duration
    };
    let params = FillParams {
        blur_sigma: config.blur_sigma,
        slow_factor: effective_slow_factor(config.slow_factor, cover, source_duration),
        duration: target_duration,
        still_image,
        pingpong,
    };

    let output = arena.allocate("fill", "mp4");
    tracing::info!(
        source = %source.display(),
        duration = %target_duration,
        slow = params.slow_factor,
        blur = params.blur_sigma,
        pingpong,
        "building fill background"
    );
    match toolkit.blur_and_stretch(source, &params, &output) {
        Ok(()) => Ok(output),
        Err(e) => {
            arena.discard(&output);
            Err(RenderError::AlphaSynthesis(format!(
                "fill background from {} failed: {e}",
                source.display()
            )))
        }
    }
}
