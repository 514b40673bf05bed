//! Transparency detection and mask-polarity heuristics.

use reelcut_core::config::AlphaDetectionConfig;
use reelcut_core::types::{MaskMode, MediaInfo};
use std::path::Path;

use crate::toolkit::{AlphaCoverage, MaskStats, MediaToolkit};

/// Minimum below which a mostly-opaque mask counts as "mixed".
const OPAQUE_MIXED_CEILING: f64 = 0.98;
/// Maximum above which a mostly-transparent mask counts as "mixed".
const TRANSPARENT_MIXED_FLOOR: f64 = 0.02;

/// Best-effort guess that a video mask uses the opposite polarity.
///
/// A mask that is mostly opaque yet has some non-opaque pixels, or mostly
/// transparent yet has some visible pixels, is taken to be inverted.
pub fn should_invert_mask(stats: &MaskStats, threshold: f64) -> bool {
    let mostly_opaque = stats.mean >= threshold && stats.min < OPAQUE_MIXED_CEILING;
    let mostly_transparent = stats.mean <= 1.0 - threshold && stats.max > TRANSPARENT_MIXED_FLOOR;
    mostly_opaque || mostly_transparent
}

/// Best-effort guess that a still image's alpha is inverted: very few
/// transparent pixels and nearly everything opaque.
pub fn should_invert_image_alpha(coverage: &AlphaCoverage, threshold: f64) -> bool {
    coverage.transparent_ratio < threshold && coverage.opaque_ratio > 1.0 - threshold
}

/// Which polarity check applies to a clip, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolarityCheck {
    Mask { threshold: f64 },
    Image { threshold: f64 },
    Skip,
}

pub struct AlphaDetector<'a> {
    toolkit: &'a dyn MediaToolkit,
    sample_count: usize,
    require_non_opaque: bool,
    verbose: bool,
}

impl<'a> AlphaDetector<'a> {
    pub fn new(toolkit: &'a dyn MediaToolkit, config: &AlphaDetectionConfig) -> Self {
        Self {
            toolkit,
            sample_count: config.sample_count.max(1),
            require_non_opaque: config.require_non_opaque,
            verbose: config.verbose,
        }
    }

    pub fn require_non_opaque(&self) -> bool {
        self.require_non_opaque
    }

    /// Whether the clip at `path` is actually transparent somewhere.
    /// Probe failures are logged and reported as opaque.
    pub fn has_alpha(&self, path: &Path, require_non_opaque: bool) -> bool {
        match self.toolkit.probe(path) {
            Ok(info) => self.has_alpha_with_info(path, &info, require_non_opaque),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "alpha probe failed, treating clip as opaque");
                false
            }
        }
    }

    /// Same as [`has_alpha`](Self::has_alpha) with an existing probe result.
    ///
    /// Without `require_non_opaque` a declared alpha pixel format is enough,
    /// for stills as well as video.
    pub fn has_alpha_with_info(&self, path: &Path, info: &MediaInfo, require_non_opaque: bool) -> bool {
        if info.is_image {
            if !require_non_opaque {
                return info.declares_alpha();
            }
            // The image's own alpha is the sample.
            return match self.toolkit.extract_alpha(path, info, 1) {
                Ok(planes) => planes.iter().any(|p| p.has_non_opaque()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read image alpha, treating as opaque");
                    false
                }
            };
        }

        let declared = info.declares_alpha();
        self.log(path, &format!("pix_fmt={:?} declares_alpha={declared}", info.pixel_format));
        if !declared || !require_non_opaque {
            return declared;
        }

        match self.toolkit.extract_alpha(path, info, self.sample_count) {
            Ok(planes) => {
                let non_opaque = planes.iter().any(|p| p.has_non_opaque());
                self.log(
                    path,
                    &format!("{} sampled frame(s), non_opaque={non_opaque}", planes.len()),
                );
                non_opaque
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "alpha sampling failed, treating clip as opaque");
                false
            }
        }
    }

    /// Decide the mask polarity of a transparent clip. An explicit choice
    /// wins; otherwise the requested heuristic runs and failure to measure
    /// keeps the embedded polarity.
    pub fn resolve_polarity(
        &self,
        path: &Path,
        info: &MediaInfo,
        explicit: Option<bool>,
        check: PolarityCheck,
    ) -> MaskMode {
        if let Some(invert) = explicit {
            return if invert { MaskMode::Inverted } else { MaskMode::Embedded };
        }

        let invert = match check {
            PolarityCheck::Skip => false,
            PolarityCheck::Mask { threshold } => self
                .mask_stats(path, info)
                .map(|stats| {
                    let invert = should_invert_mask(&stats, threshold);
                    self.log(
                        path,
                        &format!(
                            "mask mean={:.3} min={:.3} max={:.3} invert={invert}",
                            stats.mean, stats.min, stats.max
                        ),
                    );
                    invert
                })
                .unwrap_or(false),
            PolarityCheck::Image { threshold } => self
                .image_coverage(path, info)
                .map(|cov| {
                    let invert = should_invert_image_alpha(&cov, threshold);
                    self.log(
                        path,
                        &format!(
                            "image transparent={:.3} opaque={:.3} invert={invert}",
                            cov.transparent_ratio, cov.opaque_ratio
                        ),
                    );
                    invert
                })
                .unwrap_or(false),
        };

        if invert {
            tracing::info!(path = %path.display(), "alpha mask looks inverted, flipping it");
            MaskMode::Inverted
        } else {
            MaskMode::Embedded
        }
    }

    pub fn mask_stats(&self, path: &Path, info: &MediaInfo) -> Option<MaskStats> {
        match self.toolkit.extract_alpha(path, info, self.sample_count) {
            Ok(planes) => MaskStats::from_planes(&planes),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot sample mask");
                None
            }
        }
    }

    pub fn image_coverage(&self, path: &Path, info: &MediaInfo) -> Option<AlphaCoverage> {
        match self.toolkit.extract_alpha(path, info, 1) {
            Ok(planes) => planes.first().and_then(|p| p.coverage()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read image alpha");
                None
            }
        }
    }

    fn log(&self, path: &Path, message: &str) {
        if self.verbose {
            tracing::info!(path = %path.display(), "alpha: {message}");
        } else {
            tracing::debug!(path = %path.display(), "alpha: {message}");
        }
    }
}
