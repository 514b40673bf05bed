//! Chroma-key alpha synthesis and similarity auto-tuning.

use reelcut_core::config::{AlphaFillConfig, KeyColor};
use std::path::{Path, PathBuf};

use crate::arena::TempFileArena;
use crate::error::{RenderError, Result};
use crate::toolkit::{MediaToolkit, SignalStats};

/// Alpha range that ends the similarity sweep early (8-bit scale).
pub const EARLY_EXIT_MAX_MIN: f64 = 5.0;
pub const EARLY_EXIT_MIN_MAX: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaKeyParams {
    pub color: KeyColor,
    pub similarity: f64,
    pub blend: f64,
    /// Box-blur radius applied to the alpha plane only.
    pub edge_feather: f64,
}

impl ChromaKeyParams {
    pub fn from_config(config: &AlphaFillConfig, similarity: f64) -> Self {
        Self {
            color: config.chroma_key_color,
            similarity,
            blend: config.chroma_key_blend,
            edge_feather: config.edge_feather,
        }
    }
}

pub fn chroma_key_filter(params: &ChromaKeyParams) -> String {
    let key = format!(
        "colorkey={}:{}:{},format=rgba",
        params.color.to_ffmpeg(),
        params.similarity,
        params.blend
    );
    let radius = params.edge_feather.round() as u32;
    if radius == 0 {
        return key;
    }
    format!(
        "{key},split=2[rgb][a];[a]alphaextract,boxblur={radius}:{radius}[ablur];[rgb][ablur]alphamerge"
    )
}

/// Key `params.color` out of `source` into a new alpha-carrying file
/// owned by `arena`.
pub fn synthesize_alpha(
    toolkit: &dyn MediaToolkit,
    arena: &mut TempFileArena,
    source: &Path,
    params: &ChromaKeyParams,
) -> Result<PathBuf> {
    let output = arena.allocate("keyed", "mov");
    tracing::debug!(
        source = %source.display(),
        color = %params.color,
        similarity = params.similarity,
        blend = params.blend,
        feather = params.edge_feather,
        "chroma keying"
    );
    match toolkit.chroma_key(source, params, &output) {
        Ok(()) => Ok(output),
        Err(e) => {
            arena.discard(&output);
            Err(RenderError::AlphaSynthesis(format!(
                "chroma key of {} failed: {e}",
                source.display()
            )))
        }
    }
}

/// Similarity candidates `min + i * step`, computed by index so repeated
/// sweeps visit bit-identical values.
pub fn tune_candidates(min: f64, max: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || max < min {
        return vec![min];
    }
    let last = ((max - min) / step + 1e-6).floor() as usize;
    (0..=last).map(|i| min + i as f64 * step).collect()
}

/// Wide spread centred near mid-grey scores highest.
pub fn tune_score(stats: &SignalStats) -> f64 {
    (stats.max - stats.min) - (127.5 - stats.avg).abs()
}

pub fn spans_full_range(stats: &SignalStats) -> bool {
    stats.min <= EARLY_EXIT_MAX_MIN && stats.max >= EARLY_EXIT_MIN_MAX
}

/// Sweep the similarity range and return the first value whose mask spans
/// the full range, else the best-scoring one.
pub fn auto_tune_chroma_key(
    toolkit: &dyn MediaToolkit,
    arena: &mut TempFileArena,
    source: &Path,
    config: &AlphaFillConfig,
) -> Result<f64> {
    let candidates = tune_candidates(config.auto_tune_min, config.auto_tune_max, config.auto_tune_step);
    let mut best_similarity = config.auto_tune_min;
    let mut best_score = -1.0;

    for similarity in candidates {
        let params = ChromaKeyParams {
            edge_feather: 0.0,
            ..ChromaKeyParams::from_config(config, similarity)
        };
        let keyed = synthesize_alpha(toolkit, arena, source, &params)?;
        let stats = toolkit.alpha_stats(&keyed);
        arena.discard(&keyed);

        let stats = match stats {
            Ok(stats) => stats,
            Err(e) => {
                tracing::debug!(similarity, error = %e, "auto-tune candidate has no alpha statistics");
                continue;
            }
        };
        let score = tune_score(&stats);
        tracing::debug!(
            similarity,
            y_min = stats.min,
            y_max = stats.max,
            y_avg = stats.avg,
            score,
            "auto-tune candidate"
        );
        if score > best_score {
            best_score = score;
            best_similarity = similarity;
        }
        if spans_full_range(&stats) {
            tracing::info!(source = %source.display(), similarity, "auto-tune stopped early");
            return Ok(similarity);
        }
    }

    tracing::info!(source = %source.display(), similarity = best_similarity, score = best_score, "auto-tune picked best candidate");
    Ok(best_similarity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolkit;

    fn stats(min: f64, max: f64, avg: f64) -> SignalStats {
        SignalStats { min, max, avg }
    }

    #[test]
    fn filter_without_feather() {
        let params = ChromaKeyParams {
            color: KeyColor { r: 0, g: 255, b: 0 },
            similarity: 0.08,
            blend: 0.0,
            edge_feather: 0.0,
        };
        assert_eq!(chroma_key_filter(&params), "colorkey=0x00FF00:0.08:0,format=rgba");
    }

    #[test]
    fn feather_blurs_alpha_plane_only() {
        let params = ChromaKeyParams {
            color: KeyColor::BLACK,
            similarity: 0.1,
            blend: 0.05,
            edge_feather: 2.0,
        };
        let filter = chroma_key_filter(&params);
        assert!(filter.starts_with("colorkey=0x000000:0.1:0.05,format=rgba,split=2[rgb][a]"));
        assert!(filter.contains("[a]alphaextract,boxblur=2:2[ablur]"));
        assert!(filter.ends_with("[rgb][ablur]alphamerge"));
    }

    #[test]
    fn candidates_include_both_ends() {
        let c = tune_candidates(0.05, 0.30, 0.03);
        assert_eq!(c.len(), 9);
        assert_eq!(c[0], 0.05);
        assert!((c[8] - 0.29).abs() < 1e-9);
        assert_eq!(tune_candidates(0.1, 0.2, 0.05).len(), 3);
        assert_eq!(tune_candidates(0.2, 0.2, 0.05), vec![0.2]);
    }

    #[test]
    fn score_prefers_wide_balanced_masks() {
        assert!(tune_score(&stats(0.0, 255.0, 127.5)) > tune_score(&stats(0.0, 255.0, 250.0)));
        assert!(tune_score(&stats(0.0, 255.0, 127.5)) > tune_score(&stats(100.0, 150.0, 127.5)));
        assert!(spans_full_range(&stats(5.0, 200.0, 90.0)));
        assert!(!spans_full_range(&stats(6.0, 255.0, 90.0)));
    }

    fn tuning_fake() -> FakeToolkit {
        // Spread widens with similarity and reaches full range at 0.20.
        FakeToolkit::new()
            .with_video("/in/broll.mp4", 4.0)
            .with_key_stats(|sim| {
                let min = (60.0 - sim * 300.0).max(0.0);
                SignalStats { min, max: 255.0, avg: 110.0 }
            })
    }

    #[test]
    fn auto_tune_stops_at_first_full_range_candidate() {
        let fake = tuning_fake();
        let mut arena = TempFileArena::new().unwrap();
        let config = AlphaFillConfig {
            auto_tune_min: 0.05,
            auto_tune_max: 0.30,
            auto_tune_step: 0.05,
            ..AlphaFillConfig::default()
        };
        let sim = auto_tune_chroma_key(&fake, &mut arena, Path::new("/in/broll.mp4"), &config).unwrap();
        assert!((sim - 0.20).abs() < 1e-9);
        assert_eq!(fake.keyed_similarities().len(), 4);
        assert!(arena.files().is_empty());
    }

    #[test]
    fn auto_tune_is_deterministic() {
        let config = AlphaFillConfig {
            auto_tune_min: 0.01,
            auto_tune_max: 0.10,
            auto_tune_step: 0.03,
            ..AlphaFillConfig::default()
        };
        let run = || {
            let fake = tuning_fake();
            let mut arena = TempFileArena::new().unwrap();
            auto_tune_chroma_key(&fake, &mut arena, Path::new("/in/broll.mp4"), &config).unwrap()
        };
        let first = run();
        assert_eq!(first.to_bits(), run().to_bits());
        // No candidate reaches full range, so the widest spread wins.
        assert!((first - 0.10).abs() < 1e-9);
    }

    #[test]
    fn auto_tune_falls_back_to_min_when_nothing_scores() {
        let fake = FakeToolkit::new()
            .with_video("/in/broll.mp4", 4.0)
            .with_key_stats(|_| SignalStats { min: 255.0, max: 255.0, avg: 255.0 });
        let mut arena = TempFileArena::new().unwrap();
        let config = AlphaFillConfig::default();
        let sim = auto_tune_chroma_key(&fake, &mut arena, Path::new("/in/broll.mp4"), &config).unwrap();
        assert_eq!(sim, config.auto_tune_min);
    }

    #[test]
    fn synthesis_failure_is_alpha_synthesis_error() {
        let fake = FakeToolkit::new().with_video("/in/broll.mp4", 4.0).failing_chroma_key();
        let mut arena = TempFileArena::new().unwrap();
        let params = ChromaKeyParams::from_config(&AlphaFillConfig::default(), 0.08);
        let err = synthesize_alpha(&fake, &mut arena, Path::new("/in/broll.mp4"), &params).unwrap_err();
        assert!(matches!(err, RenderError::AlphaSynthesis(_)));
        assert!(arena.files().is_empty());
    }

    #[test]
    fn synthesized_clip_reports_real_alpha() {
        let fake = FakeToolkit::new().with_video("/in/broll.mp4", 4.0);
        let mut arena = TempFileArena::new().unwrap();
        let params = ChromaKeyParams::from_config(&AlphaFillConfig::default(), 0.08);
        let keyed = synthesize_alpha(&fake, &mut arena, Path::new("/in/broll.mp4"), &params).unwrap();
        let detector = crate::alpha::AlphaDetector::new(&fake, &Default::default());
        assert!(detector.has_alpha(&keyed, true));
        assert_eq!(arena.files(), &[keyed]);
    }
}
