//! Job entry point: every clip goes through alpha detection, optional
//! keying, background fill and normalization before it is composed.

use reelcut_core::clip::{ClipDescriptor, ClipList, ClipRole};
use reelcut_core::config::{AlphaFillConfig, StyleConfig};
use reelcut_core::types::{FillLayer, MaskMode, MediaInfo, NormalizedClip, OutputSettings, TimeUs, Timeline};
use std::path::{Path, PathBuf};

use crate::alpha::{AlphaDetector, PolarityCheck};
use crate::arena::TempFileArena;
use crate::chroma::{auto_tune_chroma_key, synthesize_alpha, ChromaKeyParams};
use crate::compose::TimelineComposer;
use crate::debug::{export_alpha_debug, DEBUG_SAMPLE_COUNT};
use crate::error::{RenderError, Result};
use crate::fill::build_fill_background;
use crate::normalize::{normalize, resolve_timing, NormalizeInput};
use crate::render::{self, RenderPlan, RenderProgress};
use crate::toolkit::MediaToolkit;

/// A composed timeline together with the intermediate files it points at.
///
/// Keyed and fill files stay on disk for as long as this value lives, so
/// keep it around until rendering has finished.
#[derive(Debug)]
pub struct ComposedVideo {
    timeline: Timeline,
    arena: TempFileArena,
}

impl ComposedVideo {
    pub fn duration(&self) -> TimeUs {
        self.timeline.duration
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.timeline.settings.width, self.timeline.settings.height)
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        self.arena.files()
    }

    pub fn render_plan(&self, output: &Path) -> Result<RenderPlan> {
        render::compile(&self.timeline, output)
    }

    /// Encode the timeline to `output` with the ffmpeg binary at `ffmpeg`.
    pub async fn render(
        &self,
        ffmpeg: &Path,
        output: &Path,
        progress_tx: tokio::sync::watch::Sender<RenderProgress>,
    ) -> Result<()> {
        let plan = self.render_plan(output)?;
        render::execute(&plan, ffmpeg, progress_tx, self.duration()).await
    }
}

struct ClipContext<'a> {
    toolkit: &'a dyn MediaToolkit,
    detector: AlphaDetector<'a>,
    style: &'a StyleConfig,
    settings: OutputSettings,
}

/// Run the whole clip list through the pipeline and compose the result.
///
/// Every clip's alpha-fill policy is resolved before any media is touched,
/// so a bad override fails the job whatever role it sits on. Scene and
/// b-roll failures abort the job with the failing clip named. Intro and
/// end-card media that cannot be used is logged and the card left out.
pub fn process_clips(
    clips: &ClipList,
    style: &StyleConfig,
    toolkit: &dyn MediaToolkit,
) -> Result<ComposedVideo> {
    clips.validate()?;
    style.validate()?;

    let policies = clips
        .clips
        .iter()
        .map(|clip| style.alpha_fill_for(clip))
        .collect::<reelcut_core::Result<Vec<_>>>()?;
    let intro = clips
        .clips
        .iter()
        .zip(&policies)
        .find(|(clip, _)| clip.role == ClipRole::Introcard);
    let fallback_endcard = match clips.card(ClipRole::Endcard) {
        Some(_) => None,
        None => style.fallback_endcard(),
    };
    let endcard = match &fallback_endcard {
        Some(card) => Some((card, style.alpha_fill_for(card)?)),
        None => clips
            .clips
            .iter()
            .zip(&policies)
            .find(|(clip, _)| clip.role == ClipRole::Endcard)
            .map(|(clip, policy)| (clip, policy.clone())),
    };
    let endcard_overlap = endcard
        .as_ref()
        .map(|(card, _)| style.endcard_overlap(card))
        .transpose()?;

    let settings = style.output_settings();
    let mut arena = TempFileArena::new()?.keep_on_drop(style.keep_temp_files);
    let ctx = ClipContext {
        toolkit,
        detector: AlphaDetector::new(toolkit, &style.alpha_detection),
        style,
        settings,
    };
    let mut composer = TimelineComposer::new(settings, style.transition_duration());

    tracing::info!(
        clips = clips.clips.len(),
        transitions = style.transitions.enabled,
        style_endcard = fallback_endcard.is_some(),
        dir = %arena.dir().display(),
        "processing clips"
    );

    let mut first_opaque: Option<PathBuf> = None;
    let mut last_opaque: Option<PathBuf> = None;
    for (index, (clip, policy)) in clips.clips.iter().zip(&policies).enumerate() {
        if !clip.role.is_required() {
            continue;
        }
        tracing::info!(index, clip = %clip.label(), role = %clip.role, "processing clip");
        let prepared = prepare_clip(&ctx, &mut arena, clip, policy, last_opaque.as_deref())
            .map_err(|e| e.for_clip(index, clip.role, &clip.source))?;
        if prepared.mask == MaskMode::Opaque {
            last_opaque = Some(clip.source.clone());
            first_opaque.get_or_insert_with(|| clip.source.clone());
        }
        composer.push(prepared)?;
    }

    if let Some((intro, policy)) = intro {
        match prepare_clip(&ctx, &mut arena, intro, policy, first_opaque.as_deref()) {
            Ok(prepared) => composer.set_intro(prepared)?,
            Err(e) => {
                tracing::warn!(clip = %intro.label(), error = %e, "intro-card unusable, continuing without it")
            }
        }
    }

    if let (Some((endcard, policy)), Some(overlap)) = (&endcard, endcard_overlap) {
        match prepare_clip(&ctx, &mut arena, endcard, policy, last_opaque.as_deref()) {
            Ok(prepared) => composer.set_endcard(prepared, overlap)?,
            Err(e) => {
                tracing::warn!(clip = %endcard.label(), error = %e, "end-card unusable, continuing without it")
            }
        }
    }

    let timeline = composer.finalize()?;
    tracing::info!(
        duration = %timeline.duration,
        width = settings.width,
        height = settings.height,
        temp_files = arena.files().len(),
        "composition ready"
    );
    Ok(ComposedVideo { timeline, arena })
}

/// Probe, resolve alpha, build the fill and normalize one clip.
/// `fill_source` is the opaque clip whose echo backs a transparent one.
fn prepare_clip(
    ctx: &ClipContext<'_>,
    arena: &mut TempFileArena,
    clip: &ClipDescriptor,
    config: &AlphaFillConfig,
    fill_source: Option<&Path>,
) -> Result<NormalizedClip> {
    let info = ctx.toolkit.probe(&clip.source)?;
    let timing = resolve_timing(clip, &info)?;

    let (video_path, mask) = resolve_alpha(ctx, arena, clip, config, &info);
    if mask != MaskMode::Opaque {
        if let Some(dir) = &ctx.style.alpha_detection.debug_export_dir {
            dump_alpha_frames(ctx, clip, &video_path, &info, mask, dir);
        }
    }

    let fill = if mask != MaskMode::Opaque && config.enabled && config.use_blur_background {
        match fill_source {
            Some(source) => match build_fill_background(ctx.toolkit, arena, source, timing.duration, config) {
                Ok(path) => Some(FillLayer { path }),
                Err(e) => {
                    tracing::warn!(clip = %clip.label(), error = %e, "fill background failed, using plain resize");
                    None
                }
            },
            None => {
                tracing::warn!(clip = %clip.label(), "no preceding opaque clip to fill from, using plain resize");
                None
            }
        }
    } else {
        None
    };

    normalize(
        NormalizeInput {
            descriptor: clip,
            info: &info,
            timing,
            video_path,
            mask,
            fill,
        },
        &ctx.settings,
    )
}

/// Debug frames never affect the job; failures are only logged.
fn dump_alpha_frames(
    ctx: &ClipContext<'_>,
    clip: &ClipDescriptor,
    video_path: &Path,
    source_info: &MediaInfo,
    mask: MaskMode,
    dir: &Path,
) {
    let info = if video_path == clip.source.as_path() {
        Ok(source_info.clone())
    } else {
        ctx.toolkit.probe(video_path)
    };
    let result = info.and_then(|info| {
        export_alpha_debug(ctx.toolkit, &clip.source, video_path, &info, mask, dir, DEBUG_SAMPLE_COUNT)
    });
    if let Err(e) = result {
        tracing::warn!(clip = %clip.label(), error = %e, "alpha debug export failed");
    }
}

/// Pick the video to show and its mask mode. Forced keying wins over any
/// detected alpha; a keying failure falls back to the untouched source.
fn resolve_alpha(
    ctx: &ClipContext<'_>,
    arena: &mut TempFileArena,
    clip: &ClipDescriptor,
    config: &AlphaFillConfig,
    info: &MediaInfo,
) -> (PathBuf, MaskMode) {
    if clip.role == ClipRole::Scene {
        return (clip.source.clone(), MaskMode::Opaque);
    }

    if config.force_chroma_key && !info.is_image {
        match key_clip(ctx, arena, &clip.source, config) {
            Ok((keyed, keyed_info)) => {
                let mask = resolve_mask(ctx, clip, config, &keyed, &keyed_info);
                return (keyed, mask);
            }
            Err(e) => {
                tracing::warn!(clip = %clip.label(), error = %e, "chroma key failed, using source as opaque");
                return (clip.source.clone(), MaskMode::Opaque);
            }
        }
    }

    // B-roll video only cares about alpha when fill is on; images and
    // cards always keep theirs.
    let wants_alpha = config.enabled || info.is_image || clip.role.is_card();
    if !wants_alpha
        || !ctx
            .detector
            .has_alpha_with_info(&clip.source, info, ctx.detector.require_non_opaque())
    {
        return (clip.source.clone(), MaskMode::Opaque);
    }

    let mask = resolve_mask(ctx, clip, config, &clip.source, info);
    (clip.source.clone(), mask)
}

fn key_clip(
    ctx: &ClipContext<'_>,
    arena: &mut TempFileArena,
    source: &Path,
    config: &AlphaFillConfig,
) -> Result<(PathBuf, MediaInfo)> {
    let similarity = if config.auto_tune {
        auto_tune_chroma_key(ctx.toolkit, arena, source, config)?
    } else {
        config.chroma_key_similarity
    };
    let params = ChromaKeyParams::from_config(config, similarity);
    let keyed = synthesize_alpha(ctx.toolkit, arena, source, &params)?;
    let keyed_info = ctx
        .toolkit
        .probe(&keyed)
        .map_err(|e| RenderError::AlphaSynthesis(format!("keyed output unreadable: {e}")))?;
    tracing::info!(source = %source.display(), similarity, "chroma key applied");
    Ok((keyed, keyed_info))
}

fn resolve_mask(
    ctx: &ClipContext<'_>,
    clip: &ClipDescriptor,
    config: &AlphaFillConfig,
    path: &Path,
    info: &MediaInfo,
) -> MaskMode {
    let explicit = clip.invert_alpha.or(config.invert_alpha);
    let check = if !config.auto_invert_alpha {
        PolarityCheck::Skip
    } else if info.is_image {
        PolarityCheck::Image {
            threshold: config.image_invert_threshold(),
        }
    } else if clip.role.is_card() {
        PolarityCheck::Mask {
            threshold: config.mask_invert_threshold(),
        }
    } else {
        PolarityCheck::Skip
    };
    ctx.detector.resolve_polarity(path, info, explicit, check)
}
