//! Fit clips to the output frame, resolve trims and add click-free audio edges.

use reelcut_core::clip::ClipDescriptor;
use reelcut_core::types::{
    AudioEnvelope, ClipAudio, CropGeometry, FillLayer, MaskMode, MediaInfo, NormalizedClip,
    OutputSettings, SourceKind, TimeUs, TrimRange, VideoSource,
};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{RenderError, Result};

/// Upper bound of the fade applied at every clip edge.
pub const BOUNDARY_FADE: TimeUs = TimeUs(50_000);

/// Cover-scale `src` into the output frame and centre-crop the overflow.
/// Returns `None` for sources without dimensions.
pub fn crop_geometry(src_width: u32, src_height: u32, settings: &OutputSettings) -> Option<CropGeometry> {
    if src_width == 0 || src_height == 0 || settings.width == 0 || settings.height == 0 {
        return None;
    }
    let (tw, th) = (settings.width as u64, settings.height as u64);
    let (sw, sh) = (src_width as u64, src_height as u64);

    let (scaled_width, scaled_height) = if sw * th > sh * tw {
        // Wider than the frame: match height, crop the sides.
        (even_at_least(scale_dim(sw, th, sh), tw), th)
    } else {
        (tw, even_at_least(scale_dim(sh, tw, sw), th))
    };

    Some(CropGeometry {
        scaled_width: scaled_width as u32,
        scaled_height: scaled_height as u32,
        x: ((scaled_width - tw) / 2) as u32,
        y: ((scaled_height - th) / 2) as u32,
        width: settings.width,
        height: settings.height,
    })
}

/// `value * num / den`, rounded to nearest.
fn scale_dim(value: u64, num: u64, den: u64) -> u64 {
    (value * num + den / 2) / den
}

fn even_at_least(value: u64, min: u64) -> u64 {
    let even = value + (value & 1);
    even.max(min)
}

/// Resolve `trim_start`/`trim_end` against the probed duration. Negative
/// values count back from the end. `Ok(None)` means the whole source.
pub fn resolve_trim(
    start: Option<f64>,
    end: Option<f64>,
    duration: TimeUs,
) -> std::result::Result<Option<TrimRange>, String> {
    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    if !duration.is_positive() {
        return Err("cannot trim a source of unknown duration".to_string());
    }

    let resolve = |raw: f64| {
        let t = TimeUs::from_seconds(raw);
        let t = if raw < 0.0 { duration + t } else { t };
        t.clamp(TimeUs::ZERO, duration)
    };
    let range = TrimRange {
        start: start.map(resolve).unwrap_or(TimeUs::ZERO),
        end: end.map(resolve).unwrap_or(duration),
    };
    if range.end <= range.start {
        return Err(format!(
            "empty trim range {} .. {} (source is {})",
            range.start, range.end, duration
        ));
    }
    Ok(Some(range))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipTiming {
    pub trim: Option<TrimRange>,
    pub duration: TimeUs,
}

/// Final length of a clip: image display time, trimmed range or full source.
pub fn resolve_timing(descriptor: &ClipDescriptor, info: &MediaInfo) -> Result<ClipTiming> {
    if info.is_image {
        return Ok(ClipTiming {
            trim: None,
            duration: TimeUs::from_seconds(descriptor.image_duration_seconds()),
        });
    }
    let trim = resolve_trim(descriptor.trim_start, descriptor.trim_end, info.duration_us)
        .map_err(|reason| RenderError::decode(&descriptor.source, reason))?;
    let duration = trim.map(|t| t.duration()).unwrap_or(info.duration_us);
    if !duration.is_positive() {
        return Err(RenderError::decode(&descriptor.source, "source has no duration"));
    }
    Ok(ClipTiming { trim, duration })
}

/// `min(50ms, duration / 4)`.
pub fn boundary_fade(duration: TimeUs) -> TimeUs {
    BOUNDARY_FADE.min(duration / 4).max(TimeUs::ZERO)
}

/// Fade both audio edges. Only the envelope changes, never the length.
pub fn apply_boundary_fades(clip: &mut NormalizedClip) {
    let fade = boundary_fade(clip.duration);
    if let Some(audio) = clip.audio.as_mut() {
        audio.envelope = audio.envelope.with_fade_in(fade).with_fade_out(fade);
    }
}

pub struct NormalizeInput<'a> {
    pub descriptor: &'a ClipDescriptor,
    pub info: &'a MediaInfo,
    pub timing: ClipTiming,
    /// Video actually shown: the source, or its chroma-keyed copy.
    pub video_path: PathBuf,
    pub mask: MaskMode,
    pub fill: Option<FillLayer>,
}

pub fn normalize(input: NormalizeInput<'_>, settings: &OutputSettings) -> Result<NormalizedClip> {
    let NormalizeInput {
        descriptor,
        info,
        timing,
        video_path,
        mask,
        fill,
    } = input;

    let geometry = crop_geometry(info.width, info.height, settings).ok_or_else(|| {
        RenderError::decode(
            &descriptor.source,
            format!("invalid frame size {}x{}", info.width, info.height),
        )
    })?;

    let kind = if info.is_image {
        SourceKind::Image
    } else {
        SourceKind::Video
    };

    // The original source keeps the audio even when a keyed copy is shown.
    let audio = (info.has_audio && !info.is_image).then(|| ClipAudio {
        path: descriptor.source.clone(),
        trim: timing.trim,
        envelope: AudioEnvelope::default(),
    });

    let mut clip = NormalizedClip {
        id: Uuid::new_v4(),
        role: descriptor.role,
        label: descriptor.label(),
        video: VideoSource {
            path: video_path,
            kind,
            trim: timing.trim,
        },
        geometry,
        mask,
        fill,
        audio,
        duration: timing.duration,
    };
    apply_boundary_fades(&mut clip);

    tracing::debug!(
        clip = %clip.label,
        role = %clip.role,
        duration = %clip.duration,
        scaled = %format!("{}x{}", geometry.scaled_width, geometry.scaled_height),
        mask = ?clip.mask,
        fill = clip.fill.is_some(),
        "normalized clip"
    );
    Ok(clip)
}
