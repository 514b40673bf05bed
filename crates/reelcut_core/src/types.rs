use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::path::PathBuf;
use uuid::Uuid;

use crate::clip::ClipRole;

// ---------------------------------------------------------------------------
// TimeUs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeUs(pub i64);

impl TimeUs {
    pub const ZERO: Self = Self(0);

    /// Rounds to the nearest microsecond so that decimal second values
    /// (e.g. `9.9`) map to exact integer times.
    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000_000.0).round() as i64)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0 / 1_000
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl Add for TimeUs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeUs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<i64> for TimeUs {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i64> for TimeUs {
    type Output = Self;
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl fmt::Display for TimeUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_us = self.0.unsigned_abs();
        let total_ms = total_us / 1_000;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// MediaInfo
// ---------------------------------------------------------------------------

/// Frame rate assumed when a probe cannot tell.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration_us: TimeUs,
    pub pixel_format: Option<String>,
    pub codec_name: String,
    pub has_audio: bool,
    pub audio_channels: u32,
    pub audio_sample_rate: u32,
    pub is_image: bool,
}

impl MediaInfo {
    /// Whether the pixel format names an alpha plane. Says nothing about
    /// whether the alpha is actually used.
    pub fn declares_alpha(&self) -> bool {
        self.pixel_format
            .as_deref()
            .map(pix_fmt_has_alpha)
            .unwrap_or(false)
    }

    pub fn frame_rate_or_default(&self) -> f64 {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            self.frame_rate
        } else {
            FALLBACK_FRAME_RATE
        }
    }
}

/// Matches the alpha-carrying pixel format families
/// (`rgba`, `argb`, `bgra`, `abgr`, `yuva*`, `ya*`, `gbrap*`).
pub fn pix_fmt_has_alpha(pix_fmt: &str) -> bool {
    pix_fmt
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| {
            ["rgba", "argb", "bgra", "abgr", "yuva", "gbrap"]
                .iter()
                .any(|family| token.starts_with(family))
                || (token.starts_with("ya")
                    && token[2..].chars().next().is_some_and(|c| c.is_ascii_digit()))
        })
}

// ---------------------------------------------------------------------------
// OutputSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub sample_rate: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        preset_shorts()
    }
}

/// 1080x1920 30fps (vertical/shorts) preset.
pub fn preset_shorts() -> OutputSettings {
    OutputSettings {
        width: 1080,
        height: 1920,
        fps: FALLBACK_FRAME_RATE,
        sample_rate: 48000,
    }
}

// ---------------------------------------------------------------------------
// NormalizedClip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    Image,
}

/// Resolved source range, both ends inside the probed duration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrimRange {
    pub start: TimeUs,
    pub end: TimeUs,
}

impl TrimRange {
    pub fn duration(&self) -> TimeUs {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSource {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub trim: Option<TrimRange>,
}

/// Uniform cover-scale followed by a centre crop to the output frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropGeometry {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaskMode {
    Opaque,
    Embedded,
    Inverted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillLayer {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioEnvelope {
    pub fade_in: TimeUs,
    pub fade_out: TimeUs,
}

impl AudioEnvelope {
    /// Fades only ever lengthen: applying the same fade twice is a no-op.
    pub fn with_fade_in(self, fade: TimeUs) -> Self {
        Self {
            fade_in: self.fade_in.max(fade),
            ..self
        }
    }

    pub fn with_fade_out(self, fade: TimeUs) -> Self {
        Self {
            fade_out: self.fade_out.max(fade),
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipAudio {
    pub path: PathBuf,
    pub trim: Option<TrimRange>,
    pub envelope: AudioEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedClip {
    pub id: Uuid,
    pub role: ClipRole,
    pub label: String,
    pub video: VideoSource,
    pub geometry: CropGeometry,
    pub mask: MaskMode,
    pub fill: Option<FillLayer>,
    pub audio: Option<ClipAudio>,
    pub duration: TimeUs,
}

impl NormalizedClip {
    /// True when the clip still carries transparency after fill resolution.
    pub fn is_transparent(&self) -> bool {
        self.mask != MaskMode::Opaque && self.fill.is_none()
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Layer {
    Base,
    Intro,
    Endcard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VideoEffect {
    /// Enter from the right edge to centre over `duration`.
    SlideIn { duration: TimeUs },
    /// Alpha fade from transparent to opaque over `duration`.
    FadeIn { duration: TimeUs },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    pub clip: NormalizedClip,
    pub start: TimeUs,
    pub layer: Layer,
    pub effects: Vec<VideoEffect>,
}

impl Placement {
    pub fn end(&self) -> TimeUs {
        self.start + self.clip.duration
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompositionMode {
    StraightConcat,
    SlideTransition { duration: TimeUs },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeline {
    pub placements: Vec<Placement>,
    pub mode: CompositionMode,
    pub duration: TimeUs,
    pub settings: OutputSettings,
}

impl Timeline {
    pub fn base_placements(&self) -> impl Iterator<Item = &Placement> {
        self.placements.iter().filter(|p| p.layer == Layer::Base)
    }

    pub fn layer(&self, layer: Layer) -> Option<&Placement> {
        self.placements.iter().find(|p| p.layer == layer)
    }

    /// End of the last base clip, before any end-card extension.
    pub fn content_end(&self) -> TimeUs {
        self.base_placements()
            .map(Placement::end)
            .max()
            .unwrap_or(TimeUs::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
