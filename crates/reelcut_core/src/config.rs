use crate::clip::{ClipDescriptor, ClipRole};
use crate::error::{CoreError, Result};
use crate::types::{preset_shorts, OutputSettings, TimeUs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Mask-statistics threshold used for video and card polarity checks.
pub const DEFAULT_MASK_INVERT_THRESHOLD: f64 = 0.75;
/// Coverage threshold used for still-image polarity checks.
pub const DEFAULT_IMAGE_INVERT_THRESHOLD: f64 = 0.3;

// ---------------------------------------------------------------------------
// KeyColor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyColor {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };

    /// `0xRRGGBB` as understood by the keyer.
    pub fn to_ffmpeg(&self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for KeyColor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .or_else(|| trimmed.strip_prefix('#'))
            .unwrap_or(trimmed);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::config(
                "chroma_key_color",
                format!("`{s}` is not a 0xRRGGBB colour"),
            ));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| CoreError::config("chroma_key_color", e.to_string()))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl fmt::Display for KeyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ffmpeg())
    }
}

// ---------------------------------------------------------------------------
// AlphaFillConfig
// ---------------------------------------------------------------------------

/// Partial alpha-fill section as it appears in style or clip JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlphaFillOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_chroma_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroma_key_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroma_key_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroma_key_blend: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_feather: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_tune: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_tune_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_tune_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_tune_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_sigma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_blur_background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_pingpong: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invert_alpha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_invert_alpha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_invert_alpha_threshold: Option<f64>,
}

impl AlphaFillOverride {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Field-wise layering: any value set in `over` replaces ours.
    pub fn layer(&self, over: &AlphaFillOverride) -> AlphaFillOverride {
        AlphaFillOverride {
            enabled: over.enabled.or(self.enabled),
            force_chroma_key: over.force_chroma_key.or(self.force_chroma_key),
            chroma_key_color: over
                .chroma_key_color
                .clone()
                .or_else(|| self.chroma_key_color.clone()),
            chroma_key_similarity: over.chroma_key_similarity.or(self.chroma_key_similarity),
            chroma_key_blend: over.chroma_key_blend.or(self.chroma_key_blend),
            edge_feather: over.edge_feather.or(self.edge_feather),
            auto_tune: over.auto_tune.or(self.auto_tune),
            auto_tune_min: over.auto_tune_min.or(self.auto_tune_min),
            auto_tune_max: over.auto_tune_max.or(self.auto_tune_max),
            auto_tune_step: over.auto_tune_step.or(self.auto_tune_step),
            blur_sigma: over.blur_sigma.or(self.blur_sigma),
            slow_factor: over.slow_factor.or(self.slow_factor),
            use_blur_background: over.use_blur_background.or(self.use_blur_background),
            fill_pingpong: over.fill_pingpong.or(self.fill_pingpong),
            invert_alpha: over.invert_alpha.or(self.invert_alpha),
            auto_invert_alpha: over.auto_invert_alpha.or(self.auto_invert_alpha),
            auto_invert_alpha_threshold: over
                .auto_invert_alpha_threshold
                .or(self.auto_invert_alpha_threshold),
        }
    }
}

/// Fully resolved transparency policy for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaFillConfig {
    pub enabled: bool,
    pub force_chroma_key: bool,
    pub chroma_key_color: KeyColor,
    pub chroma_key_similarity: f64,
    pub chroma_key_blend: f64,
    pub edge_feather: f64,
    pub auto_tune: bool,
    pub auto_tune_min: f64,
    pub auto_tune_max: f64,
    pub auto_tune_step: f64,
    pub blur_sigma: f64,
    pub slow_factor: f64,
    pub use_blur_background: bool,
    /// Play the fill forward then backward instead of stretching it further.
    pub fill_pingpong: bool,
    pub invert_alpha: Option<bool>,
    pub auto_invert_alpha: bool,
    pub auto_invert_alpha_threshold: Option<f64>,
}

impl Default for AlphaFillConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_chroma_key: false,
            chroma_key_color: KeyColor::BLACK,
            chroma_key_similarity: 0.08,
            chroma_key_blend: 0.0,
            edge_feather: 0.0,
            auto_tune: false,
            auto_tune_min: 0.05,
            auto_tune_max: 0.30,
            auto_tune_step: 0.03,
            blur_sigma: 8.0,
            slow_factor: 1.5,
            use_blur_background: true,
            fill_pingpong: false,
            invert_alpha: None,
            auto_invert_alpha: true,
            auto_invert_alpha_threshold: None,
        }
    }
}

impl AlphaFillConfig {
    /// Base for end and intro cards: nothing is keyed or filled unless asked.
    pub fn card_defaults(enabled: bool) -> Self {
        Self {
            enabled,
            force_chroma_key: false,
            use_blur_background: false,
            ..Self::default()
        }
    }

    /// Apply `over` field by field, then validate the result.
    pub fn merged(&self, over: &AlphaFillOverride) -> Result<Self> {
        let chroma_key_color = match &over.chroma_key_color {
            Some(s) => s.parse()?,
            None => self.chroma_key_color,
        };
        let merged = Self {
            enabled: over.enabled.unwrap_or(self.enabled),
            force_chroma_key: over.force_chroma_key.unwrap_or(self.force_chroma_key),
            chroma_key_color,
            chroma_key_similarity: over.chroma_key_similarity.unwrap_or(self.chroma_key_similarity),
            chroma_key_blend: over.chroma_key_blend.unwrap_or(self.chroma_key_blend),
            edge_feather: over.edge_feather.unwrap_or(self.edge_feather),
            auto_tune: over.auto_tune.unwrap_or(self.auto_tune),
            auto_tune_min: over.auto_tune_min.unwrap_or(self.auto_tune_min),
            auto_tune_max: over.auto_tune_max.unwrap_or(self.auto_tune_max),
            auto_tune_step: over.auto_tune_step.unwrap_or(self.auto_tune_step),
            blur_sigma: over.blur_sigma.unwrap_or(self.blur_sigma),
            slow_factor: over.slow_factor.unwrap_or(self.slow_factor),
            use_blur_background: over.use_blur_background.unwrap_or(self.use_blur_background),
            fill_pingpong: over.fill_pingpong.unwrap_or(self.fill_pingpong),
            invert_alpha: over.invert_alpha.or(self.invert_alpha),
            auto_invert_alpha: over.auto_invert_alpha.unwrap_or(self.auto_invert_alpha),
            auto_invert_alpha_threshold: over
                .auto_invert_alpha_threshold
                .or(self.auto_invert_alpha_threshold),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Range checks. Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        check_ratio("chroma_key_similarity", self.chroma_key_similarity)?;
        check_ratio("chroma_key_blend", self.chroma_key_blend)?;
        check_ratio("auto_tune_min", self.auto_tune_min)?;
        check_ratio("auto_tune_max", self.auto_tune_max)?;
        if let Some(t) = self.auto_invert_alpha_threshold {
            check_ratio("auto_invert_alpha_threshold", t)?;
        }
        if self.auto_tune_min > self.auto_tune_max {
            return Err(CoreError::config(
                "auto_tune_min",
                format!(
                    "{} is greater than auto_tune_max {}",
                    self.auto_tune_min, self.auto_tune_max
                ),
            ));
        }
        if !(self.auto_tune_step > 0.0 && self.auto_tune_step.is_finite()) {
            return Err(CoreError::config(
                "auto_tune_step",
                format!("{} must be positive", self.auto_tune_step),
            ));
        }
        if !(self.edge_feather >= 0.0 && self.edge_feather.is_finite()) {
            return Err(CoreError::config(
                "edge_feather",
                format!("{} must be non-negative", self.edge_feather),
            ));
        }
        if !(self.blur_sigma >= 0.0 && self.blur_sigma.is_finite()) {
            return Err(CoreError::config(
                "blur_sigma",
                format!("{} must be non-negative", self.blur_sigma),
            ));
        }
        if !(self.slow_factor >= 1.0 && self.slow_factor.is_finite()) {
            return Err(CoreError::config(
                "slow_factor",
                format!("{} must be at least 1", self.slow_factor),
            ));
        }
        Ok(())
    }

    pub fn mask_invert_threshold(&self) -> f64 {
        self.auto_invert_alpha_threshold
            .unwrap_or(DEFAULT_MASK_INVERT_THRESHOLD)
    }

    pub fn image_invert_threshold(&self) -> f64 {
        self.auto_invert_alpha_threshold
            .unwrap_or(DEFAULT_IMAGE_INVERT_THRESHOLD)
    }
}

fn check_ratio(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::config(field, format!("{value} is outside [0, 1]")))
    }
}

// ---------------------------------------------------------------------------
// StyleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlphaDetectionConfig {
    pub verbose: bool,
    pub use_ffprobe: bool,
    pub require_non_opaque: bool,
    pub sample_count: usize,
    /// When set, sample RGBA frames of every see-through clip are written
    /// under `<dir>/<clip name>/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_export_dir: Option<PathBuf>,
}

impl Default for AlphaDetectionConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            use_ffprobe: true,
            require_non_opaque: true,
            sample_count: 3,
            debug_export_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransitionConfig {
    pub enabled: bool,
    pub duration: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndcardConfig {
    /// Append `path` when the clip list carries no end-card of its own.
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub overlap_seconds: f64,
}

impl Default for EndcardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            overlap_seconds: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameInterpolationConfig {
    pub enabled: bool,
    pub target_fps: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostprocessConfig {
    pub frame_interpolation: FrameInterpolationConfig,
}

/// Style document. Every section is optional and unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StyleConfig {
    pub broll_alpha_fill: Option<AlphaFillOverride>,
    pub endcard_alpha_fill: Option<AlphaFillOverride>,
    pub introcard_alpha_fill: Option<AlphaFillOverride>,
    pub alpha_detection: AlphaDetectionConfig,
    pub transitions: TransitionConfig,
    pub endcard: EndcardConfig,
    pub postprocess: PostprocessConfig,
    pub keep_temp_files: bool,
}

impl StyleConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let style: StyleConfig = serde_json::from_str(&data)?;
        style.validate()?;
        Ok(style)
    }

    /// Job-start validation of every section, including each role's
    /// resolved alpha-fill policy.
    pub fn validate(&self) -> Result<()> {
        if !(self.transitions.duration >= 0.0 && self.transitions.duration.is_finite()) {
            return Err(CoreError::config(
                "transitions.duration",
                format!("{} must be non-negative", self.transitions.duration),
            ));
        }
        check_overlap("endcard.overlap_seconds", self.endcard.overlap_seconds)?;
        if self.endcard.enabled && self.endcard.path.is_none() {
            return Err(CoreError::config(
                "endcard.path",
                "an enabled end-card needs a path",
            ));
        }
        if self.alpha_detection.sample_count == 0 {
            return Err(CoreError::config(
                "alpha_detection.sample_count",
                "at least one sample frame is required",
            ));
        }
        if let Some(fps) = self.postprocess.frame_interpolation.target_fps {
            if !(fps > 0.0 && fps.is_finite()) {
                return Err(CoreError::config(
                    "postprocess.frame_interpolation.target_fps",
                    format!("{fps} must be positive"),
                ));
            }
        }
        for role in [ClipRole::Broll, ClipRole::Endcard, ClipRole::Introcard] {
            self.role_alpha_fill(role)?;
        }
        Ok(())
    }

    /// Role-level policy before any per-clip override.
    ///
    /// End-cards inherit every b-roll key except the keying and fill
    /// switches, which default off when an end-card section is present.
    /// Intro-cards take their own section, or the raw end-card section,
    /// and never inherit from b-roll.
    pub fn role_alpha_fill(&self, role: ClipRole) -> Result<AlphaFillConfig> {
        let broll = non_empty(&self.broll_alpha_fill);
        let endcard = non_empty(&self.endcard_alpha_fill);
        match role {
            ClipRole::Scene => Ok(AlphaFillConfig::default()),
            ClipRole::Broll => {
                AlphaFillConfig::default().merged(&broll.cloned().unwrap_or_default())
            }
            ClipRole::Endcard => {
                let layered = match (broll, endcard) {
                    (Some(b), Some(e)) => {
                        let mut layered = b.layer(e);
                        layered.force_chroma_key = e.force_chroma_key;
                        layered.use_blur_background = e.use_blur_background;
                        layered
                    }
                    (Some(b), None) => b.clone(),
                    (None, Some(e)) => e.clone(),
                    (None, None) => AlphaFillOverride::default(),
                };
                AlphaFillConfig::card_defaults(false).merged(&layered)
            }
            ClipRole::Introcard => {
                let section = non_empty(&self.introcard_alpha_fill)
                    .or(endcard)
                    .cloned()
                    .unwrap_or_default();
                AlphaFillConfig::card_defaults(true).merged(&section)
            }
        }
    }

    /// Role policy with the clip's own override merged last.
    pub fn alpha_fill_for(&self, clip: &ClipDescriptor) -> Result<AlphaFillConfig> {
        let base = self.role_alpha_fill(clip.role)?;
        match &clip.alpha_fill_config {
            Some(over) => base.merged(over),
            None => Ok(base),
        }
    }

    /// The style's own end-card, used when the clip list has none.
    pub fn fallback_endcard(&self) -> Option<ClipDescriptor> {
        if !self.endcard.enabled {
            return None;
        }
        let path = self.endcard.path.as_ref()?;
        Some(ClipDescriptor::new(path.clone(), ClipRole::Endcard))
    }

    /// Slide transition length, when transitions are on.
    pub fn transition_duration(&self) -> Option<TimeUs> {
        self.transitions
            .enabled
            .then(|| TimeUs::from_seconds(self.transitions.duration))
    }

    /// End-card overlap: the clip's own value wins over the style default.
    pub fn endcard_overlap(&self, clip: &ClipDescriptor) -> Result<TimeUs> {
        let seconds = clip
            .overlap_seconds
            .unwrap_or(self.endcard.overlap_seconds);
        check_overlap("overlap_seconds", seconds)?;
        Ok(TimeUs::from_seconds(seconds))
    }

    pub fn output_settings(&self) -> OutputSettings {
        let mut settings = preset_shorts();
        let interp = &self.postprocess.frame_interpolation;
        if interp.enabled {
            if let Some(fps) = interp.target_fps {
                settings.fps = fps;
            }
        }
        settings
    }
}

fn non_empty(section: &Option<AlphaFillOverride>) -> Option<&AlphaFillOverride> {
    section.as_ref().filter(|s| !s.is_empty())
}

fn check_overlap(field: &str, seconds: f64) -> Result<()> {
    if seconds >= 0.0 && seconds.is_finite() {
        Ok(())
    } else {
        Err(CoreError::config(field, format!("{seconds} must be non-negative")))
    }
}
