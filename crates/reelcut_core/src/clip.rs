use crate::config::AlphaFillOverride;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Display length for a still image when the descriptor gives none.
pub const DEFAULT_IMAGE_SECONDS: f64 = 2.0;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClipRole {
    #[default]
    Scene,
    Broll,
    Endcard,
    Introcard,
}

impl ClipRole {
    pub fn is_card(&self) -> bool {
        matches!(self, Self::Endcard | Self::Introcard)
    }

    /// Scene and b-roll clips cannot be dropped from a job.
    pub fn is_required(&self) -> bool {
        !self.is_card()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Broll => "broll",
            Self::Endcard => "endcard",
            Self::Introcard => "introcard",
        }
    }
}

impl fmt::Display for ClipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClipDescriptor {
    #[serde(alias = "path")]
    pub source: PathBuf,
    #[serde(default, alias = "type")]
    pub role: ClipRole,
    #[serde(default, alias = "start", skip_serializing_if = "Option::is_none")]
    pub trim_start: Option<f64>,
    /// Negative values count back from the probed end of the source.
    #[serde(default, alias = "end", skip_serializing_if = "Option::is_none")]
    pub trim_end: Option<f64>,
    #[serde(default, alias = "alpha_fill", skip_serializing_if = "Option::is_none")]
    pub alpha_fill_config: Option<AlphaFillOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invert_alpha: Option<bool>,
}

impl ClipDescriptor {
    pub fn new(source: impl Into<PathBuf>, role: ClipRole) -> Self {
        Self {
            source: source.into(),
            role,
            ..Default::default()
        }
    }

    pub fn is_image(&self) -> bool {
        is_image_path(&self.source)
    }

    /// Display length of a still image: explicit `duration`, else the
    /// positive `trim_end - trim_start` span, else two seconds.
    pub fn image_duration_seconds(&self) -> f64 {
        if let Some(d) = self.duration.filter(|d| *d > 0.0) {
            return d;
        }
        if let Some(end) = self.trim_end {
            let start = self.trim_start.unwrap_or(0.0);
            if end > start {
                return end - start;
            }
        }
        DEFAULT_IMAGE_SECONDS
    }

    pub fn label(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

pub fn is_image_path(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

pub fn is_video_path(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// ClipList
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClipList {
    pub clips: Vec<ClipDescriptor>,
}

impl ClipList {
    pub fn new(clips: Vec<ClipDescriptor>) -> Self {
        Self { clips }
    }

    /// Load a `{"clips": [...]}` document.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let list: ClipList = serde_json::from_str(&data)?;
        list.validate()?;
        Ok(list)
    }

    /// Every video file in `dir`, naturally sorted by embedded numbers, as scenes.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let mut names: Vec<String> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_video_path(&entry.path()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));

        let clips = names
            .into_iter()
            .map(|name| ClipDescriptor::new(dir.as_ref().join(name), ClipRole::Scene))
            .collect();
        Ok(Self { clips })
    }

    /// At most one intro-card and one end-card per job.
    pub fn validate(&self) -> Result<()> {
        for role in [ClipRole::Introcard, ClipRole::Endcard] {
            let count = self.clips.iter().filter(|c| c.role == role).count();
            if count > 1 {
                return Err(CoreError::InvalidClipList(format!(
                    "{count} clips have role `{role}`, at most one is allowed"
                )));
            }
        }
        Ok(())
    }

    pub fn card(&self, role: ClipRole) -> Option<&ClipDescriptor> {
        self.clips.iter().find(|c| c.role == role)
    }

    /// Scene and b-roll clips in input order.
    pub fn sequence(&self) -> impl Iterator<Item = &ClipDescriptor> {
        self.clips.iter().filter(|c| c.role.is_required())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NameChunk {
    Number(u64),
    Text(String),
}

fn natural_chunks(name: &str) -> Vec<NameChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;
    for c in name.chars() {
        if c.is_ascii_digit() != in_digits && !current.is_empty() {
            chunks.push(finish_chunk(&current, in_digits));
            current.clear();
        }
        in_digits = c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(finish_chunk(&current, in_digits));
    }
    chunks
}

fn finish_chunk(chunk: &str, digits: bool) -> NameChunk {
    match (digits, chunk.parse::<u64>()) {
        (true, Ok(n)) => NameChunk::Number(n),
        _ => NameChunk::Text(chunk.to_lowercase()),
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_chunks(a).cmp(&natural_chunks(b))
}
