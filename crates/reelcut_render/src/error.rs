use reelcut_core::{ClipRole, CoreError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("cannot probe {path}: {reason}")]
    MediaProbe { path: PathBuf, reason: String },

    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("alpha synthesis failed: {0}")]
    AlphaSynthesis(String),

    #[error("composition failed: {0}")]
    Composition(String),

    #[error("clip #{index} ({role}, {path}) failed: {source}")]
    ClipFailed {
        index: usize,
        role: ClipRole,
        path: PathBuf,
        #[source]
        source: Box<RenderError>,
    },

    #[error("ffmpeg not found")]
    FfmpegNotFound,

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl RenderError {
    pub fn probe(path: &Path, reason: impl Into<String>) -> Self {
        Self::MediaProbe {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn decode(path: &Path, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Attach clip identity, keeping the original error as the source.
    pub fn for_clip(self, index: usize, role: ClipRole, path: &Path) -> Self {
        Self::ClipFailed {
            index,
            role,
            path: path.to_path_buf(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
