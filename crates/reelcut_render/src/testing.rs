//! Scripted `MediaToolkit` for unit tests.

use reelcut_core::types::{MediaInfo, TimeUs};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chroma::ChromaKeyParams;
use crate::error::{RenderError, Result};
use crate::fill::FillParams;
use crate::toolkit::{AlphaPlane, MediaToolkit, SignalStats};

#[derive(Debug, Clone)]
struct FakeMedia {
    info: MediaInfo,
    planes: Vec<AlphaPlane>,
    similarity: Option<f64>,
}

type StatsFn = Box<dyn Fn(f64) -> SignalStats>;

pub(crate) struct FakeToolkit {
    media: RefCell<HashMap<PathBuf, FakeMedia>>,
    key_stats: StatsFn,
    fail_chroma_key: bool,
    fail_fill: bool,
    alpha_requests: RefCell<Vec<usize>>,
    keyed: RefCell<Vec<f64>>,
    fills: RefCell<Vec<(PathBuf, FillParams)>>,
    frames: RefCell<Vec<FrameExport>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameExport {
    pub source: PathBuf,
    pub at: f64,
    pub invert_alpha: bool,
    pub output: PathBuf,
}

pub(crate) fn video_info(seconds: f64, width: u32, height: u32, pix_fmt: &str, has_audio: bool) -> MediaInfo {
    MediaInfo {
        width,
        height,
        frame_rate: 30.0,
        duration_us: TimeUs::from_seconds(seconds),
        pixel_format: Some(pix_fmt.to_string()),
        codec_name: "h264".into(),
        has_audio,
        audio_channels: if has_audio { 2 } else { 0 },
        audio_sample_rate: if has_audio { 48000 } else { 0 },
        is_image: false,
    }
}

/// Half transparent, half opaque.
pub(crate) fn mixed_plane() -> AlphaPlane {
    let mut plane = AlphaPlane::filled(4, 4, 255);
    plane.data[..8].fill(0);
    plane
}

impl FakeToolkit {
    pub(crate) fn new() -> Self {
        Self {
            media: RefCell::new(HashMap::new()),
            key_stats: Box::new(|_| SignalStats { min: 0.0, max: 255.0, avg: 127.5 }),
            fail_chroma_key: false,
            fail_fill: false,
            alpha_requests: RefCell::new(Vec::new()),
            keyed: RefCell::new(Vec::new()),
            fills: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn with_media(self, path: &str, info: MediaInfo, planes: Vec<AlphaPlane>) -> Self {
        self.media.borrow_mut().insert(
            PathBuf::from(path),
            FakeMedia {
                info,
                planes,
                similarity: None,
            },
        );
        self
    }

    /// Landscape H.264 clip with audio.
    pub(crate) fn with_video(self, path: &str, seconds: f64) -> Self {
        self.with_media(path, video_info(seconds, 1920, 1080, "yuv420p", true), vec![])
    }

    pub(crate) fn with_alpha_video(self, path: &str, seconds: f64, planes: Vec<AlphaPlane>) -> Self {
        self.with_media(path, video_info(seconds, 1080, 1920, "yuva420p", false), planes)
    }

    pub(crate) fn with_image(self, path: &str, plane: AlphaPlane) -> Self {
        let info = MediaInfo {
            width: plane.width,
            height: plane.height,
            frame_rate: 25.0,
            duration_us: TimeUs::ZERO,
            pixel_format: Some("rgba".into()),
            codec_name: "png".into(),
            has_audio: false,
            audio_channels: 0,
            audio_sample_rate: 0,
            is_image: true,
        };
        self.with_media(path, info, vec![plane])
    }

    pub(crate) fn with_key_stats(mut self, stats: impl Fn(f64) -> SignalStats + 'static) -> Self {
        self.key_stats = Box::new(stats);
        self
    }

    pub(crate) fn failing_chroma_key(mut self) -> Self {
        self.fail_chroma_key = true;
        self
    }

    pub(crate) fn failing_fill(mut self) -> Self {
        self.fail_fill = true;
        self
    }

    pub(crate) fn alpha_sample_requests(&self) -> Vec<usize> {
        self.alpha_requests.borrow().clone()
    }

    pub(crate) fn keyed_similarities(&self) -> Vec<f64> {
        self.keyed.borrow().clone()
    }

    pub(crate) fn fill_requests(&self) -> Vec<(PathBuf, FillParams)> {
        self.fills.borrow().clone()
    }

    pub(crate) fn frame_exports(&self) -> Vec<FrameExport> {
        self.frames.borrow().clone()
    }

    fn lookup(&self, path: &Path) -> Result<FakeMedia> {
        self.media
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| RenderError::FileNotFound(path.to_path_buf()))
    }
}

impl MediaToolkit for FakeToolkit {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        Ok(self.lookup(path)?.info)
    }

    fn extract_alpha(&self, path: &Path, _info: &MediaInfo, samples: usize) -> Result<Vec<AlphaPlane>> {
        self.alpha_requests.borrow_mut().push(samples);
        let media = self.lookup(path)?;
        if media.planes.is_empty() {
            return Err(RenderError::decode(path, "no alpha plane"));
        }
        Ok(media.planes)
    }

    fn alpha_stats(&self, path: &Path) -> Result<SignalStats> {
        let similarity = self
            .lookup(path)?
            .similarity
            .ok_or_else(|| RenderError::AlphaSynthesis("not a keyed file".into()))?;
        Ok((self.key_stats)(similarity))
    }

    fn chroma_key(&self, source: &Path, params: &ChromaKeyParams, output: &Path) -> Result<()> {
        if self.fail_chroma_key {
            return Err(RenderError::FfmpegFailed("colorkey failed".into()));
        }
        let mut info = self.lookup(source)?.info;
        info.pixel_format = Some("argb".into());
        info.codec_name = "qtrle".into();
        info.has_audio = false;
        self.keyed.borrow_mut().push(params.similarity);
        self.media.borrow_mut().insert(
            output.to_path_buf(),
            FakeMedia {
                info,
                planes: vec![mixed_plane()],
                similarity: Some(params.similarity),
            },
        );
        Ok(())
    }

    fn blur_and_stretch(&self, source: &Path, params: &FillParams, output: &Path) -> Result<()> {
        if self.fail_fill {
            return Err(RenderError::FfmpegFailed("gblur failed".into()));
        }
        self.lookup(source)?;
        self.fills.borrow_mut().push((source.to_path_buf(), *params));
        let info = video_info(params.duration.as_seconds(), 1080, 1920, "yuv420p", false);
        self.media.borrow_mut().insert(
            output.to_path_buf(),
            FakeMedia {
                info,
                planes: vec![],
                similarity: None,
            },
        );
        Ok(())
    }

    fn export_rgba_frame(&self, source: &Path, at: f64, invert_alpha: bool, output: &Path) -> Result<()> {
        self.lookup(source)?;
        self.frames.borrow_mut().push(FrameExport {
            source: source.to_path_buf(),
            at,
            invert_alpha,
            output: output.to_path_buf(),
        });
        Ok(())
    }
}
