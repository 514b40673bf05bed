//! RGBA frame dumps of see-through clips, for checking masks by eye.

use reelcut_core::types::{MaskMode, MediaInfo};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::toolkit::{sample_times, AlphaPlane, MediaToolkit};

pub const DEBUG_SAMPLE_COUNT: usize = 5;

/// `<dir>/<file stem of name_source>`.
pub fn debug_folder(dir: &Path, name_source: &Path) -> PathBuf {
    let name = name_source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    dir.join(name)
}

pub fn frame_file_name(index: usize, at: f64) -> String {
    format!("frame_{index:02}_t{at:.3}.png")
}

/// Write `sample_count` RGBA frames of `video`, with `mask` applied, under
/// `dir/<clip name>/` and log the opacity of the first frame's mask.
///
/// The folder is named after `name_source`, which for keyed clips is the
/// original file rather than the intermediate. A frame that fails to export
/// is logged and skipped.
pub fn export_alpha_debug(
    toolkit: &dyn MediaToolkit,
    name_source: &Path,
    video: &Path,
    info: &MediaInfo,
    mask: MaskMode,
    dir: &Path,
    sample_count: usize,
) -> Result<Vec<PathBuf>> {
    let folder = debug_folder(dir, name_source);
    std::fs::create_dir_all(&folder)?;

    match toolkit.extract_alpha(video, info, 1) {
        Ok(planes) => match planes.first().and_then(AlphaPlane::opacity_summary) {
            Some((min, mean, max)) => tracing::info!(
                clip = %name_source.display(),
                ?mask,
                min,
                mean,
                max,
                "alpha debug: mask at first frame"
            ),
            None => tracing::warn!(clip = %name_source.display(), "alpha debug: empty mask"),
        },
        Err(e) => {
            tracing::warn!(clip = %name_source.display(), error = %e, "alpha debug: cannot read mask")
        }
    }

    let times = if info.is_image {
        vec![0.0]
    } else {
        sample_times(info.duration_us, sample_count)
    };
    let invert = mask == MaskMode::Inverted;
    let mut written = Vec::with_capacity(times.len());
    for (index, at) in times.into_iter().enumerate() {
        let output = folder.join(frame_file_name(index, at));
        match toolkit.export_rgba_frame(video, at, invert, &output) {
            Ok(()) => written.push(output),
            Err(e) => {
                tracing::warn!(clip = %name_source.display(), at, error = %e, "alpha debug: frame export failed")
            }
        }
    }

    tracing::info!(
        clip = %name_source.display(),
        folder = %folder.display(),
        frames = written.len(),
        "alpha debug frames exported"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mixed_plane, FakeToolkit};

    #[test]
    fn folder_and_file_names() {
        assert_eq!(
            debug_folder(Path::new("/dbg"), Path::new("/in/broll_03.mov")),
            PathBuf::from("/dbg/broll_03")
        );
        assert_eq!(frame_file_name(2, 1.25), "frame_02_t1.250.png");
    }

    #[test]
    fn exports_evenly_spaced_frames() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeToolkit::new().with_alpha_video("/in/b1.mov", 4.0, vec![mixed_plane()]);
        let info = fake.probe(Path::new("/in/b1.mov")).unwrap();

        let written = export_alpha_debug(
            &fake,
            Path::new("/in/b1.mov"),
            Path::new("/in/b1.mov"),
            &info,
            MaskMode::Embedded,
            dir.path(),
            DEBUG_SAMPLE_COUNT,
        )
        .unwrap();

        assert_eq!(written.len(), 5);
        assert!(dir.path().join("b1").is_dir());
        let exports = fake.frame_exports();
        assert_eq!(exports.first().unwrap().at, 0.0);
        assert!((exports.last().unwrap().at - 3.999).abs() < 1e-9);
        assert!(exports.iter().all(|e| !e.invert_alpha));
        assert!(written.iter().all(|p| p.starts_with(dir.path().join("b1"))));
    }

    #[test]
    fn inverted_mask_and_keyed_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeToolkit::new().with_alpha_video("/tmp/keyed-1.mov", 2.0, vec![mixed_plane()]);
        let info = fake.probe(Path::new("/tmp/keyed-1.mov")).unwrap();

        export_alpha_debug(
            &fake,
            Path::new("/in/green.mp4"),
            Path::new("/tmp/keyed-1.mov"),
            &info,
            MaskMode::Inverted,
            dir.path(),
            2,
        )
        .unwrap();

        let exports = fake.frame_exports();
        assert_eq!(exports.len(), 2);
        assert!(exports.iter().all(|e| e.invert_alpha));
        assert!(exports.iter().all(|e| e.source == Path::new("/tmp/keyed-1.mov")));
        assert!(dir.path().join("green").is_dir());
    }

    #[test]
    fn still_image_exports_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeToolkit::new().with_image("/in/logo.png", mixed_plane());
        let info = fake.probe(Path::new("/in/logo.png")).unwrap();
        let written = export_alpha_debug(
            &fake,
            Path::new("/in/logo.png"),
            Path::new("/in/logo.png"),
            &info,
            MaskMode::Embedded,
            dir.path(),
            DEBUG_SAMPLE_COUNT,
        )
        .unwrap();
        assert_eq!(written.len(), 1);
    }
}
