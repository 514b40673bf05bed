use reelcut_core::clip::is_image_path;
use reelcut_core::types::{MediaInfo, TimeUs};
use serde::Deserialize;
use std::path::Path;

use crate::error::{RenderError, Result};

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run ffprobe on a media file and parse the result into a `MediaInfo`.
pub fn probe_with_ffprobe(ffprobe: &Path, path: &Path) -> Result<MediaInfo> {
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    let output = std::process::Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| RenderError::probe(path, format!("failed to execute ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::probe(path, stderr.trim()));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| RenderError::probe(path, format!("unreadable ffprobe output: {e}")))?;
    parse_probe_output(&probe, is_image_path(path)).map_err(|reason| RenderError::probe(path, reason))
}

/// Probe by parsing the stream dump `ffmpeg -i` prints to stderr. Used
/// when ffprobe is unavailable.
pub fn probe_with_ffmpeg(ffmpeg: &Path, path: &Path) -> Result<MediaInfo> {
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    // Exits non-zero because no output is given; only stderr matters.
    let output = std::process::Command::new(ffmpeg)
        .arg("-hide_banner")
        .arg("-i")
        .arg(path)
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::FfmpegNotFound
            } else {
                RenderError::Io(e)
            }
        })?;

    let dump = String::from_utf8_lossy(&output.stderr);
    parse_media_info_dump(&dump, is_image_path(path)).map_err(|reason| RenderError::probe(path, reason))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_probe_output(probe: &FfprobeOutput, is_image: bool) -> std::result::Result<MediaInfo, String> {
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| "no video stream".to_string())?;
    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio");

    let duration_us = probe
        .format
        .duration
        .as_deref()
        .or(video_stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .map(TimeUs::from_seconds)
        .unwrap_or(TimeUs::ZERO);

    let frame_rate = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let audio_sample_rate = audio_stream
        .and_then(|s| s.sample_rate.as_deref())
        .and_then(|r| r.parse::<u32>().ok())
        .unwrap_or(0);

    Ok(MediaInfo {
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        frame_rate,
        duration_us,
        pixel_format: video_stream.pix_fmt.clone(),
        codec_name: video_stream.codec_name.clone().unwrap_or_default(),
        has_audio: audio_stream.is_some(),
        audio_channels: audio_stream.and_then(|s| s.channels).unwrap_or(0),
        audio_sample_rate,
        is_image,
    })
}

/// Parse ffprobe frame rate string like "30000/1001" or "30/1" into f64.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d == 0.0 {
            return None;
        }
        n / d
    } else {
        rate.parse().ok()?
    };
    (fps > 0.0).then_some(fps)
}

/// Parse the human-readable stream dump of `ffmpeg -i`.
///
/// ```text
///   Duration: 00:00:05.00, start: 0.000000, bitrate: 2103 kb/s
///     Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p(tv, bt709), 1080x1920 [SAR 1:1 DAR 9:16], 30 fps, 30 tbr
///     Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo, fltp, 128 kb/s
/// ```
fn parse_media_info_dump(dump: &str, is_image: bool) -> std::result::Result<MediaInfo, String> {
    let mut info = MediaInfo {
        width: 0,
        height: 0,
        frame_rate: 0.0,
        duration_us: TimeUs::ZERO,
        pixel_format: None,
        codec_name: String::new(),
        has_audio: false,
        audio_channels: 0,
        audio_sample_rate: 0,
        is_image,
    };
    let mut saw_video = false;

    for line in dump.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Duration:") {
            let value = rest.split(',').next().unwrap_or("").trim();
            if let Some(secs) = parse_time_str(value) {
                info.duration_us = TimeUs::from_seconds(secs);
            }
        } else if let Some(desc) = stream_description(line, "Video:") {
            if saw_video {
                continue;
            }
            saw_video = true;
            let fields = split_top_level(desc);
            info.codec_name = fields
                .first()
                .and_then(|f| f.split_whitespace().next())
                .unwrap_or("")
                .to_string();
            info.pixel_format = fields
                .get(1)
                .map(|f| f.split('(').next().unwrap_or("").trim().to_string())
                .filter(|f| !f.is_empty());
            for field in &fields {
                if let Some((w, h)) = parse_dimensions(field) {
                    info.width = w;
                    info.height = h;
                }
                if let Some(fps) = field.trim().strip_suffix(" fps") {
                    info.frame_rate = fps.trim().parse().unwrap_or(0.0);
                } else if info.frame_rate == 0.0 {
                    if let Some(tbr) = field.trim().strip_suffix(" tbr") {
                        info.frame_rate = tbr.trim().parse().unwrap_or(0.0);
                    }
                }
            }
        } else if let Some(desc) = stream_description(line, "Audio:") {
            if info.has_audio {
                continue;
            }
            info.has_audio = true;
            for field in split_top_level(desc) {
                let field = field.trim();
                if let Some(hz) = field.strip_suffix(" Hz") {
                    info.audio_sample_rate = hz.trim().parse().unwrap_or(0);
                }
                info.audio_channels = match field {
                    "mono" => 1,
                    "stereo" => 2,
                    "5.1" | "5.1(side)" => 6,
                    "7.1" => 8,
                    _ => continue,
                };
            }
        }
    }

    if !saw_video {
        return Err("no video stream in media info dump".to_string());
    }
    Ok(info)
}

fn stream_description<'a>(line: &'a str, kind: &str) -> Option<&'a str> {
    if !line.starts_with("Stream #") {
        return None;
    }
    line.find(kind).map(|i| line[i + kind.len()..].trim())
}

/// Split on commas that are not inside parentheses.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                fields.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(s[start..].trim());
    fields
}

fn parse_dimensions(field: &str) -> Option<(u32, u32)> {
    let token = field.split_whitespace().next()?;
    let (w, h) = token.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// `HH:MM:SS.ss` as printed by ffmpeg, in seconds.
pub(crate) fn parse_time_str(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let mins: f64 = parts[1].parse().ok()?;
    let secs: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_str_valid() {
        assert!((parse_time_str("00:01:02.05").unwrap() - 62.05).abs() < 0.001);
        assert!((parse_time_str("01:00:00.00").unwrap() - 3600.0).abs() < 0.001);
        assert!((parse_time_str("00:00:00.00").unwrap() - 0.0).abs() < 0.001);
    }

    #[test]
    fn parse_time_str_invalid() {
        assert!(parse_time_str("invalid").is_none());
        assert!(parse_time_str("00:00").is_none());
        assert!(parse_time_str("N/A").is_none());
    }

    #[test]
    fn parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < f64::EPSILON);
        assert!((parse_frame_rate("24/1").unwrap() - 24.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_frame_rate_plain() {
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_frame_rate_zero() {
        assert!(parse_frame_rate("30/0").is_none());
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn parse_probe_output_video_and_audio() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "prores",
                    "width": 1920,
                    "height": 1080,
                    "pix_fmt": "yuva444p10le",
                    "r_frame_rate": "30/1",
                    "avg_frame_rate": "30/1"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "channels": 2,
                    "sample_rate": "48000"
                }
            ],
            "format": {
                "duration": "10.5"
            }
        }"#;
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = parse_probe_output(&output, false).unwrap();

        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.frame_rate - 30.0).abs() < f64::EPSILON);
        assert_eq!(info.codec_name, "prores");
        assert_eq!(info.pixel_format.as_deref(), Some("yuva444p10le"));
        assert!(info.declares_alpha());
        assert!(info.has_audio);
        assert_eq!(info.audio_channels, 2);
        assert_eq!(info.audio_sample_rate, 48000);
        assert_eq!(info.duration_us, TimeUs::from_seconds(10.5));
    }

    #[test]
    fn parse_probe_output_still_image() {
        let json = r#"{
            "streams": [
                { "codec_type": "video", "codec_name": "png", "width": 800, "height": 800,
                  "pix_fmt": "rgba", "r_frame_rate": "25/1", "avg_frame_rate": "0/0" }
            ],
            "format": {}
        }"#;
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        let info = parse_probe_output(&output, true).unwrap();
        assert!(info.is_image);
        assert!(!info.has_audio);
        assert_eq!(info.duration_us, TimeUs::ZERO);
        assert!((info.frame_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_probe_output_requires_video() {
        let json = r#"{
            "streams": [
                { "codec_type": "audio", "codec_name": "mp3", "channels": 2, "sample_rate": "44100" }
            ],
            "format": { "duration": "180.0" }
        }"#;
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert!(parse_probe_output(&output, false).is_err());
    }

    #[test]
    fn parse_dump_video_with_audio() {
        let dump = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'scene.mp4':
  Metadata:
    major_brand     : isom
  Duration: 00:00:05.00, start: 0.000000, bitrate: 2103 kb/s
  Stream #0:0[0x1](und): Video: h264 (High) (avc1 / 0x31637661), yuv420p(tv, bt709, progressive), 1080x1920 [SAR 1:1 DAR 9:16], 1968 kb/s, 30 fps, 30 tbr, 15360 tbn (default)
  Stream #0:1[0x2](und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo, fltp, 128 kb/s (default)
At least one output file must be specified";
        let info = parse_media_info_dump(dump, false).unwrap();
        assert_eq!(info.codec_name, "h264");
        assert_eq!(info.pixel_format.as_deref(), Some("yuv420p"));
        assert_eq!((info.width, info.height), (1080, 1920));
        assert!((info.frame_rate - 30.0).abs() < f64::EPSILON);
        assert_eq!(info.duration_us, TimeUs::from_seconds(5.0));
        assert!(info.has_audio);
        assert_eq!(info.audio_sample_rate, 48000);
        assert_eq!(info.audio_channels, 2);
        assert!(!info.declares_alpha());
    }

    #[test]
    fn parse_dump_alpha_mov_without_audio() {
        let dump = "\
  Duration: 00:00:03.20, start: 0.000000, bitrate: 40112 kb/s
  Stream #0:0[0x1](eng): Video: qtrle (rle  / 0x20656C72), argb, 1080x1920, 40110 kb/s, 29.97 fps, 29.97 tbr, 30k tbn (default)";
        let info = parse_media_info_dump(dump, false).unwrap();
        assert_eq!(info.codec_name, "qtrle");
        assert_eq!(info.pixel_format.as_deref(), Some("argb"));
        assert!(info.declares_alpha());
        assert!(!info.has_audio);
        assert!((info.frame_rate - 29.97).abs() < 1e-9);
        assert_eq!(info.duration_us, TimeUs::from_seconds(3.2));
    }

    #[test]
    fn parse_dump_image_uses_tbr() {
        let dump = "\
  Duration: N/A, bitrate: N/A
  Stream #0:0: Video: png, rgba(pc), 500x500, 25 tbr, 25 tbn";
        let info = parse_media_info_dump(dump, true).unwrap();
        assert!(info.is_image);
        assert_eq!(info.duration_us, TimeUs::ZERO);
        assert!((info.frame_rate - 25.0).abs() < f64::EPSILON);
        assert_eq!(info.pixel_format.as_deref(), Some("rgba"));
    }

    #[test]
    fn parse_dump_without_video_fails() {
        let dump = "/tmp/x.mp4: Invalid data found when processing input";
        assert!(parse_media_info_dump(dump, false).is_err());
    }

    #[test]
    fn split_top_level_respects_parentheses() {
        let fields = split_top_level("h264 (High), yuv420p(tv, bt709), 640x360");
        assert_eq!(fields, vec!["h264 (High)", "yuv420p(tv, bt709)", "640x360"]);
    }

    #[test]
    fn probe_nonexistent_file_returns_error() {
        let result = probe_with_ffprobe(
            Path::new("ffprobe"),
            Path::new("/tmp/does_not_exist_reelcut_probe_test.mp4"),
        );
        assert!(matches!(result, Err(RenderError::FileNotFound(_))));
    }
}
