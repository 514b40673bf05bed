use crate::error::{RenderError, Result};
use crate::probe::parse_time_str;
use reelcut_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// A compiled render plan ready for ffmpeg execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPlan {
    pub inputs: Vec<RenderInput>,
    pub filter_graph: String,
    pub output_args: Vec<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderInput {
    pub path: PathBuf,
    pub index: usize,
    /// Options placed before this input's `-i`.
    pub args: Vec<String>,
}

/// Progress update during rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderProgress {
    pub percent: f64,
    pub frame: u64,
    pub fps: f64,
    pub speed: String,
    pub eta_seconds: Option<f64>,
}

/// Inputs deduplicated by path and input options.
#[derive(Default)]
struct InputTable {
    inputs: Vec<RenderInput>,
    lookup: HashMap<(PathBuf, Vec<String>), usize>,
}

impl InputTable {
    fn add(&mut self, path: &Path, args: Vec<String>) -> usize {
        let key = (path.to_path_buf(), args);
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }
        let idx = self.inputs.len();
        self.inputs.push(RenderInput {
            path: key.0.clone(),
            index: idx,
            args: key.1.clone(),
        });
        self.lookup.insert(key, idx);
        idx
    }
}

fn secs(t: TimeUs) -> String {
    format!("{}", t.as_seconds())
}

/// Compile a timeline into an ffmpeg render plan.
///
/// Every clip is cover-scaled and cropped to the output frame, then laid
/// over a black canvas lasting the whole timeline. In straight mode the base
/// clips are concatenated first; with slide transitions each one is overlaid
/// at its own start. Cards go on top. Audio is delayed to each placement and
/// mixed over a silent bed without level normalization.
pub fn compile(timeline: &Timeline, output_path: &Path) -> Result<RenderPlan> {
    if timeline.base_placements().next().is_none() {
        return Err(RenderError::Composition("timeline has no clips".into()));
    }

    let settings = &timeline.settings;
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let total = secs(timeline.duration);
    let straight = timeline.mode == CompositionMode::StraightConcat;

    // Base clips first, then intro, then end-card, each group in input order.
    let mut ordered: Vec<(usize, &Placement)> = timeline.placements.iter().enumerate().collect();
    ordered.sort_by_key(|(i, p)| (layer_rank(p.layer), *i));

    let mut inputs = InputTable::default();
    let mut filters: Vec<String> = Vec::new();

    for (i, placement) in &ordered {
        let shifted = !(straight && placement.layer == Layer::Base);
        video_chain(*i, placement, settings, shifted, &mut inputs, &mut filters);
    }

    filters.push(format!("color=c=black:s={w}x{h}:r={fps}:d={total}[base0]"));
    let mut current = "base0".to_string();

    if straight {
        let labels: Vec<String> = ordered
            .iter()
            .filter(|(_, p)| p.layer == Layer::Base)
            .map(|(i, _)| format!("[v{i}]"))
            .collect();
        filters.push(format!(
            "{}concat=n={}:v=1:a=0[content]",
            labels.concat(),
            labels.len()
        ));
        filters.push(format!("[{current}][content]overlay=0:0:eof_action=pass[vbase]"));
        current = "vbase".to_string();
    }

    for (i, placement) in &ordered {
        if straight && placement.layer == Layer::Base {
            continue;
        }
        let start = placement.start;
        let end = placement.end();
        let x = placement
            .effects
            .iter()
            .find_map(|e| match e {
                VideoEffect::SlideIn { duration } => Some(slide_in_x(start, *duration)),
                _ => None,
            })
            .unwrap_or_else(|| "0".to_string());
        filters.push(format!(
            "[{current}][v{i}]overlay=x={x}:y=0:eof_action=pass:enable='between(t,{},{})'[c{i}]",
            secs(start),
            secs(end)
        ));
        current = format!("c{i}");
    }
    filters.push(format!("[{current}]format=yuv420p[outv]"));

    audio_mix(timeline, &ordered, &mut inputs, &mut filters);

    let filter_graph = filters.join(";");

    let output_args = vec![
        "-map".to_string(),
        "[outv]".to_string(),
        "-map".to_string(),
        "[outa]".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-ar".to_string(),
        format!("{}", settings.sample_rate),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        format!("{fps}"),
        "-t".to_string(),
        total,
        "-movflags".to_string(),
        "+faststart".to_string(),
    ];

    tracing::debug!(
        inputs = inputs.inputs.len(),
        filters = filters.len(),
        "compiled render plan"
    );

    Ok(RenderPlan {
        inputs: inputs.inputs,
        filter_graph,
        output_args,
        output_path: output_path.to_path_buf(),
    })
}

fn layer_rank(layer: Layer) -> u8 {
    match layer {
        Layer::Base => 0,
        Layer::Intro => 1,
        Layer::Endcard => 2,
    }
}

/// Horizontal offset that moves a clip from the right edge to 0 over `duration`.
fn slide_in_x(start: TimeUs, duration: TimeUs) -> String {
    let (s, d) = (secs(start), secs(duration));
    format!("'if(lt(t,{s}+{d}),W*(1-(t-{s})/{d}),0)'")
}

/// Emit the filters producing `[v{i}]`: trimmed, scaled, cropped, with its
/// mask applied and fill composited underneath.
fn video_chain(
    i: usize,
    placement: &Placement,
    settings: &OutputSettings,
    shifted: bool,
    inputs: &mut InputTable,
    filters: &mut Vec<String>,
) {
    let clip = &placement.clip;
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let d = secs(clip.duration);
    let g = clip.geometry;

    let input_args = match clip.video.kind {
        SourceKind::Image => vec![
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            format!("{fps}"),
            "-t".to_string(),
            d.clone(),
        ],
        SourceKind::Video => Vec::new(),
    };
    let video_in = inputs.add(&clip.video.path, input_args);

    let mut chain = vec![
        match clip.video.trim {
            Some(trim) => format!("trim=start={}:duration={d}", secs(trim.start)),
            None => format!("trim=duration={d}"),
        },
        "setpts=PTS-STARTPTS".to_string(),
        format!("fps={fps}"),
        format!("scale={}:{}", g.scaled_width, g.scaled_height),
        format!("crop={}:{}:{}:{}", g.width, g.height, g.x, g.y),
        "setsar=1".to_string(),
    ];
    match clip.mask {
        MaskMode::Opaque => chain.push("format=yuv420p".to_string()),
        MaskMode::Embedded => chain.push("format=yuva420p".to_string()),
        MaskMode::Inverted => {
            chain.push("format=yuva420p".to_string());
            chain.push("lut=a=negval".to_string());
        }
    }

    let mut tail: Vec<String> = Vec::new();
    let fade = placement.effects.iter().find_map(|e| match e {
        VideoEffect::FadeIn { duration } => Some(*duration),
        _ => None,
    });
    if fade.is_some() || !shifted {
        tail.push("format=yuva420p".to_string());
    }
    if let Some(fade) = fade {
        tail.push(format!("fade=t=in:st=0:d={}:alpha=1", secs(fade)));
    }
    if shifted {
        tail.push(format!("setpts=PTS-STARTPTS+{}/TB", secs(placement.start)));
    }
    let tail = if tail.is_empty() {
        String::new()
    } else {
        format!(",{}", tail.join(","))
    };

    match &clip.fill {
        Some(fill) => {
            filters.push(format!("[{video_in}:v]{}[fg{i}]", chain.join(",")));
            let fill_in = inputs.add(&fill.path, vec!["-stream_loop".to_string(), "-1".to_string()]);
            filters.push(format!(
                "[{fill_in}:v]trim=duration={d},setpts=PTS-STARTPTS,fps={fps},scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1[bg{i}]"
            ));
            filters.push(format!(
                "[bg{i}][fg{i}]overlay=0:0:eof_action=pass,format=yuv420p{tail}[v{i}]"
            ));
        }
        None => {
            filters.push(format!("[{video_in}:v]{}{tail}[v{i}]", chain.join(",")));
        }
    }
}

fn audio_mix(
    timeline: &Timeline,
    ordered: &[(usize, &Placement)],
    inputs: &mut InputTable,
    filters: &mut Vec<String>,
) {
    let sr = timeline.settings.sample_rate;
    filters.push(format!(
        "anullsrc=r={sr}:cl=stereo,atrim=duration={}[abed]",
        secs(timeline.duration)
    ));

    let mut mix = vec!["[abed]".to_string()];
    for (i, placement) in ordered {
        let Some(audio) = &placement.clip.audio else {
            continue;
        };
        let duration = placement.clip.duration;
        let audio_in = inputs.add(&audio.path, Vec::new());

        let mut chain = vec![
            match audio.trim {
                Some(trim) => format!("atrim=start={}:duration={}", secs(trim.start), secs(duration)),
                None => format!("atrim=duration={}", secs(duration)),
            },
            "asetpts=PTS-STARTPTS".to_string(),
            format!("aformat=sample_rates={sr}:channel_layouts=stereo"),
        ];
        let env = audio.envelope;
        if env.fade_in.is_positive() {
            chain.push(format!("afade=t=in:st=0:d={}", secs(env.fade_in)));
        }
        if env.fade_out.is_positive() {
            let fade_out = env.fade_out.min(duration);
            chain.push(format!(
                "afade=t=out:st={}:d={}",
                secs(duration - fade_out),
                secs(fade_out)
            ));
        }
        let delay = placement.start.as_millis();
        if delay > 0 {
            chain.push(format!("adelay={delay}|{delay}"));
        }
        filters.push(format!("[{audio_in}:a]{}[a{i}]", chain.join(",")));
        mix.push(format!("[a{i}]"));
    }

    if mix.len() == 1 {
        filters.push("[abed]anull[outa]".to_string());
    } else {
        filters.push(format!(
            "{}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[outa]",
            mix.concat(),
            mix.len()
        ));
    }
}

/// Build ffmpeg args from a render plan.
pub fn build_ffmpeg_args(plan: &RenderPlan) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];

    for input in &plan.inputs {
        args.extend(input.args.iter().cloned());
        args.push("-i".to_string());
        args.push(input.path.to_string_lossy().to_string());
    }

    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());

    args.extend(plan.output_args.clone());

    args.push(plan.output_path.to_string_lossy().to_string());

    args
}

const STDERR_TAIL_LINES: usize = 20;

/// Execute a render plan by spawning ffmpeg.
/// Sends progress updates via the channel.
pub async fn execute(
    plan: &RenderPlan,
    ffmpeg: &Path,
    progress_tx: tokio::sync::watch::Sender<RenderProgress>,
    total_duration_us: TimeUs,
) -> Result<()> {
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    let args = build_ffmpeg_args(plan);
    tracing::info!(
        output = %plan.output_path.display(),
        inputs = plan.inputs.len(),
        "starting ffmpeg render"
    );

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::FfmpegNotFound
            } else {
                RenderError::Io(e)
            }
        })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::FfmpegFailed("ffmpeg stderr not captured".into()))?;
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();

    let total_secs = total_duration_us.as_seconds();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(progress) = parse_progress(&line, total_secs) {
            let _ = progress_tx.send(progress);
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let status = child.wait().await.map_err(RenderError::Io)?;
    if !status.success() {
        let log = Vec::from(tail).join("\n");
        return Err(RenderError::FfmpegFailed(format!(
            "ffmpeg exited with {status}: {log}"
        )));
    }

    tracing::info!(output = %plan.output_path.display(), "render finished");
    Ok(())
}

/// Parse an ffmpeg stderr progress line.
///
/// Example line: `frame=  123 fps= 60 ... time=00:01:02.05 speed=1.50x`
pub fn parse_progress(line: &str, total_secs: f64) -> Option<RenderProgress> {
    if !line.contains("time=") {
        return None;
    }

    let frame = extract_value(line, "frame=")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = extract_value(line, "fps=")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let speed_str = extract_value(line, "speed=").unwrap_or_default();

    let time_secs = extract_value(line, "time=")
        .and_then(|v| parse_time_str(&v))
        .unwrap_or(0.0);

    let percent = if total_secs > 0.0 {
        (time_secs / total_secs * 100.0).min(100.0)
    } else {
        0.0
    };

    let speed_factor = speed_str
        .trim_end_matches('x')
        .parse::<f64>()
        .unwrap_or(0.0);

    let eta_seconds = if speed_factor > 0.0 && total_secs > time_secs {
        Some((total_secs - time_secs) / speed_factor)
    } else {
        None
    };

    Some(RenderProgress {
        percent,
        frame,
        fps,
        speed: speed_str,
        eta_seconds,
    })
}

/// Extract a value from an ffmpeg key=value progress line.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let val = trimmed[..end].to_string();
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Parse an ffmpeg time string like "00:01:02.05" into seconds.
// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::TimelineComposer;
    use reelcut_core::clip::ClipRole;
    use uuid::Uuid;

    fn make_clip(path: &str, role: ClipRole, seconds: f64) -> NormalizedClip {
        NormalizedClip {
            id: Uuid::new_v4(),
            role,
            label: path.to_string(),
            video: VideoSource {
                path: PathBuf::from(path),
                kind: SourceKind::Video,
                trim: None,
            },
            geometry: CropGeometry {
                scaled_width: 3414,
                scaled_height: 1920,
                x: 1167,
                y: 0,
                width: 1080,
                height: 1920,
            },
            mask: MaskMode::Opaque,
            fill: None,
            audio: Some(ClipAudio {
                path: PathBuf::from(path),
                trim: None,
                envelope: AudioEnvelope::default(),
            }),
            duration: TimeUs::from_seconds(seconds),
        }
    }

    fn compose(
        clips: Vec<NormalizedClip>,
        transition: Option<f64>,
        endcard: Option<(NormalizedClip, f64)>,
    ) -> Timeline {
        let mut composer = TimelineComposer::new(preset_shorts(), transition.map(TimeUs::from_seconds));
        for clip in clips {
            composer.push(clip).unwrap();
        }
        if let Some((clip, overlap)) = endcard {
            composer.set_endcard(clip, TimeUs::from_seconds(overlap)).unwrap();
        }
        composer.finalize().unwrap()
    }

    fn plan_for(timeline: &Timeline) -> RenderPlan {
        compile(timeline, Path::new("/tmp/out.mp4")).unwrap()
    }

    #[test]
    fn compile_empty_timeline_returns_error() {
        let timeline = Timeline {
            placements: vec![],
            mode: CompositionMode::StraightConcat,
            duration: TimeUs::ZERO,
            settings: preset_shorts(),
        };
        let result = compile(&timeline, Path::new("/tmp/out.mp4"));
        assert!(matches!(result, Err(RenderError::Composition(_))));
    }

    #[test]
    fn compile_one_clip_produces_valid_filter_graph() {
        let timeline = compose(vec![make_clip("/tmp/clip.mp4", ClipRole::Scene, 4.0)], None, None);
        let plan = plan_for(&timeline);

        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.inputs[0].path, PathBuf::from("/tmp/clip.mp4"));
        assert_eq!(plan.output_path, PathBuf::from("/tmp/out.mp4"));

        let graph = &plan.filter_graph;
        assert!(graph.contains("[0:v]trim=duration=4,setpts=PTS-STARTPTS,fps=30,scale=3414:1920,crop=1080:1920:1167:0,setsar=1"));
        assert!(graph.contains("color=c=black:s=1080x1920:r=30:d=4[base0]"));
        assert!(graph.contains("concat=n=1:v=1:a=0[content]"));
        assert!(graph.contains("format=yuv420p[outv]"));
        assert!(graph.contains("[0:a]atrim=duration=4,asetpts=PTS-STARTPTS"));
        assert!(graph.contains("amix=inputs=2:duration=first:dropout_transition=0:normalize=0[outa]"));
    }

    #[test]
    fn straight_mode_concatenates_base_clips() {
        let timeline = compose(
            vec![
                make_clip("/tmp/clip1.mp4", ClipRole::Scene, 5.0),
                make_clip("/tmp/clip2.mp4", ClipRole::Scene, 3.5),
            ],
            None,
            None,
        );
        let plan = plan_for(&timeline);
        assert!(plan.filter_graph.contains("[v0][v1]concat=n=2:v=1:a=0[content]"));
        assert!(!plan.filter_graph.contains("SlideIn"));
        // Second clip's audio lands after the first.
        assert!(plan.filter_graph.contains("adelay=5000|5000[a1]"));
    }

    #[test]
    fn slide_mode_overlays_with_moving_x() {
        let timeline = compose(
            vec![
                make_clip("/tmp/a.mp4", ClipRole::Scene, 5.0),
                make_clip("/tmp/b.mp4", ClipRole::Scene, 5.0),
            ],
            Some(0.5),
            None,
        );
        let plan = plan_for(&timeline);
        let graph = &plan.filter_graph;
        assert!(!graph.contains("concat="));
        assert!(graph.contains("setpts=PTS-STARTPTS+4.5/TB[v1]"));
        assert!(graph.contains("overlay=x='if(lt(t,4.5+0.5),W*(1-(t-4.5)/0.5),0)'"));
        assert!(graph.contains("enable='between(t,4.5,9.5)'"));
        assert!(graph.contains("afade=t=in:st=0:d=0.5"));
        assert!(graph.contains("afade=t=out:st=4.5:d=0.5"));
    }

    #[test]
    fn compile_deduplicates_same_source() {
        let timeline = compose(
            vec![
                make_clip("/tmp/same.mp4", ClipRole::Scene, 2.0),
                make_clip("/tmp/same.mp4", ClipRole::Scene, 2.0),
            ],
            None,
            None,
        );
        let plan = plan_for(&timeline);
        assert_eq!(plan.inputs.len(), 1);
    }

    #[test]
    fn trimmed_clip_seeks_video_and_audio() {
        let mut clip = make_clip("/tmp/trim.mp4", ClipRole::Scene, 3.0);
        let trim = TrimRange {
            start: TimeUs::from_seconds(1.0),
            end: TimeUs::from_seconds(4.0),
        };
        clip.video.trim = Some(trim);
        clip.audio.as_mut().unwrap().trim = Some(trim);
        let plan = plan_for(&compose(vec![clip], None, None));
        assert!(plan.filter_graph.contains("trim=start=1:duration=3"));
        assert!(plan.filter_graph.contains("atrim=start=1:duration=3"));
    }

    #[test]
    fn image_inputs_are_looped_for_their_duration() {
        let mut clip = make_clip("/tmp/logo.png", ClipRole::Broll, 2.0);
        clip.video.kind = SourceKind::Image;
        clip.audio = None;
        let plan = plan_for(&compose(vec![make_clip("/tmp/a.mp4", ClipRole::Scene, 3.0), clip], None, None));

        let image = plan.inputs.iter().find(|i| i.path == Path::new("/tmp/logo.png")).unwrap();
        assert_eq!(image.args, vec!["-loop", "1", "-framerate", "30", "-t", "2"]);
        let args = build_ffmpeg_args(&plan);
        let pos = args.iter().position(|a| a == "/tmp/logo.png").unwrap();
        assert_eq!(args[pos - 1], "-i");
        assert_eq!(args[pos - 2], "2");
    }

    #[test]
    fn inverted_mask_negates_alpha() {
        let mut clip = make_clip("/tmp/keyed.mov", ClipRole::Broll, 2.0);
        clip.mask = MaskMode::Inverted;
        let plan = plan_for(&compose(vec![make_clip("/tmp/a.mp4", ClipRole::Scene, 3.0), clip], None, None));
        assert!(plan.filter_graph.contains("format=yuva420p,lut=a=negval"));
    }

    #[test]
    fn fill_is_looped_and_composited_under_clip() {
        let mut clip = make_clip("/tmp/keyed.mov", ClipRole::Broll, 2.0);
        clip.mask = MaskMode::Embedded;
        clip.fill = Some(FillLayer {
            path: PathBuf::from("/tmp/fill.mp4"),
        });
        let plan = plan_for(&compose(vec![clip], None, None));
        let fill = plan.inputs.iter().find(|i| i.path == Path::new("/tmp/fill.mp4")).unwrap();
        assert_eq!(fill.args, vec!["-stream_loop", "-1"]);
        let graph = &plan.filter_graph;
        assert!(graph.contains(&format!(
            "[{}:v]trim=duration=2,setpts=PTS-STARTPTS,fps=30,scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,setsar=1[bg0]",
            fill.index
        )));
        assert!(graph.contains("[bg0][fg0]overlay=0:0:eof_action=pass,format=yuv420p"));
    }

    #[test]
    fn endcard_fades_in_over_content() {
        let mut endcard = make_clip("/tmp/end.mov", ClipRole::Endcard, 3.0);
        endcard.mask = MaskMode::Embedded;
        let timeline = compose(
            vec![
                make_clip("/tmp/a.mp4", ClipRole::Scene, 5.0),
                make_clip("/tmp/b.mp4", ClipRole::Scene, 5.0),
            ],
            None,
            Some((endcard, 0.5)),
        );
        let plan = plan_for(&timeline);
        let graph = &plan.filter_graph;
        assert!(graph.contains("fade=t=in:st=0:d=0.5:alpha=1,setpts=PTS-STARTPTS+9.5/TB[v2]"));
        assert!(graph.contains("[vbase][v2]overlay=x=0:y=0:eof_action=pass:enable='between(t,9.5,12.5)'[c2]"));
        assert!(graph.contains("[c2]format=yuv420p[outv]"));
        assert!(graph.contains("d=12.5[base0]"));
        let t = plan.output_args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(plan.output_args[t + 1], "12.5");
    }

    #[test]
    fn silent_timeline_uses_bed_only() {
        let mut clip = make_clip("/tmp/mute.mov", ClipRole::Scene, 2.0);
        clip.audio = None;
        let plan = plan_for(&compose(vec![clip], None, None));
        assert!(plan.filter_graph.contains("anullsrc=r=48000:cl=stereo,atrim=duration=2[abed]"));
        assert!(plan.filter_graph.contains("[abed]anull[outa]"));
        assert!(!plan.filter_graph.contains("amix"));
    }

    #[test]
    fn build_ffmpeg_args_includes_expected_flags() {
        let plan = RenderPlan {
            inputs: vec![
                RenderInput {
                    path: PathBuf::from("/tmp/a.mp4"),
                    index: 0,
                    args: vec![],
                },
                RenderInput {
                    path: PathBuf::from("/tmp/b.mp4"),
                    index: 1,
                    args: vec!["-stream_loop".to_string(), "-1".to_string()],
                },
            ],
            filter_graph: "[0:v]trim=duration=5[v0];[v0]format=yuv420p[outv]".to_string(),
            output_args: vec![
                "-map".to_string(), "[outv]".to_string(),
                "-map".to_string(), "[outa]".to_string(),
                "-c:v".to_string(), "libx264".to_string(),
            ],
            output_path: PathBuf::from("/tmp/out.mp4"),
        };

        let args = build_ffmpeg_args(&plan);

        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/tmp/a.mp4".to_string()));
        assert!(args.contains(&"/tmp/b.mp4".to_string()));
        assert!(args.contains(&"-filter_complex".to_string()));
        assert!(args.contains(&"[outv]".to_string()));
        assert!(args.contains(&"[outa]".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        let b = args.iter().position(|a| a == "/tmp/b.mp4").unwrap();
        assert_eq!(&args[b - 3..b], &["-stream_loop", "-1", "-i"]);
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn parse_progress_extracts_time_and_calculates_percent() {
        let line =
            "frame=  150 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 200.0kbits/s speed=1.50x";
        let total_secs = 10.0;

        let progress = parse_progress(line, total_secs).unwrap();

        assert_eq!(progress.frame, 150);
        assert!((progress.fps - 30.0).abs() < 0.01);
        assert!((progress.percent - 50.0).abs() < 0.1);
        assert_eq!(progress.speed, "1.50x");
        // ETA: (10 - 5) / 1.5 = 3.33s
        assert!((progress.eta_seconds.unwrap() - 3.33).abs() < 0.1);
    }

    #[test]
    fn parse_progress_returns_none_for_non_progress_lines() {
        assert!(parse_progress("Input #0, mov,mp4...", 10.0).is_none());
        assert!(parse_progress("Stream #0:0: Video: h264", 10.0).is_none());
        assert!(parse_progress("", 10.0).is_none());
    }

    #[test]
    fn parse_progress_handles_zero_total_duration() {
        let line = "frame=  10 fps= 30 time=00:00:01.00 speed=1.00x";
        let progress = parse_progress(line, 0.0).unwrap();
        assert!((progress.percent - 0.0).abs() < 0.01);
    }

    #[test]
    fn extract_value_works() {
        let line = "frame=  150 fps= 30.0 time=00:00:05.00 speed=1.50x";
        assert_eq!(extract_value(line, "frame=").unwrap(), "150");
        assert_eq!(extract_value(line, "time=").unwrap(), "00:00:05.00");
        assert!(extract_value(line, "missing=").is_none());
    }
}
