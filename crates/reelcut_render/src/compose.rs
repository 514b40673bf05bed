//! Timeline sequencing: concatenation or slide transitions, plus card overlays.

use reelcut_core::types::{
    CompositionMode, Layer, NormalizedClip, OutputSettings, Placement, TimeUs, Timeline,
    VideoEffect,
};

use crate::error::{RenderError, Result};

/// Upper bound of the audio fades at the end-card join.
pub const ENDCARD_AUDIO_FADE: TimeUs = TimeUs(300_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    Empty,
    Accumulating,
    SlideTransition,
    StraightConcat,
    Finalized,
}

/// Collects normalized clips in input order and lays them out on a timeline.
///
/// `Empty -> Accumulating -> (SlideTransition | StraightConcat) -> Finalized`
#[derive(Debug)]
pub struct TimelineComposer {
    state: ComposerState,
    settings: OutputSettings,
    transition: Option<TimeUs>,
    clips: Vec<NormalizedClip>,
    intro: Option<NormalizedClip>,
    endcard: Option<(NormalizedClip, TimeUs)>,
}

impl TimelineComposer {
    /// `transition` enables slide transitions of that length.
    pub fn new(settings: OutputSettings, transition: Option<TimeUs>) -> Self {
        Self {
            state: ComposerState::Empty,
            settings,
            transition: transition.filter(|t| t.is_positive()),
            clips: Vec::new(),
            intro: None,
            endcard: None,
        }
    }

    pub fn state(&self) -> ComposerState {
        self.state
    }

    pub fn push(&mut self, clip: NormalizedClip) -> Result<()> {
        self.ensure_open("push a clip")?;
        self.clips.push(clip);
        self.state = ComposerState::Accumulating;
        Ok(())
    }

    pub fn set_intro(&mut self, clip: NormalizedClip) -> Result<()> {
        self.ensure_open("set the intro-card")?;
        self.intro = Some(clip);
        Ok(())
    }

    /// `overlap` is how far the end-card reaches back over the content.
    pub fn set_endcard(&mut self, clip: NormalizedClip, overlap: TimeUs) -> Result<()> {
        self.ensure_open("set the end-card")?;
        self.endcard = Some((clip, overlap.max(TimeUs::ZERO)));
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        match self.state {
            ComposerState::Empty | ComposerState::Accumulating => Ok(()),
            state => Err(RenderError::Composition(format!(
                "cannot {action} in state {state:?}"
            ))),
        }
    }

    /// Lay out every clip and return the finished timeline.
    pub fn finalize(&mut self) -> Result<Timeline> {
        match self.state {
            ComposerState::Accumulating => {}
            ComposerState::Empty => {
                return Err(RenderError::Composition("no valid clips to compose".into()))
            }
            state => {
                return Err(RenderError::Composition(format!(
                    "cannot finalize in state {state:?}"
                )))
            }
        }

        let clips = std::mem::take(&mut self.clips);
        let (mode, mut placements) = match self.transition {
            Some(duration) => {
                self.state = ComposerState::SlideTransition;
                (
                    CompositionMode::SlideTransition { duration },
                    place_with_slides(clips, duration),
                )
            }
            None => {
                self.state = ComposerState::StraightConcat;
                (CompositionMode::StraightConcat, place_back_to_back(clips))
            }
        };
        let content_end = placements
            .last()
            .map(Placement::end)
            .unwrap_or(TimeUs::ZERO);

        if let Some(mut intro) = self.intro.take() {
            if intro.duration > content_end {
                tracing::debug!(clip = %intro.label, "intro-card cut to content length");
                intro.duration = content_end;
            }
            tracing::info!(clip = %intro.label, duration = %intro.duration, "intro-card placed at 0");
            placements.push(Placement {
                clip: intro,
                start: TimeUs::ZERO,
                layer: Layer::Intro,
                effects: Vec::new(),
            });
        }

        let mut duration = content_end;
        if let Some((endcard, overlap)) = self.endcard.take() {
            let placement = place_endcard(&mut placements, endcard, overlap, content_end);
            duration = duration.max(placement.end());
            placements.push(placement);
        }

        self.state = ComposerState::Finalized;
        tracing::info!(
            mode = ?mode,
            clips = placements.len(),
            duration = %duration,
            "timeline composed"
        );
        Ok(Timeline {
            placements,
            mode,
            duration,
            settings: self.settings,
        })
    }
}

fn place_back_to_back(clips: Vec<NormalizedClip>) -> Vec<Placement> {
    let mut cursor = TimeUs::ZERO;
    clips
        .into_iter()
        .map(|clip| {
            let start = cursor;
            cursor = cursor + clip.duration;
            Placement {
                clip,
                start,
                layer: Layer::Base,
                effects: Vec::new(),
            }
        })
        .collect()
}

/// Each clip starts `transition` before its predecessor ends and slides in
/// from the right while the audio crossfades. The overlap is clamped to
/// the shorter neighbour.
fn place_with_slides(clips: Vec<NormalizedClip>, transition: TimeUs) -> Vec<Placement> {
    let mut placements: Vec<Placement> = Vec::with_capacity(clips.len());
    for mut clip in clips {
        let Some(prev) = placements.last_mut() else {
            placements.push(Placement {
                clip,
                start: TimeUs::ZERO,
                layer: Layer::Base,
                effects: Vec::new(),
            });
            continue;
        };

        let overlap = transition.min(prev.clip.duration).min(clip.duration);
        if overlap < transition {
            tracing::warn!(
                clip = %clip.label,
                requested = %transition,
                used = %overlap,
                "transition longer than a neighbouring clip, shortened"
            );
        }
        let start = prev.end() - overlap;

        let mut effects = Vec::new();
        if overlap.is_positive() {
            if let Some(audio) = prev.clip.audio.as_mut() {
                audio.envelope = audio.envelope.with_fade_out(overlap);
            }
            if let Some(audio) = clip.audio.as_mut() {
                audio.envelope = audio.envelope.with_fade_in(overlap);
            }
            effects.push(VideoEffect::SlideIn { duration: overlap });
        }

        placements.push(Placement {
            clip,
            start,
            layer: Layer::Base,
            effects,
        });
    }
    placements
}

/// Place the end-card `overlap` before `content_end`, fading it in over the
/// overlap and fading the audio on both sides of the join.
fn place_endcard(
    placements: &mut [Placement],
    mut endcard: NormalizedClip,
    overlap: TimeUs,
    content_end: TimeUs,
) -> Placement {
    let last_base = placements
        .iter_mut()
        .filter(|p| p.layer == Layer::Base)
        .max_by_key(|p| p.end());
    let last_duration = last_base
        .as_ref()
        .map(|p| p.clip.duration)
        .unwrap_or(TimeUs::ZERO);

    let clamped = overlap.min(endcard.duration).min(last_duration);
    if clamped < overlap {
        tracing::warn!(
            clip = %endcard.label,
            requested = %overlap,
            used = %clamped,
            "end-card overlap longer than the clips it joins, shortened"
        );
    }

    let mut effects = Vec::new();
    if clamped.is_positive() {
        let audio_fade = clamped.min(ENDCARD_AUDIO_FADE);
        if let Some(last) = last_base {
            if let Some(audio) = last.clip.audio.as_mut() {
                audio.envelope = audio.envelope.with_fade_out(audio_fade);
            }
        }
        if let Some(audio) = endcard.audio.as_mut() {
            audio.envelope = audio.envelope.with_fade_in(audio_fade);
        }
        effects.push(VideoEffect::FadeIn { duration: clamped });
    }

    let start = content_end - clamped;
    tracing::info!(clip = %endcard.label, start = %start, overlap = %clamped, "end-card placed");
    Placement {
        clip: endcard,
        start,
        layer: Layer::Endcard,
        effects,
    }
}
