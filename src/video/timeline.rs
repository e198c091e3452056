//! Timeline Compositor: turns resolved images into timed clips.

use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::overlay::{CaptionOverlay, CtaOverlay};
use crate::error::CompositionError;
use crate::scene::{ResolvedImage, SceneSpec};

/// Per-clip camera motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    ZoomIn,
    ZoomOut,
}

impl Motion {
    /// Even plan index zooms in, odd zooms out.
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Motion::ZoomIn
        } else {
            Motion::ZoomOut
        }
    }

    /// Scale factor at `elapsed` into a clip of `length`. Never below 1.0.
    pub fn scale_at(self, elapsed: Duration, length: Duration, rate_per_sec: f32) -> f32 {
        let t = elapsed.min(length).as_secs_f32();
        let peak = rate_per_sec * length.as_secs_f32();
        match self {
            Motion::ZoomIn => 1.0 + rate_per_sec * t,
            Motion::ZoomOut => 1.0 + peak - rate_per_sec * t,
        }
    }
}

/// Where the duration of a dropped clip goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Redistribution {
    /// Nearest following clip; the new last clip when nothing follows.
    #[default]
    Following,
    /// Nearest preceding clip; the new first clip when nothing precedes.
    Preceding,
}

impl FromStr for Redistribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "following" | "next" => Ok(Redistribution::Following),
            "preceding" | "previous" => Ok(Redistribution::Preceding),
            other => Err(format!("unknown redistribution policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelineSettings {
    pub resolution: (u32, u32),
    pub crossfade: Duration,
    /// Even shares are rounded down to a multiple of this
    pub slot_quantum: Duration,
    /// Zoom speed, in scale units per second
    pub zoom_rate: f32,
    pub redistribution: Redistribution,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            resolution: (1920, 1080),
            crossfade: Duration::from_millis(500),
            slot_quantum: Duration::from_millis(500),
            zoom_rate: 0.02,
            redistribution: Redistribution::Following,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimedClip {
    pub ordinal: u32,
    pub image: ResolvedImage,
    pub start_offset: Duration,
    pub length: Duration,
    pub motion: Motion,
    /// Caption text requested for this clip
    pub overlay_text: Option<String>,
    /// Rasterised caption, attached by the overlay renderer
    pub caption: Option<CaptionOverlay>,
}

impl TimedClip {
    pub fn end_offset(&self) -> Duration {
        self.start_offset + self.length
    }
}

#[derive(Debug, Clone)]
pub struct CompositionPlan {
    pub clips: Vec<TimedClip>,
    pub cta: Option<CtaOverlay>,
    pub target_total: Duration,
    pub resolution: (u32, u32),
    pub crossfade: Duration,
    pub zoom_rate: f32,
}

impl CompositionPlan {
    /// Sum of all clip lengths.
    pub fn computed_duration(&self) -> Duration {
        self.clips.iter().map(|c| c.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

/// Even split of `target` over `count` slots; the last slot takes the remainder.
pub fn allocate_durations(target: Duration, count: usize, quantum: Duration) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }

    let share = target / count as u32;
    let base = if quantum.is_zero() {
        share
    } else {
        let slots = share.as_nanos() / quantum.as_nanos();
        let quantized = Duration::from_nanos((slots * quantum.as_nanos()) as u64);
        if quantized.is_zero() {
            share
        } else {
            quantized
        }
    };

    let mut lengths = vec![base; count];
    let head: Duration = base * (count as u32 - 1);
    lengths[count - 1] = target - head;
    lengths
}

pub struct TimelineCompositor {
    settings: TimelineSettings,
}

impl TimelineCompositor {
    pub fn new(settings: TimelineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TimelineSettings {
        &self.settings
    }

    /// Build a plan whose clip lengths sum to `target_total` exactly.
    pub fn build(
        &self,
        images: &[ResolvedImage],
        scenes: &[SceneSpec],
        target_total: Duration,
    ) -> Result<CompositionPlan, CompositionError> {
        if scenes.is_empty() {
            return Err(CompositionError::NoScenes);
        }
        if target_total.is_zero() {
            return Err(CompositionError::InvalidDuration(
                "target duration must be positive".to_string(),
            ));
        }
        if images.len() != scenes.len() {
            return Err(CompositionError::MismatchedImages(format!(
                "{} images for {} scenes",
                images.len(),
                scenes.len()
            )));
        }
        if let Some((image, scene)) = images
            .iter()
            .zip(scenes)
            .find(|(image, scene)| image.scene_ordinal != scene.ordinal)
        {
            return Err(CompositionError::MismatchedImages(format!(
                "image for scene {} paired with scene {}",
                image.scene_ordinal, scene.ordinal
            )));
        }

        let lengths = allocate_durations(target_total, scenes.len(), self.settings.slot_quantum);
        let survivors = self.redistribute(images, scenes, &lengths);
        if survivors.is_empty() {
            return Err(CompositionError::NoSurvivingClips);
        }

        let mut clips = Vec::with_capacity(survivors.len());
        let mut offset = Duration::ZERO;
        for (index, (image, scene, length)) in survivors.into_iter().enumerate() {
            let overlay_text = Some(scene.description.trim())
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            let clip = TimedClip {
                ordinal: scene.ordinal,
                image: image.clone(),
                start_offset: offset,
                length,
                motion: Motion::for_index(index),
                overlay_text,
                caption: None,
            };
            debug!(
                ordinal = clip.ordinal,
                start = clip.start_offset.as_secs_f64(),
                length = clip.length.as_secs_f64(),
                motion = ?clip.motion,
                "scheduled clip"
            );
            offset += length;
            clips.push(clip);
        }

        info!(
            clips = clips.len(),
            dropped = scenes.len() - clips.len(),
            total = offset.as_secs_f64(),
            "composition plan built"
        );

        Ok(CompositionPlan {
            clips,
            cta: None,
            target_total,
            resolution: self.settings.resolution,
            crossfade: self.settings.crossfade,
            zoom_rate: self.settings.zoom_rate,
        })
    }

    /// Drop scenes without an image, handing their time to a neighbour.
    fn redistribute<'a>(
        &self,
        images: &'a [ResolvedImage],
        scenes: &'a [SceneSpec],
        lengths: &[Duration],
    ) -> Vec<(&'a ResolvedImage, &'a SceneSpec, Duration)> {
        let mut survivors: Vec<(&ResolvedImage, &SceneSpec, Duration)> = Vec::with_capacity(scenes.len());
        let mut carry = Duration::ZERO;

        for ((image, scene), &length) in images.iter().zip(scenes).zip(lengths) {
            if image.is_missing() {
                warn!(scene = scene.ordinal, "scene has no image, dropping it from the timeline");
                match (self.settings.redistribution, survivors.last_mut()) {
                    (Redistribution::Preceding, Some(previous)) => previous.2 += length,
                    _ => carry += length,
                }
                continue;
            }
            survivors.push((image, scene, length + carry));
            carry = Duration::ZERO;
        }

        if let Some(last) = survivors.last_mut() {
            last.2 += carry;
        }
        survivors
    }
}
