//! Overlay Renderer: captions and the call-to-action button.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use super::text::{paint_mask, truncate_chars, FontBook};
use super::timeline::CompositionPlan;
use crate::error::RenderError;

pub const DEFAULT_CTA_TEXT: &str = "Learn More";

/// A pre-rasterised overlay bitmap (straight alpha).
#[derive(Clone)]
pub struct Sprite(Arc<RgbaImage>);

impl Sprite {
    pub fn new(image: RgbaImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }
}

impl std::fmt::Debug for Sprite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "Sprite({}x{})", w, h)
    }
}

#[derive(Debug, Clone)]
pub struct CaptionOverlay {
    pub text: String,
    pub start_offset: Duration,
    pub length: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,
    /// Top-left corner in output pixels
    pub origin: (i64, i64),
    pub sprite: Sprite,
}

impl CaptionOverlay {
    /// Opacity at absolute time `t`; zero outside the caption window.
    pub fn opacity_at(&self, t: Duration) -> f32 {
        let end = self.start_offset + self.length;
        if t < self.start_offset || t >= end {
            return 0.0;
        }
        let since_start = (t - self.start_offset).as_secs_f32();
        let until_end = (end - t).as_secs_f32();
        let fade_in = ramp(since_start, self.fade_in);
        let fade_out = ramp(until_end, self.fade_out);
        fade_in.min(fade_out)
    }
}

fn ramp(elapsed: f32, span: Duration) -> f32 {
    if span.is_zero() {
        1.0
    } else {
        (elapsed / span.as_secs_f32()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub amplitude: f32,
    pub period: Duration,
}

impl Pulse {
    /// Sinusoidal scale, phase measured from the start of the overlay.
    pub fn scale_at(&self, elapsed: Duration) -> f32 {
        if self.period.is_zero() {
            return 1.0;
        }
        let phase = elapsed.as_secs_f32() / self.period.as_secs_f32();
        1.0 + self.amplitude * (TAU * phase).sin()
    }
}

#[derive(Debug, Clone)]
pub struct CtaOverlay {
    pub text: String,
    pub start_offset: Duration,
    pub length: Duration,
    /// Centre of the button in output pixels
    pub center: (f32, f32),
    pub pulse: Pulse,
    pub sprite: Sprite,
}

impl CtaOverlay {
    pub fn end_offset(&self) -> Duration {
        self.start_offset + self.length
    }

    /// Pulse scale at absolute time `t`, or `None` outside the window.
    pub fn scale_at(&self, t: Duration) -> Option<f32> {
        if t < self.start_offset || t > self.end_offset() {
            return None;
        }
        Some(self.pulse.scale_at(t - self.start_offset))
    }
}

/// Overlay geometry and timing. Pixel sizes are for 1080 lines and scale with output height.
#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub caption_max_chars: usize,
    pub caption_font_px: f32,
    pub caption_stroke_px: f32,
    pub caption_bottom_margin_px: f32,
    pub caption_fade: Duration,
    pub cta_duration: Duration,
    pub cta_box: (f32, f32),
    pub cta_font_px: f32,
    pub cta_background: Rgba<u8>,
    /// Vertical position of the button centre, as a fraction of frame height
    pub cta_anchor_y: f32,
    pub cta_pulse: Pulse,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            caption_max_chars: 60,
            caption_font_px: 50.0,
            caption_stroke_px: 2.0,
            caption_bottom_margin_px: 40.0,
            caption_fade: Duration::from_millis(500),
            cta_duration: Duration::from_secs(2),
            cta_box: (400.0, 80.0),
            cta_font_px: 60.0,
            cta_background: Rgba([0, 0, 255, 255]),
            cta_anchor_y: 0.8,
            cta_pulse: Pulse {
                amplitude: 0.1,
                period: Duration::from_secs(1),
            },
        }
    }
}

const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const STROKE_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

pub struct OverlayRenderer {
    fonts: Arc<FontBook>,
    settings: OverlaySettings,
}

impl OverlayRenderer {
    pub fn new(fonts: Arc<FontBook>, settings: OverlaySettings) -> Self {
        Self { fonts, settings }
    }

    /// Attach captions and the CTA. Overlays that fail to render are skipped.
    pub fn apply(&self, mut plan: CompositionPlan, cta_text: Option<&str>) -> CompositionPlan {
        let (width, height) = plan.resolution;
        let unit = height as f32 / 1080.0;

        for clip in plan.clips.iter_mut() {
            let Some(text) = clip.overlay_text.as_deref() else {
                continue;
            };
            let text = truncate_chars(text, self.settings.caption_max_chars);
            match self.render_caption(&text, width, unit) {
                Ok(sprite) => {
                    let (sw, sh) = sprite.dimensions();
                    let margin = (self.settings.caption_bottom_margin_px * unit).round() as i64;
                    let origin = (
                        (width as i64 - sw as i64) / 2,
                        height as i64 - sh as i64 - margin,
                    );
                    let fade = self.settings.caption_fade.min(clip.length / 2);
                    clip.caption = Some(CaptionOverlay {
                        text,
                        start_offset: clip.start_offset,
                        length: clip.length,
                        fade_in: fade,
                        fade_out: fade,
                        origin,
                        sprite,
                    });
                }
                Err(e) => {
                    warn!(clip = clip.ordinal, error = %e, "caption overlay skipped");
                    clip.caption = None;
                }
            }
        }

        plan.cta = self.build_cta(&plan, cta_text, unit);
        plan
    }

    fn build_cta(&self, plan: &CompositionPlan, cta_text: Option<&str>, unit: f32) -> Option<CtaOverlay> {
        let length = self.settings.cta_duration;
        if plan.target_total < length {
            info!(
                target = plan.target_total.as_secs_f64(),
                "video shorter than the call-to-action window, CTA omitted"
            );
            return None;
        }

        let text = cta_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CTA_TEXT)
            .to_string();

        let sprite = match self.render_cta(&text, unit) {
            Ok(sprite) => sprite,
            Err(e) => {
                warn!(error = %e, "call-to-action overlay skipped");
                return None;
            }
        };

        let (width, height) = plan.resolution;
        let cta = CtaOverlay {
            text,
            start_offset: plan.target_total - length,
            length,
            center: (width as f32 / 2.0, height as f32 * self.settings.cta_anchor_y),
            pulse: self.settings.cta_pulse,
            sprite,
        };
        debug!(
            start = cta.start_offset.as_secs_f64(),
            end = cta.end_offset().as_secs_f64(),
            "call-to-action scheduled"
        );
        Some(cta)
    }

    fn render_caption(&self, text: &str, frame_width: u32, unit: f32) -> Result<Sprite, RenderError> {
        let stroke = (self.settings.caption_stroke_px * unit).round().max(1.0) as u32;
        let max_width = frame_width.saturating_sub(2 * stroke + (frame_width / 20));
        let mask = self
            .fonts
            .rasterize_fitted(text, self.settings.caption_font_px * unit, max_width)?;

        let mut sprite = RgbaImage::new(mask.width() + 2 * stroke, mask.height() + 2 * stroke);
        let s = stroke as i64;
        for dy in -s..=s {
            for dx in -s..=s {
                if dx == 0 && dy == 0 {
                    continue;
                }
                paint_mask(&mut sprite, &mask, s + dx, s + dy, STROKE_COLOR);
            }
        }
        paint_mask(&mut sprite, &mask, s, s, TEXT_COLOR);
        Ok(Sprite::new(sprite))
    }

    fn render_cta(&self, text: &str, unit: f32) -> Result<Sprite, RenderError> {
        let box_w = (self.settings.cta_box.0 * unit).round().max(1.0) as u32;
        let box_h = (self.settings.cta_box.1 * unit).round().max(1.0) as u32;
        let padding = (box_h / 8).max(1);

        let mask = self.fonts.rasterize_fitted(
            text,
            self.settings.cta_font_px * unit,
            box_w.saturating_sub(2 * padding),
        )?;
        if mask.height() > box_h {
            return Err(RenderError::Layout(format!(
                "CTA text is {}px tall, button is {}px",
                mask.height(),
                box_h
            )));
        }

        let mut sprite = RgbaImage::from_pixel(box_w, box_h, self.settings.cta_background);
        let x = (box_w as i64 - mask.width() as i64) / 2;
        let y = (box_h as i64 - mask.height() as i64) / 2;
        paint_mask(&mut sprite, &mask, x, y, TEXT_COLOR);
        Ok(Sprite::new(sprite))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ResolvedImage, SceneSpec};
    use crate::video::timeline::{TimelineCompositor, TimelineSettings};
    use std::path::PathBuf;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn plan(descriptions: &[&str], target: f64, resolution: (u32, u32)) -> CompositionPlan {
        let scenes: Vec<SceneSpec> = descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| SceneSpec::new(i as u32 + 1, *d, ""))
            .collect();
        let images: Vec<ResolvedImage> = scenes
            .iter()
            .map(|s| ResolvedImage::placeholder(s.ordinal, PathBuf::from("/tmp/none.png")))
            .collect();
        TimelineCompositor::new(TimelineSettings {
            resolution,
            ..TimelineSettings::default()
        })
        .build(&images, &scenes, secs(target))
        .unwrap()
    }

    fn renderer() -> OverlayRenderer {
        OverlayRenderer::new(Arc::new(FontBook::builtin()), OverlaySettings::default())
    }

    #[test]
    fn cta_occupies_the_last_two_seconds() {
        for target in [2.0, 5.0, 20.0, 45.5] {
            let plan = renderer().apply(plan(&["a", "b"], target, (640, 360)), None);
            let cta = plan.cta.expect("cta");
            assert_eq!(cta.start_offset, secs(target) - secs(2.0));
            assert_eq!(cta.end_offset(), secs(target));
            assert_eq!(cta.text, DEFAULT_CTA_TEXT);
            assert_eq!(cta.center.0, 320.0);
            assert!((cta.center.1 - 288.0).abs() < 1e-3);
        }
    }

    #[test]
    fn cta_keeps_its_full_window_when_the_last_clip_is_short() {
        let plan = renderer().apply(plan(&["a", "b", "c", "d"], 6.0, (640, 360)), None);
        let last = plan.clips.last().expect("last clip");
        assert_eq!(last.start_offset, secs(4.5));
        assert_eq!(last.end_offset(), secs(6.0));

        // The CTA reaches back into the previous clip rather than shrinking.
        let cta = plan.cta.expect("cta");
        assert_eq!(cta.start_offset, secs(4.0));
        assert_eq!(cta.end_offset(), secs(6.0));
        assert!(cta.start_offset < last.start_offset);
    }

    #[test]
    fn cta_is_omitted_for_short_videos() {
        let plan = renderer().apply(plan(&["a"], 1.5, (640, 360)), Some("Buy"));
        assert!(plan.cta.is_none());
    }

    #[test]
    fn custom_cta_text_is_used() {
        let plan = renderer().apply(plan(&["a"], 20.0, (1920, 1080)), Some("Shop Now"));
        let cta = plan.cta.unwrap();
        assert_eq!(cta.text, "Shop Now");
        assert_eq!(cta.sprite.dimensions(), (400, 80));
    }

    #[test]
    fn captions_are_truncated_and_span_the_clip() {
        let long = "An extraordinarily long scene description that goes well past sixty characters";
        let plan = renderer().apply(plan(&[long, "Short"], 20.0, (1920, 1080)), None);

        let caption = plan.clips[0].caption.as_ref().unwrap();
        assert_eq!(caption.text.chars().count(), 60);
        assert_eq!(caption.start_offset, plan.clips[0].start_offset);
        assert_eq!(caption.length, plan.clips[0].length);
        assert_eq!(caption.fade_in, secs(0.5));
        assert_eq!(caption.fade_out, secs(0.5));

        let (_, sh) = caption.sprite.dimensions();
        assert_eq!(caption.origin.1 + sh as i64 + 40, 1080);
    }

    #[test]
    fn caption_fades_inside_its_window() {
        let plan = renderer().apply(plan(&["One", "Two"], 20.0, (640, 360)), None);
        let caption = plan.clips[1].caption.as_ref().unwrap();
        let start = caption.start_offset;
        let end = start + caption.length;

        assert_eq!(caption.opacity_at(start - secs(0.1)), 0.0);
        assert_eq!(caption.opacity_at(start), 0.0);
        assert!((caption.opacity_at(start + secs(0.25)) - 0.5).abs() < 1e-4);
        assert_eq!(caption.opacity_at(start + secs(3.0)), 1.0);
        assert!((caption.opacity_at(end - secs(0.25)) - 0.5).abs() < 1e-4);
        assert_eq!(caption.opacity_at(end), 0.0);
    }

    #[test]
    fn unrenderable_caption_is_skipped_without_failing() {
        // Far too wide for a 64px frame even at the smallest size.
        let long = "W".repeat(59);
        let plan = renderer().apply(plan(&[long.as_str(), "ok"], 20.0, (64, 36)), None);
        assert!(plan.clips[0].caption.is_none());
        assert_eq!(plan.clips.len(), 2);
    }

    #[test]
    fn pulse_is_sinusoidal_with_fixed_period() {
        let pulse = OverlaySettings::default().cta_pulse;
        assert!((pulse.scale_at(Duration::ZERO) - 1.0).abs() < 1e-6);
        assert!((pulse.scale_at(secs(0.25)) - 1.1).abs() < 1e-5);
        assert!((pulse.scale_at(secs(0.75)) - 0.9).abs() < 1e-5);
        assert!((pulse.scale_at(secs(1.25)) - 1.1).abs() < 1e-5);
    }

    #[test]
    fn cta_scale_only_inside_window() {
        let plan = renderer().apply(plan(&["a"], 20.0, (640, 360)), None);
        let cta = plan.cta.unwrap();
        assert!(cta.scale_at(secs(17.9)).is_none());
        assert!(cta.scale_at(secs(18.0)).is_some());
        assert!(cta.scale_at(secs(20.0)).is_some());
    }
}
