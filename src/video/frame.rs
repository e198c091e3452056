//! CPU frame compositor: evaluates a [`CompositionPlan`] at a point in time.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use tracing::{debug, warn};

use super::overlay::{CaptionOverlay, CtaOverlay};
use super::text::blend_pixel;
use super::timeline::{CompositionPlan, Motion};
use crate::error::RenderError;

/// Substitute for image layers that cannot be read back at export time.
const FLAT_LAYER: Rgba<u8> = Rgba([45, 55, 72, 255]);

struct Layer {
    ordinal: u32,
    start: Duration,
    length: Duration,
    motion: Motion,
    pixels: Arc<RgbaImage>,
    caption: Option<CaptionOverlay>,
}

impl Layer {
    fn end(&self) -> Duration {
        self.start + self.length
    }
}

pub struct FrameCompositor {
    width: u32,
    height: u32,
    crossfade: Duration,
    zoom_rate: f32,
    layers: Vec<Layer>,
    cta: Option<CtaOverlay>,
}

impl FrameCompositor {
    /// Load and cover-fit every clip image once.
    pub fn new(plan: &CompositionPlan) -> Self {
        let (width, height) = plan.resolution;
        let layers = plan
            .clips
            .iter()
            .map(|clip| {
                let pixels = match clip.image.local_path() {
                    Some(path) => load_cover_fitted(path, width, height).unwrap_or_else(|e| {
                        warn!(
                            clip = clip.ordinal,
                            path = %path.display(),
                            error = %e,
                            "image unreadable at export, using a flat layer"
                        );
                        RgbaImage::from_pixel(width, height, FLAT_LAYER)
                    }),
                    None => RgbaImage::from_pixel(width, height, FLAT_LAYER),
                };
                Layer {
                    ordinal: clip.ordinal,
                    start: clip.start_offset,
                    length: clip.length,
                    motion: clip.motion,
                    pixels: Arc::new(pixels),
                    caption: clip.caption.clone(),
                }
            })
            .collect::<Vec<_>>();

        debug!(layers = layers.len(), width, height, "frame compositor ready");
        Self {
            width,
            height,
            crossfade: plan.crossfade,
            zoom_rate: plan.zoom_rate,
            layers,
            cta: plan.cta.clone(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Render the opaque frame shown at `t`.
    pub fn render(&self, t: Duration) -> RgbaImage {
        let mut frame = match self.active_layers(t) {
            None => RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255])),
            Some((current, None)) => self.sample_layer(current, t),
            Some((outgoing, Some((incoming, weight)))) => {
                let mut out = self.sample_layer(outgoing, t);
                let top = self.sample_layer(incoming, t);
                mix_in_place(&mut out, &top, weight);
                out
            }
        };

        for layer in &self.layers {
            if let Some(caption) = &layer.caption {
                let opacity = caption.opacity_at(t);
                if opacity > 0.0 {
                    draw_sprite(&mut frame, caption.sprite.image(), caption.origin.0, caption.origin.1, opacity);
                }
            }
        }

        if let Some(cta) = &self.cta {
            if let Some(scale) = cta.scale_at(t) {
                draw_cta(&mut frame, cta, scale);
            }
        }

        frame
    }

    /// The clip on screen at `t`, plus the incoming clip and its weight while a crossfade runs.
    fn active_layers(&self, t: Duration) -> Option<(&Layer, Option<(&Layer, f32)>)> {
        let last = self.layers.len().checked_sub(1)?;
        let index = self
            .layers
            .iter()
            .position(|l| t < l.end())
            .unwrap_or(last);

        let layer = &self.layers[index];
        // Fade straddles each boundary; the outgoing clip is `index - 1` just after a boundary.
        if index > 0 {
            let previous = &self.layers[index - 1];
            let half = self.half_fade(previous, layer);
            if t < layer.start + half && !half.is_zero() {
                let weight = fade_weight(t, layer.start - half, half * 2);
                return Some((previous, Some((layer, weight))));
            }
        }
        if index < last {
            let next = &self.layers[index + 1];
            let half = self.half_fade(layer, next);
            if t + half >= layer.end() && !half.is_zero() {
                let weight = fade_weight(t, layer.end() - half, half * 2);
                return Some((layer, Some((next, weight))));
            }
        }
        Some((layer, None))
    }

    fn half_fade(&self, a: &Layer, b: &Layer) -> Duration {
        (self.crossfade / 2).min(a.length / 2).min(b.length / 2)
    }

    fn sample_layer(&self, layer: &Layer, t: Duration) -> RgbaImage {
        let elapsed = t.saturating_sub(layer.start);
        let scale = layer.motion.scale_at(elapsed, layer.length, self.zoom_rate);
        zoom_center(&layer.pixels, scale)
    }
}

impl std::fmt::Debug for FrameCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCompositor")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layers", &self.layers.iter().map(|l| l.ordinal).collect::<Vec<_>>())
            .field("cta", &self.cta.is_some())
            .finish()
    }
}

fn fade_weight(t: Duration, from: Duration, span: Duration) -> f32 {
    (t.saturating_sub(from).as_secs_f32() / span.as_secs_f32()).clamp(0.0, 1.0)
}

/// Scale `image` to cover `width`x`height`, crop centred, flatten onto black.
pub fn load_cover_fitted(path: &Path, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
    let source = image::open(path)?.to_rgba8();
    Ok(cover_fit(&source, width, height))
}

pub fn cover_fit(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = source.dimensions();
    if sw == 0 || sh == 0 {
        return RgbaImage::from_pixel(width, height, FLAT_LAYER);
    }

    let scale = (width as f32 / sw as f32).max(height as f32 / sh as f32);
    let rw = ((sw as f32 * scale).ceil() as u32).max(width);
    let rh = ((sh as f32 * scale).ceil() as u32).max(height);
    let resized = imageops::resize(source, rw, rh, FilterType::Triangle);

    let x = (rw - width) / 2;
    let y = (rh - height) / 2;
    let mut fitted = imageops::crop_imm(&resized, x, y, width, height).to_image();
    for pixel in fitted.pixels_mut() {
        let a = pixel.0[3] as f32 / 255.0;
        for c in 0..3 {
            pixel.0[c] = (pixel.0[c] as f32 * a).round() as u8;
        }
        pixel.0[3] = 255;
    }
    fitted
}

/// Centre zoom by `scale` (>= 1) with bilinear sampling, rows in parallel.
pub fn zoom_center(source: &RgbaImage, scale: f32) -> RgbaImage {
    let (width, height) = source.dimensions();
    let mut out = RgbaImage::new(width, height);
    if (scale - 1.0).abs() < f32::EPSILON {
        out.copy_from_slice(source.as_raw());
        return out;
    }

    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let row_bytes = width as usize * 4;
    let buffer: &mut [u8] = &mut out;
    buffer
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = cy + (y as f32 + 0.5 - cy) / scale - 0.5;
            for (x, dst) in row.chunks_exact_mut(4).enumerate() {
                let sx = cx + (x as f32 + 0.5 - cx) / scale - 0.5;
                dst.copy_from_slice(&bilinear(source, sx, sy));
            }
        });
    out
}

fn bilinear(source: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let max_x = source.width() as f32 - 1.0;
    let max_y = source.height() as f32 - 1.0;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(source.width() - 1);
    let y1 = (y0 + 1).min(source.height() - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = source.get_pixel(x0, y0).0;
    let p10 = source.get_pixel(x1, y0).0;
    let p01 = source.get_pixel(x0, y1).0;
    let p11 = source.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// `dst = dst * (1 - weight) + src * weight`, both opaque.
fn mix_in_place(dst: &mut RgbaImage, src: &RgbaImage, weight: f32) {
    let weight = weight.clamp(0.0, 1.0);
    let buffer: &mut [u8] = dst;
    buffer
        .par_chunks_mut(4)
        .zip(src.as_raw().par_chunks(4))
        .for_each(|(d, s)| {
            for c in 0..3 {
                d[c] = (d[c] as f32 * (1.0 - weight) + s[c] as f32 * weight).round() as u8;
            }
            d[3] = 255;
        });
}

fn draw_sprite(canvas: &mut RgbaImage, sprite: &RgbaImage, x: i64, y: i64, opacity: f32) {
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    for (sx, sy, pixel) in sprite.enumerate_pixels() {
        let px = x + sx as i64;
        let py = y + sy as i64;
        if pixel.0[3] == 0 || px < 0 || py < 0 || px >= cw || py >= ch {
            continue;
        }
        let alpha = pixel.0[3] as f32 / 255.0 * opacity;
        blend_pixel(canvas.get_pixel_mut(px as u32, py as u32), *pixel, alpha);
    }
}

fn draw_cta(canvas: &mut RgbaImage, cta: &CtaOverlay, scale: f32) {
    let (sw, sh) = cta.sprite.dimensions();
    let w = ((sw as f32 * scale).round() as u32).max(1);
    let h = ((sh as f32 * scale).round() as u32).max(1);
    let x = (cta.center.0 - w as f32 / 2.0).round() as i64;
    let y = (cta.center.1 - h as f32 / 2.0).round() as i64;

    if (w, h) == (sw, sh) {
        draw_sprite(canvas, cta.sprite.image(), x, y, 1.0);
    } else {
        let scaled = imageops::resize(cta.sprite.image(), w, h, FilterType::Triangle);
        draw_sprite(canvas, &scaled, x, y, 1.0);
    }
}
