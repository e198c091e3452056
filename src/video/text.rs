//! Text rasterisation for placeholders and overlays.
//!
//! Fonts are looked up best-effort: an explicitly configured file first, then
//! a handful of well-known system locations. When none of them loads, a
//! built-in 5x7 bitmap face is used so text can always be drawn.

use std::path::{Path, PathBuf};

use fontdue::{Font, FontSettings};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::error::RenderError;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

enum Typeface {
    Outline(Font),
    Builtin,
}

pub struct FontBook {
    face: Typeface,
    source: Option<PathBuf>,
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("builtin", &self.is_builtin())
            .field("source", &self.source)
            .finish()
    }
}

impl FontBook {
    /// Try `preferred`, then the system candidates, then fall back to the built-in face.
    pub fn discover(preferred: Option<&Path>) -> Self {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            match load_font(&path) {
                Ok(font) => {
                    debug!(path = %path.display(), "loaded font");
                    return Self {
                        face: Typeface::Outline(font),
                        source: Some(path),
                    };
                }
                Err(reason) => debug!(path = %path.display(), %reason, "font candidate unavailable"),
            }
        }

        warn!("no usable font file found, using the built-in bitmap font");
        Self::builtin()
    }

    pub fn builtin() -> Self {
        Self {
            face: Typeface::Builtin,
            source: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.face, Typeface::Builtin)
    }

    /// Rasterise one line of text into a coverage mask.
    pub fn rasterize(&self, text: &str, px: f32) -> Result<GrayImage, RenderError> {
        if text.trim().is_empty() {
            return Err(RenderError::EmptyText);
        }
        if !px.is_finite() || px < 1.0 {
            return Err(RenderError::Layout(format!("invalid font size {}", px)));
        }

        match &self.face {
            Typeface::Outline(font) => rasterize_outline(font, text, px),
            Typeface::Builtin => Ok(rasterize_builtin(text, px)),
        }
    }

    /// Rasterise, shrinking the size until the line fits in `max_width`.
    pub fn rasterize_fitted(&self, text: &str, px: f32, max_width: u32) -> Result<GrayImage, RenderError> {
        let mask = self.rasterize(text, px)?;
        if mask.width() <= max_width {
            return Ok(mask);
        }

        let shrunk = px * max_width as f32 / mask.width() as f32;
        if shrunk < MIN_PX {
            return Err(RenderError::Layout(format!(
                "'{}' does not fit in {}px",
                text, max_width
            )));
        }

        let mask = self.rasterize(text, shrunk)?;
        if mask.width() > max_width {
            return Err(RenderError::Layout(format!(
                "'{}' does not fit in {}px",
                text, max_width
            )));
        }
        Ok(mask)
    }
}

const MIN_PX: f32 = 6.0;

fn load_font(path: &Path) -> Result<Font, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    Font::from_bytes(bytes, FontSettings::default()).map_err(|e| e.to_string())
}

fn rasterize_outline(font: &Font, text: &str, px: f32) -> Result<GrayImage, RenderError> {
    let line = font
        .horizontal_line_metrics(px)
        .ok_or_else(|| RenderError::Layout("font has no horizontal metrics".to_string()))?;

    let ascent = line.ascent.ceil();
    let height = (line.ascent - line.descent).ceil().max(1.0) as u32;
    let width = text
        .chars()
        .map(|c| font.metrics(c, px).advance_width)
        .sum::<f32>()
        .ceil()
        .max(1.0) as u32;

    let mut mask = GrayImage::new(width, height);
    let mut pen_x = 0.0f32;
    for c in text.chars() {
        let (metrics, coverage) = font.rasterize(c, px);
        let left = (pen_x + metrics.xmin as f32).round() as i64;
        let top = (ascent - metrics.ymin as f32 - metrics.height as f32).round() as i64;

        for gy in 0..metrics.height {
            for gx in 0..metrics.width {
                let x = left + gx as i64;
                let y = top + gy as i64;
                if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    continue;
                }
                let value = coverage[gy * metrics.width + gx];
                let dst = mask.get_pixel_mut(x as u32, y as u32);
                dst.0[0] = dst.0[0].max(value);
            }
        }
        pen_x += metrics.advance_width;
    }

    Ok(mask)
}

const GLYPH_COLUMNS: u32 = 5;
const GLYPH_ROWS: u32 = 7;

fn rasterize_builtin(text: &str, px: f32) -> GrayImage {
    let scale = ((px / 8.0).floor() as u32).max(1);
    let advance = (GLYPH_COLUMNS + 1) * scale;
    let count = text.chars().count() as u32;

    let mut mask = GrayImage::new((advance * count).max(1), (GLYPH_ROWS + 1) * scale);
    for (i, c) in text.chars().enumerate() {
        let rows = builtin_glyph(c);
        let origin_x = i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLUMNS {
                if bits & (1 << (GLYPH_COLUMNS - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        mask.put_pixel(origin_x + col * scale + dx, row as u32 * scale + dy, Luma([255]));
                    }
                }
            }
        }
    }
    mask
}

fn builtin_glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0; 7],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '\'' => [0x0C, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        '"' => [0x0A, 0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00],
        '&' => [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        // '?' and everything unsupported
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

/// First `max` characters of `text` (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Paint `color` through `mask` onto `canvas` with its top-left at (`x`, `y`).
pub fn paint_mask(canvas: &mut RgbaImage, mask: &GrayImage, x: i64, y: i64, color: Rgba<u8>) {
    for (mx, my, coverage) in mask.enumerate_pixels() {
        let cx = x + mx as i64;
        let cy = y + my as i64;
        if coverage.0[0] == 0 || cx < 0 || cy < 0 || cx >= canvas.width() as i64 || cy >= canvas.height() as i64 {
            continue;
        }
        let alpha = coverage.0[0] as f32 / 255.0 * color.0[3] as f32 / 255.0;
        blend_pixel(canvas.get_pixel_mut(cx as u32, cy as u32), color, alpha);
    }
}

/// Straight-alpha "over" of `src` onto `dst` at `alpha` in 0..=1.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let dst_a = dst.0[3] as f32 / 255.0;
    let out_a = alpha + dst_a * (1.0 - alpha);
    for i in 0..3 {
        let s = src.0[i] as f32;
        let d = dst.0[i] as f32;
        let v = if out_a > 0.0 {
            (s * alpha + d * dst_a * (1.0 - alpha)) / out_a
        } else {
            0.0
        };
        dst.0[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
