//! Image Resolver: one still image per scene, synthesized or placeholder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::text::{paint_mask, truncate_chars, FontBook};
use crate::api::ImageSynthesizer;
use crate::error::{RenderError, SynthesisError};
use crate::scene::{BrandDescriptor, ResolvedImage, SceneSpec};

const STYLE_SUFFIX: &str = "high-end commercial photography, studio lighting, \
professional composition, brand-focused, marketing campaign quality, \
clean background, modern aesthetic, high resolution, sharp focus, \
commercial advertising style, premium quality";

const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([45, 55, 72, 255]);
const PLACEHOLDER_TITLE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PLACEHOLDER_DESCRIPTION: Rgba<u8> = Rgba([200, 200, 200, 255]);
const PLACEHOLDER_DESCRIPTION_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Square size requested from the synthesizer and used for placeholders
    pub image_size: (u32, u32),
    pub synthesis_timeout: Duration,
    pub max_parallel: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            image_size: (1024, 1024),
            synthesis_timeout: Duration::from_secs(300),
            max_parallel: 4,
        }
    }
}

/// Deterministic synthesis prompt for one scene.
pub fn build_prompt(scene: &SceneSpec, brand: &BrandDescriptor) -> String {
    format!(
        "Professional commercial photography for {} in {} industry.\n\
         Scene {}: {}\n\
         Visual elements: {}\n\
         Style: {}, {}",
        brand.name,
        brand.industry,
        scene.ordinal,
        scene.description,
        scene.visual_elements,
        brand.tone,
        STYLE_SUFFIX
    )
}

pub struct ImageResolver {
    synthesizer: Option<Arc<dyn ImageSynthesizer>>,
    fonts: Arc<FontBook>,
    settings: ResolverSettings,
}

impl ImageResolver {
    pub fn new(
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        fonts: Arc<FontBook>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            synthesizer,
            fonts,
            settings,
        }
    }

    /// Resolve every scene. The result has one entry per scene, in order.
    pub async fn resolve(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        run_dir: &Path,
    ) -> Vec<ResolvedImage> {
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel.max(1)));

        let futures: Vec<_> = scenes
            .iter()
            .map(|scene| {
                let permits = Arc::clone(&permits);
                async move {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await.ok();
                    self.resolve_scene(scene, brand, run_dir).await
                }
            })
            .collect();

        let images = join_all(futures).await;

        let placeholders = images.iter().filter(|i| i.is_placeholder()).count();
        let missing = images.iter().filter(|i| i.is_missing()).count();
        info!(
            scenes = images.len(),
            placeholders, missing, "resolved scene images"
        );
        images
    }

    async fn resolve_scene(&self, scene: &SceneSpec, brand: &BrandDescriptor, run_dir: &Path) -> ResolvedImage {
        match self.synthesize(scene, brand, run_dir).await {
            Ok(path) => {
                info!(scene = scene.ordinal, path = %path.display(), "synthesized scene image");
                return ResolvedImage::synthesized(scene.ordinal, path);
            }
            Err(SynthesisError::Unavailable) => {
                info!(scene = scene.ordinal, "no image synthesizer configured, using placeholder");
            }
            Err(e) => {
                warn!(scene = scene.ordinal, error = %e, "image synthesis failed, using placeholder");
            }
        }

        let fonts = Arc::clone(&self.fonts);
        let scene_for_task = scene.clone();
        let dir = run_dir.to_path_buf();
        let size = self.settings.image_size;
        let rendered = tokio::task::spawn_blocking(move || {
            render_placeholder(&scene_for_task, &fonts, size, &dir)
        })
        .await;

        match rendered {
            Ok(Ok(path)) => ResolvedImage::placeholder(scene.ordinal, path),
            Ok(Err(e)) => {
                warn!(scene = scene.ordinal, error = %e, "placeholder rendering failed, scene will be skipped");
                ResolvedImage::missing(scene.ordinal)
            }
            Err(e) => {
                warn!(scene = scene.ordinal, error = %e, "placeholder task aborted, scene will be skipped");
                ResolvedImage::missing(scene.ordinal)
            }
        }
    }

    async fn synthesize(
        &self,
        scene: &SceneSpec,
        brand: &BrandDescriptor,
        run_dir: &Path,
    ) -> Result<PathBuf, SynthesisError> {
        let synthesizer = self.synthesizer.as_ref().ok_or(SynthesisError::Unavailable)?;
        let prompt = build_prompt(scene, brand);

        let timeout = self.settings.synthesis_timeout;
        let bytes = tokio::time::timeout(timeout, synthesizer.synthesize_image(&prompt, self.settings.image_size))
            .await
            .map_err(|_| SynthesisError::Timeout(timeout))??;

        let format = image::guess_format(&bytes).map_err(|e| SynthesisError::InvalidImage(e.to_string()))?;
        image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| SynthesisError::InvalidImage(e.to_string()))?;

        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let path = run_dir.join(format!("scene_{}.{}", scene.ordinal, extension));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// Draw the stand-in image for `scene` and save it as PNG in `dir`.
pub fn render_placeholder(
    scene: &SceneSpec,
    fonts: &FontBook,
    size: (u32, u32),
    dir: &Path,
) -> Result<PathBuf, RenderError> {
    let (width, height) = size;
    let mut canvas = RgbaImage::from_pixel(width, height, PLACEHOLDER_BACKGROUND);

    let unit = height as f32 / 1024.0;
    let max_width = width.saturating_sub((width / 16).max(1));

    let title = fonts.rasterize_fitted(&format!("Scene {}", scene.ordinal), 48.0 * unit, max_width)?;
    let title_x = (width as i64 - title.width() as i64) / 2;
    let title_y = (height as i64 - title.height() as i64) / 2 - (50.0 * unit) as i64;
    paint_mask(&mut canvas, &title, title_x, title_y, PLACEHOLDER_TITLE);

    let description = truncate_chars(&scene.description, PLACEHOLDER_DESCRIPTION_CHARS);
    if !description.trim().is_empty() {
        match fonts.rasterize_fitted(&description, 24.0 * unit, max_width) {
            Ok(mask) => {
                let x = (width as i64 - mask.width() as i64) / 2;
                let y = title_y + (80.0 * unit) as i64;
                paint_mask(&mut canvas, &mask, x, y, PLACEHOLDER_DESCRIPTION);
            }
            Err(e) => warn!(scene = scene.ordinal, error = %e, "placeholder description skipped"),
        }
    }

    let path = dir.join(format!("placeholder_scene_{}.png", scene.ordinal));
    canvas.save_with_format(&path, ImageFormat::Png)?;
    Ok(path)
}
