use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::encoder::{FfmpegEncoder, VideoEncoder};
use super::export::{Exporter, VideoArtifact};
use super::overlay::{OverlayRenderer, OverlaySettings};
use super::resolver::ImageResolver;
use super::text::FontBook;
use super::timeline::{CompositionPlan, TimelineCompositor};
use crate::api::ImageSynthesizer;
use crate::config::GeneratorConfig;
use crate::error::{Result, VideoError};
use crate::scene::{normalize_scenes, BrandDescriptor, SceneSpec};
use crate::storage::ObjectStore;

/// Cooperative cancellation flag shared with a running generation.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            warn!(stage, "generation cancelled");
            return Err(VideoError::Cancelled { stage });
        }
        Ok(())
    }
}

pub struct VideoGenerator {
    resolver: ImageResolver,
    timeline: TimelineCompositor,
    overlays: OverlayRenderer,
    exporter: Exporter,
    work_dir: PathBuf,
}

impl VideoGenerator {
    /// Wire the pipeline with system fonts and the `ffmpeg` encoder.
    pub fn new(
        config: &GeneratorConfig,
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let fonts = Arc::new(FontBook::discover(config.font_path.as_deref()));
        let encoder = FfmpegEncoder::new(&config.ffmpeg_binary).with_preset(&config.x264_preset);
        Self::with_components(config, fonts, synthesizer, Arc::new(encoder), store)
    }

    pub fn with_components(
        config: &GeneratorConfig,
        fonts: Arc<FontBook>,
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        encoder: Arc<dyn VideoEncoder>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            resolver: ImageResolver::new(synthesizer, Arc::clone(&fonts), config.resolver_settings()),
            timeline: TimelineCompositor::new(config.timeline_settings()),
            overlays: OverlayRenderer::new(fonts, OverlaySettings::default()),
            exporter: Exporter::new(encoder, store, config.export_settings()),
            work_dir: config.work_dir.clone(),
        }
    }

    /// Produce and publish one video ad of exactly `target_total`.
    pub async fn generate(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        target_total: Duration,
        cta_text: Option<&str>,
    ) -> Result<VideoArtifact> {
        self.generate_with_cancel(scenes, brand, target_total, cta_text, &CancelHandle::new())
            .await
    }

    /// Like [`generate`](Self::generate), checking `cancel` between stages.
    pub async fn generate_with_cancel(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        target_total: Duration,
        cta_text: Option<&str>,
        cancel: &CancelHandle,
    ) -> Result<VideoArtifact> {
        let scenes = normalize_scenes(scenes)?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let run_dir = Arc::new(
            tempfile::Builder::new()
                .prefix("run-")
                .tempdir_in(&self.work_dir)?,
        );
        info!(
            brand = %brand.name,
            scenes = scenes.len(),
            target = target_total.as_secs_f64(),
            run_dir = %run_dir.path().display(),
            "generation started"
        );

        let outcome = self
            .run(&scenes, brand, target_total, cta_text, cancel, &run_dir)
            .await;

        let path = run_dir.path().to_path_buf();
        match Arc::try_unwrap(run_dir) {
            Ok(dir) => {
                if let Err(e) = dir.close() {
                    warn!(run_dir = %path.display(), error = %e, "failed to remove run directory");
                }
            }
            // Removed by whichever holder drops it last.
            Err(_) => debug!(run_dir = %path.display(), "run directory still held by an encoding job"),
        }

        match &outcome {
            Ok(artifact) => info!(url = %artifact.remote_locator, "generation finished"),
            Err(e) => warn!(error = %e, "generation failed"),
        }
        outcome
    }

    /// Resolve images into `run_dir` and lay out the plan that would be exported.
    pub async fn compose(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        target_total: Duration,
        cta_text: Option<&str>,
        run_dir: &Path,
    ) -> Result<CompositionPlan> {
        let scenes = normalize_scenes(scenes)?;
        self.compose_checked(&scenes, brand, target_total, cta_text, &CancelHandle::new(), run_dir)
            .await
    }

    async fn compose_checked(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        target_total: Duration,
        cta_text: Option<&str>,
        cancel: &CancelHandle,
        run_dir: &Path,
    ) -> Result<CompositionPlan> {
        cancel.check("image resolution")?;
        let images = self.resolver.resolve(scenes, brand, run_dir).await;

        cancel.check("composition")?;
        let plan = self.timeline.build(&images, scenes, target_total)?;
        Ok(self.overlays.apply(plan, cta_text))
    }

    async fn run(
        &self,
        scenes: &[SceneSpec],
        brand: &BrandDescriptor,
        target_total: Duration,
        cta_text: Option<&str>,
        cancel: &CancelHandle,
        run_dir: &Arc<TempDir>,
    ) -> Result<VideoArtifact> {
        let plan = self
            .compose_checked(scenes, brand, target_total, cta_text, cancel, run_dir.path())
            .await?;

        cancel.check("export")?;
        let artifact = self.exporter.export(&plan, run_dir).await?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositionError;
    use crate::storage::FsStore;

    fn generator(work: &Path) -> VideoGenerator {
        let config = GeneratorConfig {
            work_dir: work.join("runs"),
            resolution: (64, 36),
            fps: 5,
            ..GeneratorConfig::default()
        };
        VideoGenerator::with_components(
            &config,
            Arc::new(FontBook::builtin()),
            None,
            Arc::new(FfmpegEncoder::new("/definitely/not/ffmpeg")),
            Arc::new(FsStore::new(work.join("out"))),
        )
    }

    #[test]
    fn cancel_handle_is_shared_between_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn invalid_scene_list_fails_before_any_work() {
        let work = tempfile::tempdir().unwrap();
        let scenes = vec![SceneSpec::new(1, "a", ""), SceneSpec::new(3, "c", "")];
        let brand = BrandDescriptor::new("Acme", "retail", "bold");

        let err = generator(work.path())
            .generate(&scenes, &brand, Duration::from_secs(10), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VideoError::Composition(CompositionError::InvalidScenes(_))
        ));
        assert!(!work.path().join("runs").exists());
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_resolution() {
        let work = tempfile::tempdir().unwrap();
        let scenes = vec![SceneSpec::new(1, "a", "")];
        let brand = BrandDescriptor::new("Acme", "retail", "bold");
        let cancel = CancelHandle::new();
        cancel.cancel();

        let err = generator(work.path())
            .generate_with_cancel(&scenes, &brand, Duration::from_secs(4), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::Cancelled { stage: "image resolution" }));
        assert_eq!(std::fs::read_dir(work.path().join("runs")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn encoder_failure_surfaces_as_export_error_and_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        let scenes = vec![SceneSpec::new(1, "Morning", ""), SceneSpec::new(2, "Night", "")];
        let brand = BrandDescriptor::new("Acme", "retail", "bold");

        let err = generator(work.path())
            .generate(&scenes, &brand, Duration::from_secs(4), Some("Buy"))
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::Export(_)), "{}", err);
        assert_eq!(std::fs::read_dir(work.path().join("runs")).unwrap().count(), 0);
    }
}
