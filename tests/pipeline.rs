use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brand_video::api::ImageSynthesizer;
use brand_video::error::{ExportError, SynthesisError};
use brand_video::storage::FsStore;
use brand_video::video::{EncodeSettings, FontBook, FrameSink, VideoEncoder};
use brand_video::{
    ArtifactLedger, BrandDescriptor, CancelHandle, GeneratorConfig, SceneSpec, VideoError, VideoGenerator,
};
use image::{ImageFormat, Rgba, RgbaImage};

struct SolidSynthesizer {
    calls: AtomicU64,
}

#[async_trait]
impl ImageSynthesizer for SolidSynthesizer {
    async fn synthesize_image(&self, _prompt: &str, _size: (u32, u32)) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(48, 32, Rgba([200, 40, 40, 255]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| SynthesisError::InvalidImage(e.to_string()))?;
        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "solid"
    }
}

struct BrokenSynthesizer;

#[async_trait]
impl ImageSynthesizer for BrokenSynthesizer {
    async fn synthesize_image(&self, _prompt: &str, _size: (u32, u32)) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError::Api("quota exhausted".to_string()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Cancels the run from inside image resolution.
struct CancellingSynthesizer {
    cancel: CancelHandle,
}

#[async_trait]
impl ImageSynthesizer for CancellingSynthesizer {
    async fn synthesize_image(&self, _prompt: &str, _size: (u32, u32)) -> Result<Vec<u8>, SynthesisError> {
        self.cancel.cancel();
        Err(SynthesisError::Api("cancelled".to_string()))
    }

    fn name(&self) -> &'static str {
        "cancelling"
    }
}

#[derive(Default)]
struct RecordingEncoder {
    frames: Arc<AtomicU64>,
    settings: Arc<Mutex<Option<EncodeSettings>>>,
    begun: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    fail_after: Option<u64>,
    start_delay: Duration,
}

struct RecordingSink {
    frames: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    fail_after: Option<u64>,
    path: PathBuf,
    size: (u32, u32),
}

impl VideoEncoder for RecordingEncoder {
    fn begin(&self, settings: &EncodeSettings, out_path: &Path) -> Result<Box<dyn FrameSink>, ExportError> {
        settings.validate()?;
        self.begun.store(true, Ordering::SeqCst);
        std::thread::sleep(self.start_delay);
        *self.settings.lock().unwrap() = Some(settings.clone());
        Ok(Box::new(RecordingSink {
            frames: Arc::clone(&self.frames),
            finished: Arc::clone(&self.finished),
            fail_after: self.fail_after,
            path: out_path.to_path_buf(),
            size: (settings.width, settings.height),
        }))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

impl FrameSink for RecordingSink {
    fn push(&mut self, frame: &RgbaImage) -> Result<(), ExportError> {
        assert_eq!(frame.dimensions(), self.size);
        let seen = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_after.is_some_and(|limit| seen > limit) {
            return Err(ExportError::encode("disk full"));
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), ExportError> {
        let written = std::fs::write(&self.path, b"fake mp4");
        self.finished.store(true, Ordering::SeqCst);
        written?;
        Ok(())
    }
}

struct Harness {
    work: tempfile::TempDir,
    encoder: Arc<RecordingEncoder>,
}

impl Harness {
    fn new(fail_after: Option<u64>) -> Self {
        Self::with_encoder(RecordingEncoder {
            fail_after,
            ..RecordingEncoder::default()
        })
    }

    fn with_encoder(encoder: RecordingEncoder) -> Self {
        Self {
            work: tempfile::tempdir().unwrap(),
            encoder: Arc::new(encoder),
        }
    }

    fn generator(&self, synthesizer: Option<Arc<dyn ImageSynthesizer>>) -> VideoGenerator {
        self.generator_at(synthesizer, (64, 36), 5)
    }

    fn generator_at(
        &self,
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        resolution: (u32, u32),
        fps: u32,
    ) -> VideoGenerator {
        let config = GeneratorConfig {
            work_dir: self.runs_dir(),
            resolution,
            fps,
            ..GeneratorConfig::default()
        };
        VideoGenerator::with_components(
            &config,
            Arc::new(FontBook::builtin()),
            synthesizer,
            self.encoder.clone(),
            Arc::new(FsStore::new(self.published_dir())),
        )
    }

    fn runs_dir(&self) -> PathBuf {
        self.work.path().join("runs")
    }

    fn published_dir(&self) -> PathBuf {
        self.work.path().join("published")
    }

    fn leftover_runs(&self) -> usize {
        std::fs::read_dir(self.runs_dir()).map(|d| d.count()).unwrap_or(0)
    }

    fn begun(&self) -> bool {
        self.encoder.begun.load(Ordering::SeqCst)
    }

    fn finished(&self) -> bool {
        self.encoder.finished.load(Ordering::SeqCst)
    }

    fn frames(&self) -> u64 {
        self.encoder.frames.load(Ordering::SeqCst)
    }

    fn encode_settings(&self) -> Option<EncodeSettings> {
        self.encoder.settings.lock().unwrap().clone()
    }
}

fn scenes() -> Vec<SceneSpec> {
    vec![
        SceneSpec::new(1, "Sunrise over the shop", "storefront, warm light"),
        SceneSpec::new(2, "Barista at work", "espresso machine"),
        SceneSpec::new(3, "Happy customers", "smiles, cups"),
    ]
}

fn brand() -> BrandDescriptor {
    BrandDescriptor::new("Bean There", "coffee", "friendly")
}

#[tokio::test]
async fn three_scenes_twenty_seconds_publishes_full_length_video() {
    let harness = Harness::new(None);
    let synthesizer = Arc::new(SolidSynthesizer { calls: AtomicU64::new(0) });
    let shared: Arc<dyn ImageSynthesizer> = synthesizer.clone();

    let artifact = harness
        .generator(Some(shared))
        .generate(&scenes(), &brand(), Duration::from_secs(20), Some("Visit Today"))
        .await
        .unwrap();

    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(artifact.duration, Duration::from_secs(20));
    assert_eq!(artifact.resolution, (64, 36));
    assert_eq!(harness.frames(), 100);
    assert_eq!(harness.encode_settings().unwrap().duration, Duration::from_secs(20));

    let published = artifact.remote_locator.to_file_path().unwrap();
    assert!(published.starts_with(std::fs::canonicalize(harness.published_dir()).unwrap()));
    assert_eq!(std::fs::read(&published).unwrap(), b"fake mp4");
    assert_eq!(harness.leftover_runs(), 0);
}

#[tokio::test]
async fn default_resolution_plan_matches_published_video() {
    let harness = Harness::new(None);
    let resolution = GeneratorConfig::default().resolution;
    let shared: Arc<dyn ImageSynthesizer> = Arc::new(SolidSynthesizer { calls: AtomicU64::new(0) });
    let generator = harness.generator_at(Some(shared), resolution, 1);
    let target = Duration::from_secs(20);

    let scratch = tempfile::tempdir().unwrap();
    let plan = generator
        .compose(&scenes(), &brand(), target, Some("Visit Today"), scratch.path())
        .await
        .unwrap();
    let lengths: Vec<Duration> = plan.clips.iter().map(|c| c.length).collect();
    assert_eq!(
        lengths,
        vec![Duration::from_millis(6_500), Duration::from_millis(6_500), Duration::from_secs(7)]
    );
    assert_eq!(plan.resolution, (1920, 1080));
    let cta = plan.cta.as_ref().expect("cta");
    assert_eq!(cta.text, "Visit Today");
    assert_eq!((cta.start_offset, cta.end_offset()), (Duration::from_secs(18), target));

    let artifact = generator
        .generate(&scenes(), &brand(), target, Some("Visit Today"))
        .await
        .unwrap();
    assert_eq!(artifact.resolution, (1920, 1080));
    assert_eq!(artifact.duration, target);
    assert_eq!(harness.frames(), 20);
    let encoded = harness.encode_settings().unwrap();
    assert_eq!((encoded.width, encoded.height), (1920, 1080));
    assert_eq!(harness.leftover_runs(), 0);
}

#[tokio::test]
async fn dropped_generation_does_not_leave_a_run_directory() {
    let harness = Harness::with_encoder(RecordingEncoder {
        start_delay: Duration::from_millis(400),
        ..RecordingEncoder::default()
    });

    let generator = harness.generator(None);
    let (scenes, brand) = (scenes(), brand());
    let encoding_started = async {
        while !harness.begun() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    // Abandon the generation as soon as encoding is under way.
    tokio::select! {
        result = generator.generate(&scenes, &brand, Duration::from_secs(2), None) => {
            panic!("generation was not interrupted: ok = {}", result.is_ok())
        }
        _ = encoding_started => {}
    }
    assert!(!harness.finished());

    // The encoding job outlives the dropped future; wait for it to wind down.
    for _ in 0..100 {
        if harness.finished() && harness.leftover_runs() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(harness.finished());
    assert_eq!(harness.leftover_runs(), 0);
    assert!(!harness.published_dir().exists());
}

#[tokio::test]
async fn total_synthesis_failure_still_yields_requested_duration() {
    let harness = Harness::new(None);

    let broken: Arc<dyn ImageSynthesizer> = Arc::new(BrokenSynthesizer);
    let artifact = harness
        .generator(Some(broken))
        .generate(&scenes(), &brand(), Duration::from_secs(7), None)
        .await
        .unwrap();

    assert_eq!(artifact.duration, Duration::from_secs(7));
    assert_eq!(harness.frames(), 35);
    assert_eq!(harness.leftover_runs(), 0);
}

#[tokio::test]
async fn no_synthesizer_uses_placeholders_for_every_scene() {
    let harness = Harness::new(None);

    let artifact = harness
        .generator(None)
        .generate(&scenes(), &brand(), Duration::from_millis(1_500), None)
        .await
        .unwrap();

    assert_eq!(artifact.duration, Duration::from_millis(1_500));
    assert!(harness.frames() > 0);
}

#[tokio::test]
async fn scenes_out_of_order_are_accepted() {
    let harness = Harness::new(None);
    let mut shuffled = scenes();
    shuffled.reverse();

    let artifact = harness
        .generator(None)
        .generate(&shuffled, &brand(), Duration::from_secs(3), None)
        .await
        .unwrap();
    assert_eq!(artifact.duration, Duration::from_secs(3));
}

#[tokio::test]
async fn encoder_failure_removes_run_directory() {
    let harness = Harness::new(Some(3));

    let err = harness
        .generator(None)
        .generate(&scenes(), &brand(), Duration::from_secs(4), None)
        .await
        .unwrap_err();

    match err {
        VideoError::Export(ExportError::Encode(msg)) => assert!(msg.contains("disk full")),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(harness.leftover_runs(), 0);
    assert!(!harness.published_dir().exists());
}

#[tokio::test]
async fn zero_duration_is_a_composition_error() {
    let harness = Harness::new(None);
    let err = harness
        .generator(None)
        .generate(&scenes(), &brand(), Duration::ZERO, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VideoError::Composition(_)), "{}", err);
    assert_eq!(harness.frames(), 0);
    assert_eq!(harness.leftover_runs(), 0);
}

#[tokio::test]
async fn cancellation_during_resolution_stops_before_composition() {
    let harness = Harness::new(None);
    let cancel = CancelHandle::new();
    let synthesizer: Arc<dyn ImageSynthesizer> = Arc::new(CancellingSynthesizer { cancel: cancel.clone() });

    let err = harness
        .generator(Some(synthesizer))
        .generate_with_cancel(&scenes(), &brand(), Duration::from_secs(5), None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, VideoError::Cancelled { stage: "composition" }), "{}", err);
    assert_eq!(harness.frames(), 0);
    assert_eq!(harness.leftover_runs(), 0);
}

#[tokio::test]
async fn published_artifact_can_be_recorded_in_ledger() {
    let harness = Harness::new(None);
    let artifact = harness
        .generator(None)
        .generate(&scenes(), &brand(), Duration::from_secs(2), None)
        .await
        .unwrap();

    let ledger = ArtifactLedger::new(harness.work.path().join("ledger.jsonl"));
    let entry = ledger.append(&brand(), &artifact).await.unwrap();
    let entries = ledger.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry.id);
    assert_eq!(entries[0].artifact, artifact);
}
