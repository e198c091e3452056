//! Exporter/Publisher: renders a plan to MP4 and publishes it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::encoder::{EncodeSettings, VideoEncoder};
use super::frame::FrameCompositor;
use super::timeline::CompositionPlan;
use crate::error::{ExportError, StorageError};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

/// A published video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub remote_locator: Url,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub resolution: (u32, u32),
    pub container_format: ContainerFormat,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub fps: u32,
    pub upload_timeout: Duration,
    pub silent_audio: bool,
    pub object_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            upload_timeout: Duration::from_secs(120),
            silent_audio: true,
            object_prefix: "professional_ad".to_string(),
        }
    }
}

pub struct Exporter {
    encoder: Arc<dyn VideoEncoder>,
    store: Arc<dyn ObjectStore>,
    settings: ExportSettings,
}

impl Exporter {
    pub fn new(encoder: Arc<dyn VideoEncoder>, store: Arc<dyn ObjectStore>, settings: ExportSettings) -> Self {
        Self {
            encoder,
            store,
            settings,
        }
    }

    /// Encode `plan` into `run_dir` and upload the result.
    ///
    /// The encoding job keeps its own handle on `run_dir`, so the directory
    /// outlives the job even when this future is dropped mid-export.
    pub async fn export(&self, plan: &CompositionPlan, run_dir: &Arc<TempDir>) -> Result<VideoArtifact, ExportError> {
        if plan.is_empty() {
            return Err(ExportError::EmptyPlan);
        }

        let duration = plan.target_total.min(plan.computed_duration());
        let (width, height) = plan.resolution;
        let encode = EncodeSettings {
            width,
            height,
            fps: self.settings.fps,
            duration,
            silent_audio: self.settings.silent_audio,
        };
        encode.validate()?;

        let format = ContainerFormat::Mp4;
        let object_name = self.object_name(format);
        let out_path = run_dir.path().join(&object_name);

        info!(
            encoder = self.encoder.name(),
            clips = plan.clips.len(),
            duration = duration.as_secs_f64(),
            frames = encode.frame_count(),
            "exporting video"
        );

        let started = Instant::now();
        let encoder = Arc::clone(&self.encoder);
        let job_plan = plan.clone();
        let job_settings = encode.clone();
        let job_path = out_path.clone();
        let job_dir = Arc::clone(run_dir);
        let frames = tokio::task::spawn_blocking(move || {
            let encoded = render_and_encode(encoder.as_ref(), &job_plan, &job_settings, &job_path);
            drop(job_dir);
            encoded
        })
        .await
        .map_err(|e| ExportError::encode(format!("encoding task failed: {}", e)))??;
        info!(frames, elapsed_ms = started.elapsed().as_millis() as u64, "encoding finished");

        let bytes = tokio::fs::read(&out_path).await?;
        let remote_locator = self.publish(&object_name, bytes).await?;

        Ok(VideoArtifact {
            remote_locator,
            duration,
            resolution: plan.resolution,
            container_format: format,
        })
    }

    async fn publish(&self, name: &str, bytes: Vec<u8>) -> Result<Url, ExportError> {
        debug!(key = name, store = self.store.name(), bytes = bytes.len(), "publishing");
        let limit = self.settings.upload_timeout;
        let url = tokio::time::timeout(limit, self.store.put(name, bytes))
            .await
            .map_err(|_| StorageError::Timeout(limit))??;
        info!(key = name, url = %url, "video published");
        Ok(url)
    }

    fn object_name(&self, format: ContainerFormat) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.{}",
            self.settings.object_prefix,
            chrono::Utc::now().timestamp(),
            &id[..8],
            format.extension()
        )
    }
}

/// Blocking: render every frame of `plan` and feed it to `encoder`.
pub fn render_and_encode(
    encoder: &dyn VideoEncoder,
    plan: &CompositionPlan,
    settings: &EncodeSettings,
    out_path: &Path,
) -> Result<u64, ExportError> {
    let compositor = FrameCompositor::new(plan);
    let mut sink = encoder.begin(settings, out_path)?;

    let total = settings.frame_count();
    let report_every = (settings.fps as u64 * 5).max(1);
    for index in 0..total {
        let frame = compositor.render(settings.frame_time(index));
        sink.push(&frame)?;
        if (index + 1) % report_every == 0 {
            debug!(frame = index + 1, total, "encoding progress");
        }
    }
    sink.finish()?;
    Ok(total)
}
