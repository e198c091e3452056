//! Generator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::video::export::ExportSettings;
use crate::video::resolver::ResolverSettings;
use crate::video::timeline::{Redistribution, TimelineSettings};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Root for per-run scratch directories
    pub work_dir: PathBuf,
    /// Preferred TTF/OTF for placeholders and overlays
    pub font_path: Option<PathBuf>,
    pub fps: u32,
    pub resolution: (u32, u32),
    /// Even scene shares are floored to a multiple of this
    pub slot_quantum: Duration,
    /// Who inherits the time of a scene that could not be rendered
    pub redistribution: Redistribution,
    pub synthesis_timeout: Duration,
    pub synthesis_max_parallel: usize,
    pub upload_timeout: Duration,
    pub ffmpeg_binary: PathBuf,
    pub x264_preset: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("brand-video"),
            font_path: None,
            fps: 30,
            resolution: (1920, 1080),
            slot_quantum: Duration::from_millis(500),
            redistribution: Redistribution::Following,
            synthesis_timeout: Duration::from_secs(300),
            synthesis_max_parallel: 4,
            upload_timeout: Duration::from_secs(120),
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            x264_preset: "medium".to_string(),
        }
    }
}

impl GeneratorConfig {
    /// Defaults overridden by `VIDEO_*`, `SYNTHESIS_*` and `UPLOAD_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("VIDEO_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            font_path: std::env::var("VIDEO_FONT_PATH").ok().map(PathBuf::from),
            fps: env_or("VIDEO_FPS", defaults.fps),
            resolution: (
                env_or("VIDEO_WIDTH", defaults.resolution.0),
                env_or("VIDEO_HEIGHT", defaults.resolution.1),
            ),
            slot_quantum: Duration::from_millis(env_or(
                "VIDEO_SLOT_QUANTUM_MS",
                defaults.slot_quantum.as_millis() as u64,
            )),
            redistribution: env_or("VIDEO_REDISTRIBUTION", defaults.redistribution),
            synthesis_timeout: Duration::from_secs(env_or(
                "SYNTHESIS_TIMEOUT_SECS",
                defaults.synthesis_timeout.as_secs(),
            )),
            synthesis_max_parallel: env_or("SYNTHESIS_MAX_PARALLEL", defaults.synthesis_max_parallel),
            upload_timeout: Duration::from_secs(env_or(
                "UPLOAD_TIMEOUT_SECS",
                defaults.upload_timeout.as_secs(),
            )),
            ffmpeg_binary: std::env::var("FFMPEG_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_binary),
            x264_preset: std::env::var("VIDEO_X264_PRESET").unwrap_or(defaults.x264_preset),
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            synthesis_timeout: self.synthesis_timeout,
            max_parallel: self.synthesis_max_parallel,
            ..ResolverSettings::default()
        }
    }

    pub fn timeline_settings(&self) -> TimelineSettings {
        TimelineSettings {
            resolution: self.resolution,
            slot_quantum: self.slot_quantum,
            redistribution: self.redistribution,
            ..TimelineSettings::default()
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            fps: self.fps,
            upload_timeout: self.upload_timeout,
            ..ExportSettings::default()
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
