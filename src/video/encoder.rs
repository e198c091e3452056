use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use image::RgbaImage;
use tracing::{debug, info};

use crate::error::ExportError;

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration: Duration,
    /// Mux a silent stereo AAC track so players always find audio.
    pub silent_audio: bool,
}

impl EncodeSettings {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::settings("width/height must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ExportError::settings(format!(
                "width/height must be even for yuv420p output, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(ExportError::settings("fps must be non-zero"));
        }
        if self.duration.is_zero() {
            return Err(ExportError::settings("duration must be positive"));
        }
        Ok(())
    }

    /// Frames needed to cover `duration`, at least one.
    pub fn frame_count(&self) -> u64 {
        ((self.duration.as_secs_f64() * self.fps as f64).round() as u64).max(1)
    }

    /// Presentation time of frame `index`.
    pub fn frame_time(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps as f64)
    }
}

/// Receives rendered frames in presentation order.
pub trait FrameSink: Send {
    fn push(&mut self, frame: &RgbaImage) -> Result<(), ExportError>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> Result<(), ExportError>;
}

/// Blocking encoder backend; called from a blocking worker thread.
///
/// `out_path`'s parent must already exist. Encoders never create it, so a run
/// directory removed underneath them stays removed.
pub trait VideoEncoder: Send + Sync {
    fn begin(&self, settings: &EncodeSettings, out_path: &Path) -> Result<Box<dyn FrameSink>, ExportError>;

    fn name(&self) -> &'static str;
}

pub fn is_ffmpeg_on_path(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// H.264/AAC MP4 through the system `ffmpeg`, raw RGBA on stdin.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    preset: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            preset: "medium".to_string(),
        }
    }
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    fn arguments(&self, settings: &EncodeSettings, out_path: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            format!("{}x{}", settings.width, settings.height),
            "-r".into(),
            settings.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
        ];

        if settings.silent_audio {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                "anullsrc=channel_layout=stereo:sample_rate=44100".into(),
                "-c:a".into(),
                "aac".into(),
                "-shortest".into(),
            ]);
        } else {
            args.push("-an".into());
        }

        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.preset.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-t".into(),
            format!("{:.3}", settings.duration.as_secs_f64()),
            "-movflags".into(),
            "+faststart".into(),
            out_path.display().to_string(),
        ]);
        args
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn begin(&self, settings: &EncodeSettings, out_path: &Path) -> Result<Box<dyn FrameSink>, ExportError> {
        settings.validate()?;
        if !is_ffmpeg_on_path(&self.binary) {
            return Err(ExportError::encode(format!(
                "'{}' is required for MP4 encoding but was not found",
                self.binary.display()
            )));
        }

        let args = self.arguments(settings, out_path);
        debug!(?args, "spawning ffmpeg");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::encode(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExportError::encode("failed to open ffmpeg stdin"))?;

        info!(
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            out = %out_path.display(),
            "encoding started"
        );
        Ok(Box::new(FfmpegSink {
            width: settings.width,
            height: settings.height,
            child: Some(child),
            stdin: Some(stdin),
        }))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

struct FfmpegSink {
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FrameSink for FfmpegSink {
    fn push(&mut self, frame: &RgbaImage) -> Result<(), ExportError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(ExportError::encode(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExportError::encode("ffmpeg encoder is already finalized"))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| ExportError::encode(format!("failed to write frame to ffmpeg: {}", e)))
    }

    fn finish(mut self: Box<Self>) -> Result<(), ExportError> {
        drop(self.stdin.take());
        let child = self
            .child
            .take()
            .ok_or_else(|| ExportError::encode("ffmpeg encoder is already finalized"))?;
        let output = child
            .wait_with_output()
            .map_err(|e| ExportError::encode(format!("failed to wait for ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::encode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        // Abandoned mid-stream: do not leave ffmpeg running.
        if let Some(mut child) = self.child.take() {
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
