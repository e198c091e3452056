use std::time::Duration;

use thiserror::Error;

/// Remote image synthesis failed. Always recovered with a placeholder.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("image synthesis is not configured")]
    Unavailable,

    #[error("image synthesis API error: {0}")]
    Api(String),

    #[error("image synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("synthesized image is not decodable: {0}")]
    InvalidImage(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local drawing failed. Recovered by omitting the overlay or the scene.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("nothing to draw: text is empty")]
    EmptyText,

    #[error("text layout error: {0}")]
    Layout(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The composition plan cannot be built. Fatal.
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("no scenes were supplied")]
    NoScenes,

    #[error("invalid scene list: {0}")]
    InvalidScenes(String),

    #[error("invalid target duration: {0}")]
    InvalidDuration(String),

    #[error("resolved images do not match scenes: {0}")]
    MismatchedImages(String),

    #[error("no clips survived image resolution")]
    NoSurvivingClips,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encoding or publishing failed. Fatal, carries the underlying cause.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("composition plan has no clips to encode")]
    EmptyPlan,

    #[error("invalid encode settings: {0}")]
    Settings(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("publishing failed: {0}")]
    Upload(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ledger line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Terminal error of a generation run.
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("composition failed: {0}")]
    Composition(#[from] CompositionError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("run cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VideoError>;
