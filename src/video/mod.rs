pub mod encoder;
pub mod export;
pub mod frame;
mod generator;
pub mod overlay;
pub mod resolver;
pub mod text;
pub mod timeline;

pub use encoder::{EncodeSettings, FfmpegEncoder, FrameSink, VideoEncoder};
pub use export::{ContainerFormat, ExportSettings, Exporter, VideoArtifact};
pub use generator::{CancelHandle, VideoGenerator};
pub use overlay::{CaptionOverlay, CtaOverlay, OverlayRenderer, OverlaySettings};
pub use resolver::{ImageResolver, ResolverSettings};
pub use text::FontBook;
pub use timeline::{CompositionPlan, Motion, Redistribution, TimedClip, TimelineCompositor, TimelineSettings};
