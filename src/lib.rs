//! Brand video ad generation.
//!
//! Scenes are turned into still images (synthesized remotely, or drawn locally
//! as placeholders), laid out on a timeline of exactly the requested length,
//! decorated with captions and a call-to-action, encoded to MP4 and published
//! to object storage.

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod scene;
pub mod storage;
pub mod video;

pub use config::GeneratorConfig;
pub use error::{Result, VideoError};
pub use ledger::{ArtifactLedger, LedgerEntry};
pub use scene::{BrandDescriptor, SceneSpec, VideoAdConcept};
pub use video::{CancelHandle, VideoArtifact, VideoGenerator};
