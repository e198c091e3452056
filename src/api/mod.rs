mod qwen;

pub use qwen::{QwenClient, QwenConfig};

use async_trait::async_trait;

use crate::error::SynthesisError;

/// Remote text-to-image capability. Treated as unreliable and rate limited.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Returns encoded image bytes (PNG/JPEG/...) for `prompt` at `size`.
    async fn synthesize_image(&self, prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, SynthesisError>;

    fn name(&self) -> &'static str;
}
