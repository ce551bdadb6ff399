pub mod image_client;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{error::Result, models::PromptSpec};

pub use image_client::StableDiffusionClient;

/// Anything that can turn a prompt into image bytes.
///
/// Implementations classify their failures through [`crate::KioskError`] and
/// must give up once `deadline` passes. Dropping the returned future abandons
/// the call.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, spec: &PromptSpec, deadline: Instant) -> Result<Vec<u8>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
