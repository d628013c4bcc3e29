//! Pre-upload image optimization
//!
//! Flattens transparency, bounds the longest edge and re-encodes images to
//! minimize transferred bytes before they reach a transport. Optimization is
//! best-effort: implementations never fail, they report `Unchanged`.

pub mod mock;
pub mod processor;

pub use mock::MockImageOptimizer;
pub use processor::{ImageOptimizer, OptimizerSettings};

use crate::models::{ImagePayload, OptimizedImage};
use async_trait::async_trait;

#[async_trait]
pub trait ImageService: Send + Sync {
    async fn optimize(&self, payload: &ImagePayload) -> OptimizedImage;
}
