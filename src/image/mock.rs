use super::ImageService;
use crate::models::{ImagePayload, OptimizedImage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Optimizer stand-in: either leaves payloads alone or swaps in a fixed
/// transformation (new extension, content type and bytes).
#[derive(Clone)]
pub struct MockImageOptimizer {
    process_count: Arc<Mutex<usize>>,
    transform: Option<(String, String, Vec<u8>)>,
}

impl MockImageOptimizer {
    pub fn new() -> Self {
        Self {
            process_count: Arc::new(Mutex::new(0)),
            transform: None,
        }
    }

    pub fn with_transform(mut self, extension: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.transform = Some((extension.to_string(), content_type.to_string(), bytes));
        self
    }

    pub fn get_process_count(&self) -> usize {
        *self.process_count.lock().unwrap()
    }
}

impl Default for MockImageOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageService for MockImageOptimizer {
    async fn optimize(&self, payload: &ImagePayload) -> OptimizedImage {
        *self.process_count.lock().unwrap() += 1;

        match &self.transform {
            Some((extension, content_type, bytes)) => OptimizedImage::Transformed(ImagePayload::new(
                bytes.clone(),
                crate::mime::swap_extension(&payload.filename, extension),
                content_type.clone(),
            )),
            None => OptimizedImage::Unchanged,
        }
    }
}
