use super::UploadStrategy;
use crate::models::{ImagePayload, UploadMethod};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory strategy with call counting, scripted failures and latency.
#[derive(Clone)]
pub struct MockUploadStrategy {
    method: UploadMethod,
    base_url: String,
    failure: Option<String>,
    delay: Option<Duration>,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    content_types: Arc<Mutex<HashMap<String, String>>>,
    upload_count: Arc<Mutex<usize>>,
}

impl MockUploadStrategy {
    pub fn new(method: UploadMethod) -> Self {
        Self {
            method,
            base_url: "https://mock-cdn.example.com".to_string(),
            failure: None,
            delay: None,
            files: Arc::new(Mutex::new(HashMap::new())),
            content_types: Arc::new(Mutex::new(HashMap::new())),
            upload_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Every upload fails with `message`.
    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Sleep before answering, to exercise caller timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }

    pub fn get_content_type(&self, filename: &str) -> Option<String> {
        self.content_types.lock().unwrap().get(filename).cloned()
    }
}

#[async_trait]
impl UploadStrategy for MockUploadStrategy {
    fn method(&self) -> UploadMethod {
        self.method
    }

    async fn upload(&self, payload: &ImagePayload) -> Result<String> {
        *self.upload_count.lock().unwrap() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.failure {
            return Err(Error::Generic(message.clone()));
        }

        self.files
            .lock()
            .unwrap()
            .insert(payload.filename.clone(), payload.bytes.clone());
        self.content_types
            .lock()
            .unwrap()
            .insert(payload.filename.clone(), payload.content_type.clone());
        Ok(format!("{}/{}", self.base_url, payload.filename))
    }

    async fn preflight(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(Error::Generic(message.clone())),
            None => Ok(()),
        }
    }
}
