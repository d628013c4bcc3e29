//! Upload orchestration: optimize once, then walk the strategy chain.

use crate::cdn::CdnUrlResolver;
use crate::image::{ImageOptimizer, ImageService};
use crate::models::{Config, ImagePayload, UploadAttempt, UploadMethod, UploadOutcome};
use crate::transport::{b2_api, B2ApiUpload, RcloneUpload, S3SdkUpload, UploadStrategy};
use crate::{Error, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Sequences the optimizer and an ordered list of transports. The first
/// transport to succeed wins; the pipeline keeps no state between runs.
pub struct UploadPipeline {
    optimizer: Box<dyn ImageService>,
    strategies: Vec<Box<dyn UploadStrategy>>,
    attempt_timeout: Duration,
}

/// Injectable service bundle used to construct [`UploadPipeline`] in tests.
pub struct PipelineServices {
    pub optimizer: Box<dyn ImageService>,
    /// Tried in order.
    pub strategies: Vec<Box<dyn UploadStrategy>>,
}

impl UploadPipeline {
    pub fn with_services(services: PipelineServices, attempt_timeout: Duration) -> Self {
        Self {
            optimizer: services.optimizer,
            strategies: services.strategies,
            attempt_timeout,
        }
    }

    /// Production chain: direct B2 API, then rclone, then the S3 SDK.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cdn = CdnUrlResolver::new(config.cdn_base_url.clone());
        let http_client = b2_api::client_with_timeout(config.attempt_timeout)?;

        let strategies: Vec<Box<dyn UploadStrategy>> = vec![
            Box::new(
                B2ApiUpload::new_with_client(
                    config.credentials.clone(),
                    config.bucket_id.clone(),
                    cdn.clone(),
                    http_client,
                )
                .with_api_url(config.b2_api_url.clone()),
            ),
            Box::new(RcloneUpload::new(
                config.rclone_binary.clone(),
                config.rclone_remote.clone(),
                config.bucket_name.clone(),
                cdn.clone(),
            )),
            Box::new(S3SdkUpload::new(
                config.credentials.clone(),
                config.s3_endpoint.clone(),
                config.s3_region.clone(),
                config.bucket_name.clone(),
                cdn,
            )),
        ];

        info!(
            "Upload chain: {}",
            strategies
                .iter()
                .map(|s| s.method().as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(Self::with_services(
            PipelineServices {
                optimizer: Box::new(ImageOptimizer::new()),
                strategies,
            },
            config.attempt_timeout,
        ))
    }

    pub fn methods(&self) -> Vec<UploadMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// One-off start-up check. Succeeds when at least one transport is usable;
    /// otherwise the pipeline cannot deliver anything and the error lists why.
    pub async fn preflight(&self) -> Result<()> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            let method = strategy.method();
            match tokio::time::timeout(self.attempt_timeout, strategy.preflight()).await {
                Ok(Ok(())) => {
                    info!("Preflight passed for {}", method);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Preflight failed for {}: {}", method, e);
                    failures.push(format!("{}: {}", method, e));
                }
                Err(_) => {
                    warn!("Preflight timed out for {}", method);
                    failures.push(format!("{}: timed out", method));
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::Config("No upload methods configured".to_string()));
        }
        Err(Error::Config(format!(
            "No upload method is usable ({})",
            failures.join("; ")
        )))
    }

    /// Optimize and upload one image. Always resolves to an outcome.
    pub async fn run(&self, payload: ImagePayload) -> UploadOutcome {
        self.run_with_attempts(payload).await.0
    }

    /// Like [`run`](Self::run), also returning every attempt in order.
    pub async fn run_with_attempts(
        &self,
        payload: ImagePayload,
    ) -> (UploadOutcome, Vec<UploadAttempt>) {
        let original_name = payload.filename.clone();
        let original_len = payload.len();

        let optimized = self.optimizer.optimize(&payload).await;
        let payload = if optimized.is_transformed() {
            let upload = optimized.or_original(payload);
            info!(
                "[{}] Optimized to {} ({} -> {} bytes)",
                original_name,
                upload.filename,
                original_len,
                upload.len()
            );
            upload
        } else {
            info!("[{}] Uploading original ({} bytes)", original_name, original_len);
            payload
        };

        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let attempt = self.attempt(strategy.as_ref(), &payload).await;
            let succeeded = attempt.url.clone();
            attempts.push(attempt);

            if let Some(url) = succeeded {
                info!(
                    "[{}] Uploaded via {}: {}",
                    payload.filename,
                    strategy.method(),
                    url
                );
                return (
                    UploadOutcome::succeeded(url, payload.filename, strategy.method()),
                    attempts,
                );
            }
        }

        let error = attempts
            .last()
            .and_then(|a| a.error.clone())
            .unwrap_or_else(|| "No upload methods configured".to_string());
        warn!(
            "[{}] All {} upload methods failed; last error: {}",
            payload.filename,
            attempts.len(),
            error
        );
        (UploadOutcome::failed(error), attempts)
    }

    async fn attempt(
        &self,
        strategy: &dyn UploadStrategy,
        payload: &ImagePayload,
    ) -> UploadAttempt {
        let method = strategy.method();
        match tokio::time::timeout(self.attempt_timeout, strategy.upload(payload)).await {
            Ok(Ok(url)) => UploadAttempt::succeeded(method, url),
            Ok(Err(e)) => {
                warn!("[{}] {} failed: {}", payload.filename, method, e);
                UploadAttempt::failed(method, e.to_string())
            }
            Err(_) => {
                let e = Error::Timeout(format!(
                    "{} did not finish within {}s",
                    method,
                    self.attempt_timeout.as_secs_f32()
                ));
                warn!("[{}] {}", payload.filename, e);
                UploadAttempt::failed(method, e.to_string())
            }
        }
    }
}
