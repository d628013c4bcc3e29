use super::UploadStrategy;
use crate::cdn::CdnUrlResolver;
use crate::models::{B2Credentials, ImagePayload, UploadMethod};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Region, RequestChecksumCalculation};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

/// Full client-library session against B2's S3-compatible endpoint.
///
/// Slowest path: the SDK loads a complete configuration for every call. Kept
/// last because it works wherever plain HTTPS does.
pub struct S3SdkUpload {
    credentials: B2Credentials,
    endpoint: String,
    region: String,
    bucket_name: String,
    cdn: CdnUrlResolver,
}

impl S3SdkUpload {
    pub fn new(
        credentials: B2Credentials,
        endpoint: String,
        region: String,
        bucket_name: String,
        cdn: CdnUrlResolver,
    ) -> Self {
        Self {
            credentials,
            endpoint,
            region,
            bucket_name,
            cdn,
        }
    }

    async fn session(&self) -> S3Client {
        let credentials = aws_sdk_s3::config::Credentials::new(
            self.credentials.key_id.clone(),
            self.credentials.application_key.clone(),
            None,
            None,
            "backblaze-b2",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(self.region.clone()))
            .endpoint_url(&self.endpoint)
            .retry_config(RetryConfig::disabled())
            .load()
            .await;

        // Path-style: `<endpoint>/<bucket>/<key>`.
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        S3Client::from_conf(s3_config)
    }
}

#[async_trait]
impl UploadStrategy for S3SdkUpload {
    fn method(&self) -> UploadMethod {
        UploadMethod::B2Sdk
    }

    async fn upload(&self, payload: &ImagePayload) -> Result<String> {
        let client = self.session().await;
        let body = ByteStream::from(payload.bytes.clone());

        client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&payload.filename)
            .body(body)
            .content_type(&payload.content_type)
            .send()
            .await
            .map_err(|e| Error::S3(format!("Failed to upload file: {}", e)))?;

        Ok(self.cdn.resolve(&payload.filename))
    }

    async fn preflight(&self) -> Result<()> {
        self.session()
            .await
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(|e| Error::S3(format!("Bucket {} not reachable: {}", self.bucket_name, e)))?;
        Ok(())
    }
}
