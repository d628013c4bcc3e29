//! Data models and structures
//!
//! Defines the image payloads flowing through the pipeline, the per-attempt and
//! terminal upload results, the B2 API wire types, and process configuration.

use crate::mime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Raw image as received from a caller. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, filename: String, content_type: String) -> Self {
        Self {
            bytes,
            filename,
            content_type,
        }
    }

    /// Build a payload, inferring the content type from magic bytes and then
    /// from the filename extension when none was declared.
    pub fn with_inferred_type(
        bytes: Vec<u8>,
        filename: String,
        content_type: Option<String>,
    ) -> Self {
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| mime::infer_content_type(&bytes, &filename).to_string());
        Self::new(bytes, filename, content_type)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of running the optimizer over a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizedImage {
    /// A new encoding was chosen; content type and filename match it.
    Transformed(ImagePayload),
    /// Nothing was applied; the caller keeps its original payload.
    Unchanged,
}

impl OptimizedImage {
    pub fn is_transformed(&self) -> bool {
        matches!(self, OptimizedImage::Transformed(_))
    }

    /// Resolve to the payload that should be uploaded.
    pub fn or_original(self, original: ImagePayload) -> ImagePayload {
        match self {
            OptimizedImage::Transformed(payload) => payload,
            OptimizedImage::Unchanged => original,
        }
    }
}

/// Identifies the transport that stored an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    DirectB2Api,
    Rclone,
    B2Sdk,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::DirectB2Api => "direct_b2_api",
            UploadMethod::Rclone => "rclone",
            UploadMethod::B2Sdk => "b2sdk",
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strategy invocation. `url` is set iff the attempt succeeded, `error` iff
/// it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAttempt {
    pub method: UploadMethod,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadAttempt {
    pub fn succeeded(method: UploadMethod, url: String) -> Self {
        Self {
            method,
            success: true,
            url: Some(url),
            error: None,
        }
    }

    pub fn failed(method: UploadMethod, error: String) -> Self {
        Self {
            method,
            success: false,
            url: None,
            error: Some(error),
        }
    }
}

/// Terminal value of one pipeline invocation, serialized as the public JSON
/// contract (`{success, url, filename, method}` or `{success, error}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<UploadMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn succeeded(url: String, filename: String, method: UploadMethod) -> Self {
        Self {
            success: true,
            url: Some(url),
            filename: Some(filename),
            method: Some(method),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            filename: None,
            method: None,
            error: Some(error.into()),
        }
    }
}

/// Request shape accepted by `--stdin-json`.
#[derive(Debug, Deserialize)]
pub struct StdinUploadRequest {
    /// Base64-encoded image bytes.
    pub image: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

// B2 native API request/response models
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub api_url: String,
    pub authorization_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadUrlRequest {
    pub bucket_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadUrlResponse {
    pub upload_url: String,
    pub authorization_token: String,
}

// Configuration
pub const DEFAULT_B2_API_URL: &str = "https://api.backblazeb2.com";
const DEFAULT_B2_S3_REGION: &str = "us-west-004";
const DEFAULT_RCLONE_BINARY: &str = "rclone";
const DEFAULT_RCLONE_REMOTE: &str = "b2";
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Static account credentials. Read-only after start-up.
#[derive(Clone)]
pub struct B2Credentials {
    pub key_id: String,
    pub application_key: String,
}

impl fmt::Debug for B2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("B2Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: B2Credentials,
    pub bucket_id: String,
    pub bucket_name: String,
    pub b2_api_url: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub cdn_base_url: String,
    pub rclone_binary: String,
    pub rclone_remote: String,
    pub attempt_timeout: Duration,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup. `from_env` is the production
    /// entry point; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| crate::Error::Config(format!("{} not set", key)))
        };

        let s3_region = lookup("B2_S3_REGION").unwrap_or_else(|| DEFAULT_B2_S3_REGION.to_string());
        let s3_endpoint = lookup("B2_S3_ENDPOINT")
            .unwrap_or_else(|| format!("https://s3.{}.backblazeb2.com", s3_region));

        let attempt_timeout = match lookup("UPLOAD_ATTEMPT_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    crate::Error::Config(format!(
                        "UPLOAD_ATTEMPT_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                        raw
                    ))
                })?;
                if secs == 0 {
                    return Err(crate::Error::Config(
                        "UPLOAD_ATTEMPT_TIMEOUT_SECS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        };

        Ok(Self {
            credentials: B2Credentials {
                key_id: required("B2_KEY_ID")?,
                application_key: required("B2_APPLICATION_KEY")?,
            },
            bucket_id: required("B2_BUCKET_ID")?,
            bucket_name: required("B2_BUCKET_NAME")?,
            b2_api_url: lookup("B2_API_URL")
                .unwrap_or_else(|| DEFAULT_B2_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            s3_endpoint,
            s3_region,
            cdn_base_url: required("CDN_BASE_URL")?,
            rclone_binary: lookup("RCLONE_BINARY")
                .unwrap_or_else(|| DEFAULT_RCLONE_BINARY.to_string()),
            rclone_remote: lookup("RCLONE_REMOTE")
                .unwrap_or_else(|| DEFAULT_RCLONE_REMOTE.to_string()),
            attempt_timeout,
        })
    }
}
