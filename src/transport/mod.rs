//! Transport strategies for storing objects in the B2 bucket
//!
//! Each strategy is an independent way to get bytes into the bucket with its own
//! latency and availability profile. Strategies keep no mutable state between
//! calls; every upload performs its own authorization, so one instance can serve
//! concurrent invocations.

pub mod b2_api;
pub mod mock;
pub mod rclone;
pub mod s3;

pub use b2_api::B2ApiUpload;
pub use mock::MockUploadStrategy;
pub use rclone::RcloneUpload;
pub use s3::S3SdkUpload;

use crate::models::{ImagePayload, UploadMethod};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait UploadStrategy: Send + Sync {
    fn method(&self) -> UploadMethod;

    /// Store the payload under `payload.filename` and return its public URL.
    async fn upload(&self, payload: &ImagePayload) -> Result<String>;

    /// Start-up reachability check for this transport.
    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}
