use super::UploadStrategy;
use crate::cdn::CdnUrlResolver;
use crate::models::{ImagePayload, UploadMethod};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(3);
const COPY_TIMEOUT: Duration = Duration::from_secs(90);

/// Flags passed to `rclone copyto`: wide parallelism, large buffers, no
/// destination existence check, a single retry.
pub const COPY_FLAGS: &[&str] = &[
    "--transfers=32",
    "--checkers=32",
    "--no-check-dest",
    "--fast-list",
    "--buffer-size=128M",
    "--use-server-modtime",
    "--stats=0",
    "--timeout=60s",
    "--retries=1",
];

/// Shells out to `rclone` for hosts where the B2 API is unreachable directly.
pub struct RcloneUpload {
    binary: PathBuf,
    remote: String,
    bucket_name: String,
    cdn: CdnUrlResolver,
    temp_dir: Option<PathBuf>,
}

impl RcloneUpload {
    pub fn new(
        binary: impl Into<PathBuf>,
        remote: String,
        bucket_name: String,
        cdn: CdnUrlResolver,
    ) -> Self {
        Self {
            binary: binary.into(),
            remote,
            bucket_name,
            cdn,
            temp_dir: None,
        }
    }

    /// Stage payloads under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn destination(&self, filename: &str) -> String {
        format!("{}:{}/{}", self.remote, self.bucket_name, filename)
    }

    async fn ensure_available(&self) -> Result<()> {
        let output = tokio::time::timeout(
            VERSION_CHECK_TIMEOUT,
            Command::new(&self.binary)
                .arg("version")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Rclone("rclone version check timed out".to_string()))?
        .map_err(|e| Error::Rclone(format!("rclone not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Rclone(format!(
                "rclone not usable (exit {})",
                output.status
            )));
        }
        Ok(())
    }

    /// Write the payload to a uniquely named temp file. The name embeds the
    /// target filename; the random part keeps concurrent invocations apart.
    async fn stage(&self, payload: &ImagePayload) -> Result<NamedTempFile> {
        let suffix = format!("-{}", payload.filename.replace(['/', '\\'], "_"));
        let mut builder = tempfile::Builder::new();
        builder.prefix("b2-upload-").suffix(&suffix);
        let staged = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        tokio::fs::write(staged.path(), &payload.bytes).await?;
        Ok(staged)
    }

    async fn copy(&self, source: &Path, filename: &str) -> Result<()> {
        let output = tokio::time::timeout(
            COPY_TIMEOUT,
            Command::new(&self.binary)
                .arg("copyto")
                .arg(source)
                .arg(self.destination(filename))
                .args(COPY_FLAGS)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Rclone("rclone copyto timed out".to_string()))?
        .map_err(|e| Error::Rclone(format!("failed to run rclone: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Rclone(format!(
                "rclone failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UploadStrategy for RcloneUpload {
    fn method(&self) -> UploadMethod {
        UploadMethod::Rclone
    }

    async fn upload(&self, payload: &ImagePayload) -> Result<String> {
        self.ensure_available().await?;

        // Dropping `staged` removes the file, including when this future is
        // cancelled by the caller's timeout.
        let staged = self.stage(payload).await?;
        debug!(
            "Staged {} at {}",
            payload.filename,
            staged.path().display()
        );

        let result = self.copy(staged.path(), &payload.filename).await;
        if let Err(e) = staged.close() {
            warn!("Failed to remove staged file for {}: {}", payload.filename, e);
        }
        result?;

        Ok(self.cdn.resolve(&payload.filename))
    }

    async fn preflight(&self) -> Result<()> {
        self.ensure_available().await
    }
}
