//! Image upload pipeline for Backblaze B2 behind a CDN
//!
//! Optimizes an incoming image for delivery, then tries an ordered chain of
//! transports (native B2 API, rclone, S3 SDK) until one stores it, and reports
//! the public CDN URL.

pub mod cdn;
pub mod error;
pub mod image;
pub mod mime;
pub mod models;
pub mod pipeline;
pub mod transport;

pub use error::{Error, Result};
pub use pipeline::{PipelineServices, UploadPipeline};
