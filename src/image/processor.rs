use super::ImageService;
use crate::mime::{self, IMAGE_JPEG, IMAGE_PNG, IMAGE_WEBP};
use crate::models::{ImagePayload, OptimizedImage};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use tracing::{debug, warn};

pub const MAX_EDGE: u32 = 1920;
pub const WEBP_QUALITY: f32 = 85.0;
/// libwebp's slowest/best compression method.
pub const WEBP_METHOD: i32 = 6;
pub const JPEG_QUALITY: u8 = 92;
pub const CANDIDATE_SIZE_RATIO: f64 = 0.9;
pub const SMALL_ORIGINAL_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub max_edge: u32,
    pub webp_quality: f32,
    pub webp_method: i32,
    pub jpeg_quality: u8,
    /// The WEBP candidate counts as "not meaningfully smaller" above this
    /// fraction of the original size.
    pub candidate_size_ratio: f64,
    /// Originals below this size get a format-specific re-encode attempt.
    pub small_original_bytes: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_edge: MAX_EDGE,
            webp_quality: WEBP_QUALITY,
            webp_method: WEBP_METHOD,
            jpeg_quality: JPEG_QUALITY,
            candidate_size_ratio: CANDIDATE_SIZE_RATIO,
            small_original_bytes: SMALL_ORIGINAL_BYTES,
        }
    }
}

struct Encoded {
    format: ImageFormat,
    bytes: Vec<u8>,
}

pub struct ImageOptimizer {
    settings: OptimizerSettings,
}

impl Default for ImageOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageOptimizer {
    pub fn new() -> Self {
        Self::with_settings(OptimizerSettings::default())
    }

    pub fn with_settings(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Blocking optimization. Any failure degrades to `Unchanged`.
    pub fn optimize_sync(&self, payload: &ImagePayload) -> OptimizedImage {
        match self.try_optimize(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Optimization failed for {}: {}, using original",
                    payload.filename, e
                );
                OptimizedImage::Unchanged
            }
        }
    }

    fn try_optimize(&self, payload: &ImagePayload) -> Result<OptimizedImage> {
        let source_format = match image::guess_format(&payload.bytes) {
            Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => format,
            Ok(other) => {
                debug!("Skipping optimization of {} ({:?})", payload.filename, other);
                return Ok(OptimizedImage::Unchanged);
            }
            Err(_) => {
                debug!("Unrecognized image data in {}", payload.filename);
                return Ok(OptimizedImage::Unchanged);
            }
        };

        let decoded = image::load_from_memory_with_format(&payload.bytes, source_format)?;
        let original_len = payload.len();
        let (width, height) = decoded.dimensions();

        let prepared = bound_longest_edge(flatten_onto_white(decoded), self.settings.max_edge);

        let mut best = Encoded {
            format: ImageFormat::WebP,
            bytes: encode_webp(
                &prepared,
                self.settings.webp_quality,
                self.settings.webp_method,
            )?,
        };

        let candidate_too_big =
            best.bytes.len() as f64 > original_len as f64 * self.settings.candidate_size_ratio;
        if candidate_too_big && original_len < self.settings.small_original_bytes {
            if let Some(reencoded) = self.reencode_original(&prepared, source_format)? {
                debug!(
                    "{}: webp {} bytes vs re-encoded {:?} {} bytes",
                    payload.filename,
                    best.bytes.len(),
                    reencoded.format,
                    reencoded.bytes.len()
                );
                if reencoded.bytes.len() < best.bytes.len() {
                    best = reencoded;
                }
            }
        }

        if best.bytes.len() >= original_len {
            debug!(
                "{}: no encoding beats the original {} bytes",
                payload.filename, original_len
            );
            return Ok(OptimizedImage::Unchanged);
        }

        let (extension, content_type) = match best.format {
            ImageFormat::Jpeg => ("jpg", IMAGE_JPEG),
            ImageFormat::Png => ("png", IMAGE_PNG),
            _ => ("webp", IMAGE_WEBP),
        };
        let filename = if mime::mime_for_filename(&payload.filename) == Some(content_type) {
            payload.filename.clone()
        } else {
            mime::swap_extension(&payload.filename, extension)
        };

        debug!(
            "Optimized {} ({}x{}, {} bytes) -> {} ({} bytes)",
            payload.filename,
            width,
            height,
            original_len,
            filename,
            best.bytes.len()
        );

        Ok(OptimizedImage::Transformed(ImagePayload::new(
            best.bytes,
            filename,
            content_type.to_string(),
        )))
    }

    /// Re-encode in the source's own format: high-quality JPEG or best-effort
    /// lossless PNG. Other formats have no re-encode path.
    fn reencode_original(
        &self,
        image: &DynamicImage,
        source_format: ImageFormat,
    ) -> Result<Option<Encoded>> {
        let mut bytes = Vec::new();
        match source_format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut bytes, self.settings.jpeg_quality);
                image.write_with_encoder(encoder)?;
            }
            ImageFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut bytes,
                    CompressionType::Best,
                    PngFilter::Adaptive,
                );
                image.write_with_encoder(encoder)?;
            }
            _ => return Ok(None),
        }
        Ok(Some(Encoded {
            format: source_format,
            bytes,
        }))
    }
}

/// Composite any alpha channel onto opaque white. 8-bit RGB and grayscale pass
/// through untouched; other layouts are narrowed to 8-bit RGB.
pub fn flatten_onto_white(image: DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
    }

    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut flat = RgbImage::new(width, height);
    for (src, dst) in rgba.pixels().zip(flat.pixels_mut()) {
        let alpha = u32::from(src[3]);
        let blend = |channel: u8| {
            ((u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    DynamicImage::ImageRgb8(flat)
}

/// Scale so the longest edge equals `max_edge`, preserving aspect ratio.
pub fn bound_longest_edge(image: DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_edge {
        return image;
    }

    let scale = f64::from(max_edge) / f64::from(longest);
    let scaled = |edge: u32| ((f64::from(edge) * scale).round() as u32).max(1);
    let (new_width, new_height) = if width >= height {
        (max_edge, scaled(height))
    } else {
        (scaled(width), max_edge)
    };

    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

fn encode_webp(image: &DynamicImage, quality: f32, method: i32) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let rgb = match image {
        DynamicImage::ImageRgb8(rgb) => std::borrow::Cow::Borrowed(rgb),
        other => std::borrow::Cow::Owned(other.to_rgb8()),
    };

    let mut config = webp::WebPConfig::new()
        .map_err(|_| Error::WebP("failed to initialize encoder config".to_string()))?;
    config.quality = quality;
    config.method = method;

    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), width, height)
        .encode_advanced(&config)
        .map_err(|e| Error::WebP(format!("{:?}", e)))?;
    Ok(encoded.to_vec())
}

#[async_trait]
impl ImageService for ImageOptimizer {
    async fn optimize(&self, payload: &ImagePayload) -> OptimizedImage {
        let optimizer = ImageOptimizer::with_settings(self.settings.clone());
        let owned = payload.clone();
        match tokio::task::spawn_blocking(move || optimizer.optimize_sync(&owned)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Optimization task for {} aborted: {}, using original",
                    payload.filename, e
                );
                OptimizedImage::Unchanged
            }
        }
    }
}
