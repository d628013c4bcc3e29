//! Content-type sniffing and filename extension helpers.

pub const IMAGE_JPEG: &str = "image/jpeg";
pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_WEBP: &str = "image/webp";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Identify JPEG, PNG or WEBP data from its leading bytes.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(IMAGE_JPEG),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(IMAGE_PNG),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(IMAGE_WEBP),
        _ => None,
    }
}

/// Map a filename's extension to a content type.
pub fn mime_for_filename(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jfif" => Some(IMAGE_JPEG),
        "png" => Some(IMAGE_PNG),
        "webp" => Some(IMAGE_WEBP),
        _ => None,
    }
}

pub fn infer_content_type(bytes: &[u8], filename: &str) -> &'static str {
    detect_image_mime(bytes)
        .or_else(|| mime_for_filename(filename))
        .unwrap_or_else(|| {
            tracing::warn!(
                "Could not infer content type for {} (first 4 bytes: {:02X?}), using {}",
                filename,
                &bytes[..bytes.len().min(4)],
                OCTET_STREAM
            );
            OCTET_STREAM
        })
}

/// Replace the last extension of `filename` with `extension`, or append it when
/// the name has none. Dots inside directory segments are left alone.
pub fn swap_extension(filename: &str, extension: &str) -> String {
    let stem_start = filename.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = &filename[stem_start..];
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &filename[..stem_start + dot], extension),
        _ => format!("{}.{}", filename, extension),
    }
}

/// Object name for an uploaded file: `<millis>_<stem>.<ext>`, with every
/// non-alphanumeric character of the stem (and extension) replaced by `_`.
pub fn stored_name(original: &str, now_millis: i64) -> String {
    let sanitize = |part: &str| -> String {
        part.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    };
    match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{}_{}.{}", now_millis, sanitize(stem), sanitize(ext))
        }
        _ => format!("{}_{}", now_millis, sanitize(original)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_png() {
        assert_eq!(
            detect_image_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            Some("image/png")
        );
    }

    #[test]
    fn test_detect_jpeg() {
        assert_eq!(detect_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
    }

    #[test]
    fn test_detect_webp() {
        assert_eq!(
            detect_image_mime(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            Some("image/webp")
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_image_mime(&[0x00, 0x01, 0x02, 0x03]), None);
        assert_eq!(detect_image_mime(&[]), None);
    }

    #[test]
    fn test_infer_falls_back_to_extension_then_octet_stream() {
        assert_eq!(infer_content_type(b"????", "photo.JPG"), "image/jpeg");
        assert_eq!(infer_content_type(b"????", "notes.txt"), OCTET_STREAM);
    }

    #[test]
    fn test_swap_extension() {
        assert_eq!(swap_extension("photo.jpg", "webp"), "photo.webp");
        assert_eq!(swap_extension("my.holiday.photo.png", "webp"), "my.holiday.photo.webp");
        assert_eq!(swap_extension("noext", "webp"), "noext.webp");
        assert_eq!(swap_extension("dir.v2/photo", "jpg"), "dir.v2/photo.jpg");
        assert_eq!(swap_extension(".hidden", "png"), ".hidden.png");
    }

    #[test]
    fn test_stored_name_sanitizes_stem() {
        assert_eq!(
            stored_name("Summer trip (1).JPG", 1700000000123),
            "1700000000123_Summer_trip__1_.JPG"
        );
        assert_eq!(stored_name("café-menu.png", 5), "5_caf__menu.png");
    }

    #[test]
    fn test_stored_name_keeps_last_extension() {
        assert_eq!(stored_name("my.holiday.photo.webp", 42), "42_my_holiday_photo.webp");
        assert_eq!(stored_name("noext", 42), "42_noext");
        assert_eq!(stored_name(".hidden", 42), "42__hidden");
    }

    #[test]
    fn test_stored_name_differs_by_timestamp() {
        assert_ne!(stored_name("photo.jpg", 1), stored_name("photo.jpg", 2));
    }
}
