//! Public CDN addressing for stored objects
//!
//! Objects land in the B2 bucket but are served through a pull-zone CDN. Every
//! transport derives its reported URL here so the result is identical no matter
//! which strategy performed the write.

/// Maps a stored object name to its public CDN URL. No network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnUrlResolver {
    base_url: String,
}

impl CdnUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<base>/<filename>`, percent-encoding each path segment.
    pub fn resolve(&self, stored_filename: &str) -> String {
        format!("{}/{}", self.base_url, encode_object_name(stored_filename))
    }
}

/// Percent-encode an object name while keeping `/` as a separator. B2 expects
/// the same encoding in the `X-Bz-File-Name` header.
pub fn encode_object_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
