//! Placeholder images for cross-origin pictures.
//!
//! Server-side renders never show images, but layout code often waits for
//! them to decode. Cross-origin `.png`, `.jpg`/`.jpeg` and `.gif` requests are
//! answered with a valid 1×1 image of the same format instead of going to the
//! network. Same-origin and `data:` URLs are left to later links.

use bytes::Bytes;

use super::data_url::is_data_url;
use super::{ResourceFuture, ResourceHandler, ResourceLoader, ResourceRequest, ready};

/// 1×1 transparent GIF.
pub const PLACEHOLDER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0xff, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x3b,
];

/// 1×1 grayscale PNG.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0xb5, 0x1c, 0x0c,
    0x02, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64, 0x60, 0x00, 0x00,
    0x00, 0x06, 0x00, 0x02, 0x30, 0x81, 0xd0, 0x2f, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44,
    0xae, 0x42, 0x60, 0x82,
];

/// 1×1 baseline JPEG.
pub const PLACEHOLDER_JPEG: &[u8] = &[
    0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0x4a, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01, 0x00, 0x48,
    0x00, 0x48, 0x00, 0x00, 0xff, 0xdb, 0x00, 0x43, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc2, 0x00, 0x0b, 0x08, 0x00, 0x01,
    0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xff, 0xc4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xda, 0x00, 0x08,
    0x01, 0x01, 0x00, 0x01, 0x3f, 0x10,
];

/// Answers cross-origin image requests with [`PLACEHOLDER_PNG`],
/// [`PLACEHOLDER_JPEG`] or [`PLACEHOLDER_GIF`].
#[derive(Debug, Clone)]
pub struct PlaceholderHandler {
    base_url: String,
}

impl PlaceholderHandler {
    /// Treat URLs under `base_url` as same-origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Placeholder for `url`, if it is a cross-origin image.
    pub fn placeholder_for(&self, url: &str) -> Option<&'static [u8]> {
        if url.starts_with(&self.base_url) || is_data_url(url) {
            return None;
        }
        let path = image_path(url).to_ascii_lowercase();
        if path.ends_with(".png") {
            Some(PLACEHOLDER_PNG)
        } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
            Some(PLACEHOLDER_JPEG)
        } else if path.ends_with(".gif") {
            Some(PLACEHOLDER_GIF)
        } else {
            None
        }
    }
}

/// The path component, without query or fragment.
fn image_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

impl ResourceHandler for PlaceholderHandler {
    fn handle(&self, request: &ResourceRequest, next: &dyn ResourceLoader) -> Option<ResourceFuture> {
        match self.placeholder_for(&request.url) {
            Some(bytes) => {
                log::trace!("Serving placeholder for {}", request.url);
                Some(ready(Bytes::from_static(bytes)))
            }
            None => next.fetch(request),
        }
    }
}
