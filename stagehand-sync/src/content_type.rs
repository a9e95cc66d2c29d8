//! MIME inference and cache-control policy for uploaded site files.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Served for files with no or unknown extension (extensionless pretty URLs).
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Infer a content type from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let Some(extension) = extension else {
        return DEFAULT_CONTENT_TYPE;
    };
    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "xml" => "application/xml",
        "rss" => "application/rss+xml",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Browser and shared (CDN) max-age, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub browser_max_age: u64,
    pub shared_max_age: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            browser_max_age: 300,
            shared_max_age: 86_400,
        }
    }
}

impl CachePolicy {
    pub fn header_value(&self) -> String {
        format!(
            "public, max-age={}, s-maxage={}",
            self.browser_max_age, self.shared_max_age
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for("site/css/main.CSS"), "text/css");
        assert_eq!(content_type_for("a/b/logo.svg"), "image/svg+xml");
        assert_eq!(content_type_for("app.js"), "application/javascript");
    }

    #[test]
    fn unknown_or_missing_extension_is_html() {
        assert_eq!(content_type_for("about"), "text/html");
        assert_eq!(content_type_for("blob.xyz"), "text/html");
    }

    #[test]
    fn cache_header_renders_both_ages() {
        let policy = CachePolicy {
            browser_max_age: 60,
            shared_max_age: 3600,
        };
        assert_eq!(policy.header_value(), "public, max-age=60, s-maxage=3600");
    }
}
