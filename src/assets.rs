// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Image asset capture — download, normalize, and encode image resources.
//!
//! An `img` field resolves its element's source URL during the sync
//! extraction phase; this module performs the download and produces up to two
//! encoded representations:
//!
//! - a **normalized** branch: the bytes decoded and re-encoded as PNG;
//! - an **original-format** branch: the unmodified bytes, tagged with a MIME
//!   type from the response header (or sniffed from the bytes).
//!
//! Branch failures are independent: a PNG re-encode failure (an SVG, say)
//! still yields the original branch, and vice versa. A fetch failure drops
//! the whole value for that element and nothing else.

use base64::Engine as _;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::io::Cursor;
use std::time::Duration;

/// An extracted image's encoded representation plus metadata.
///
/// Serializes in the wire shape `{type:"img", name, dataUrl, fileName,
/// extension, sourceUrl, contentType}`; the raw bytes stay in memory for the
/// persistence adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    /// Field name this asset belongs to.
    pub name: String,
    /// Base name for the persisted file, without extension.
    pub file_name: String,
    /// Inferred file extension (no leading dot).
    pub extension: String,
    /// Absolute URL the bytes were fetched from.
    pub source_url: String,
    /// MIME type of `bytes`.
    pub content_type: String,
    /// The encoded image bytes.
    pub bytes: Vec<u8>,
}

impl ImageAsset {
    /// The bytes as a base64 `data:` URL.
    pub fn data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.content_type, encoded)
    }
}

impl Serialize for ImageAsset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ImageAsset", 7)?;
        s.serialize_field("type", "img")?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("dataUrl", &self.data_url())?;
        s.serialize_field("fileName", &self.file_name)?;
        s.serialize_field("extension", &self.extension)?;
        s.serialize_field("sourceUrl", &self.source_url)?;
        s.serialize_field("contentType", &self.content_type)?;
        s.end()
    }
}

/// An image capture deferred from the sync extraction phase.
///
/// Carries everything the async phase needs so no document-tree reference
/// crosses an await point.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAsset {
    /// Absolute source URL, already resolved against the page base.
    pub source_url: String,
    /// Field name (command `name`, else its type label).
    pub name: String,
    /// File name seed (instruction id, else the command name).
    pub file_name: String,
}

/// Build the HTTP client used for image downloads.
///
/// Same UA and redirect policy as the offline document provider.
pub fn image_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(crate::provider::CHROME_UA)
        .build()
        .unwrap_or_default()
}

/// Download a pending asset and produce its surviving branches.
///
/// Returns the original-format asset alone when normalization fails, both
/// branches in `[normalized, original]` order otherwise, and `None` when the
/// fetch itself fails. All failures are logged and non-fatal to the
/// surrounding record.
pub async fn capture(pending: &PendingAsset, client: &reqwest::Client) -> Option<Vec<ImageAsset>> {
    let response = match client.get(&pending.source_url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(url = %pending.source_url, "failed to fetch image: {e}");
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::warn!(
            url = %pending.source_url,
            status = response.status().as_u16(),
            "image fetch returned non-success status"
        );
        return None;
    }

    let header_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(';').next().unwrap_or("").trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let bytes = match response.bytes().await {
        Ok(b) => b.to_vec(),
        Err(e) => {
            tracing::warn!(url = %pending.source_url, "failed to read image body: {e}");
            return None;
        }
    };

    let mut results = Vec::new();

    // Normalized branch: decode and re-encode as PNG in memory.
    if let Some(png) = reencode_png(&bytes) {
        results.push(ImageAsset {
            name: pending.name.clone(),
            file_name: pending.file_name.clone(),
            extension: "png".to_string(),
            source_url: pending.source_url.clone(),
            content_type: "image/png".to_string(),
            bytes: png,
        });
    } else {
        tracing::warn!(url = %pending.source_url, "image could not be normalized to PNG");
    }

    // Original-format branch: pass-through bytes.
    let mime = header_type
        .or_else(|| sniff_mime(&bytes))
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let extension = extension_for_mime(&mime)
        .or_else(|| extension_from_url(&pending.source_url))
        .unwrap_or_else(|| "img".to_string());

    results.push(ImageAsset {
        name: pending.name.clone(),
        file_name: pending.file_name.clone(),
        extension,
        source_url: pending.source_url.clone(),
        content_type: mime,
        bytes,
    });

    Some(results)
}

/// Decode image bytes and re-encode as PNG. `None` when the bytes are not a
/// decodable raster image.
fn reencode_png(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .ok()?;
    Some(buf)
}

/// Guess a MIME type from the leading bytes.
fn sniff_mime(bytes: &[u8]) -> Option<String> {
    let format = image::guess_format(bytes).ok()?;
    Some(format.to_mime_type().to_string())
}

/// MIME → extension table, matching the persistence layer's expectations.
/// Unlisted `image/*` types fall back to the subtype.
fn extension_for_mime(mime: &str) -> Option<String> {
    let mime = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        other => {
            return other.strip_prefix("image/").map(|sub| sub.to_string());
        }
    };
    Some(ext.to_string())
}

/// Trailing dotted suffix of a URL, ignoring query and fragment.
fn extension_from_url(url: &str) -> Option<String> {
    let re = Regex::new(r"\.([A-Za-z0-9]+)(?:[?#].*)?$").expect("extension regex is valid");
    re.captures(url).map(|caps| caps[1].to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(4, 4);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_extension_for_mime_table() {
        assert_eq!(extension_for_mime("image/jpeg").as_deref(), Some("jpg"));
        assert_eq!(extension_for_mime("image/jpg").as_deref(), Some("jpg"));
        assert_eq!(extension_for_mime("image/png").as_deref(), Some("png"));
        assert_eq!(extension_for_mime("image/svg+xml").as_deref(), Some("svg"));
        assert_eq!(extension_for_mime("image/x-icon").as_deref(), Some("ico"));
        assert_eq!(
            extension_for_mime("image/vnd.microsoft.icon").as_deref(),
            Some("ico")
        );
        // charset parameters are stripped
        assert_eq!(
            extension_for_mime("image/png; charset=binary").as_deref(),
            Some("png")
        );
        // unlisted image subtypes fall back to the subtype itself
        assert_eq!(extension_for_mime("image/avif").as_deref(), Some("avif"));
        assert_eq!(extension_for_mime("text/html"), None);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://x.test/a/b/photo.JPG").as_deref(),
            Some("jpg")
        );
        assert_eq!(
            extension_from_url("https://x.test/pic.webp?v=2#frag").as_deref(),
            Some("webp")
        );
        assert_eq!(extension_from_url("https://x.test/no-extension"), None);
    }

    #[test]
    fn test_reencode_png_round_trip() {
        let png = reencode_png(&png_bytes()).expect("png should re-encode");
        let loaded = image::load_from_memory(&png).unwrap();
        assert_eq!(loaded.width(), 4);
        assert!(reencode_png(b"<svg></svg>").is_none());
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&png_bytes()).as_deref(), Some("image/png"));
        assert_eq!(sniff_mime(b"definitely not an image"), None);
    }

    #[test]
    fn test_data_url_shape() {
        let asset = ImageAsset {
            name: "logo".to_string(),
            file_name: "job-1".to_string(),
            extension: "png".to_string(),
            source_url: "https://x.test/logo.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        };
        assert!(asset.data_url().starts_with("data:image/png;base64,"));

        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["type"], "img");
        assert_eq!(json["fileName"], "job-1");
        assert_eq!(json["sourceUrl"], "https://x.test/logo.png");
    }
}
