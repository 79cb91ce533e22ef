//! Asset format recognition from content and file name.

use image::ImageFormat;
use std::path::Path;

use crowdmon_models::MediaKind;

/// Accepted still image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Accepted video container extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Recognized asset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetFormat {
    pub kind: MediaKind,
    /// Canonical lowercase extension used when storing the asset
    pub extension: &'static str,
}

impl AssetFormat {
    fn new(kind: MediaKind, extension: &'static str) -> Self {
        Self { kind, extension }
    }

    /// MIME type for serving the asset back.
    pub fn content_type(&self) -> &'static str {
        content_type_for(self.extension)
    }
}

/// MIME type for a known extension, `application/octet-stream` otherwise.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Kind implied by a file extension, if it is an accepted one.
pub fn kind_for_extension(extension: &str) -> Option<MediaKind> {
    let ext = extension.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Recognize an asset from its leading bytes.
///
/// Content decides the kind. The file name only picks between extensions
/// that share a container (jpg/jpeg, mkv/webm). Returns `None` when the
/// content is not an accepted image or video format.
pub fn sniff_asset(bytes: &[u8], filename: Option<&str>) -> Option<AssetFormat> {
    let sniffed = sniff_video(bytes).or_else(|| sniff_image(bytes))?;

    let hinted = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let extension = match (sniffed.extension, hinted.as_deref()) {
        ("jpg", Some("jpeg")) => "jpeg",
        ("mkv", Some("webm")) => "webm",
        ("webm", Some("mkv")) => "mkv",
        (ext, _) => ext,
    };
    Some(AssetFormat::new(sniffed.kind, extension))
}

fn sniff_image(bytes: &[u8]) -> Option<AssetFormat> {
    let ext = match image::guess_format(bytes).ok()? {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Bmp => "bmp",
        ImageFormat::WebP if bytes.len() >= 12 && &bytes[8..12] == b"WEBP" => "webp",
        _ => return None,
    };
    Some(AssetFormat::new(MediaKind::Image, ext))
}

fn sniff_video(bytes: &[u8]) -> Option<AssetFormat> {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let ext = if &bytes[8..12] == b"qt  " { "mov" } else { "mp4" };
        return Some(AssetFormat::new(MediaKind::Video, ext));
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
        return Some(AssetFormat::new(MediaKind::Video, "avi"));
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let head = &bytes[..bytes.len().min(64)];
        let is_webm = head.windows(4).any(|w| w == b"webm");
        let ext = if is_webm { "webm" } else { "mkv" };
        return Some(AssetFormat::new(MediaKind::Video, ext));
    }
    None
}
