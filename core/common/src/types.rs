//! Common types used throughout InvisiLock.

use std::fmt;
use zeroize::Zeroize;

/// What kind of payload a caller is protecting.
///
/// The engine treats every payload as opaque bytes; the kind only decides
/// how callers read input and present output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Arbitrary file contents.
    File,
    /// Image file; must carry a recognized image signature.
    Image,
    /// Text, exchanged as an armored string.
    Text,
}

impl PayloadKind {
    /// Lowercase label used in logs and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::File => "file",
            PayloadKind::Image => "image",
            PayloadKind::Text => "text",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image container formats recognized by their leading signature bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Number of leading bytes [`ImageFormat::sniff`] needs at most.
    pub const SNIFF_LEN: usize = 12;

    /// Identify an image from its first bytes.
    ///
    /// Only the signature is inspected; pixel data is never decoded.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

        if head.starts_with(PNG) {
            Some(ImageFormat::Png)
        } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
            Some(ImageFormat::WebP)
        } else if head.starts_with(b"BM") && head.len() >= 6 {
            Some(ImageFormat::Bmp)
        } else if head.starts_with(b"II*\0") || head.starts_with(b"MM\0*") {
            Some(ImageFormat::Tiff)
        } else {
            None
        }
    }

    /// MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SensitiveBytes {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(
            ImageFormat::sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(ImageFormat::sniff(b"GIF89a\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(
            ImageFormat::sniff(b"RIFF\x24\0\0\0WEBPVP8 "),
            Some(ImageFormat::WebP)
        );
        assert_eq!(ImageFormat::sniff(b"II*\0\x08\0"), Some(ImageFormat::Tiff));
    }

    #[test]
    fn test_sniff_rejects_other_data() {
        assert_eq!(ImageFormat::sniff(b"hello world"), None);
        assert_eq!(ImageFormat::sniff(b""), None);
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WAVE"), None);
    }

    #[test]
    fn test_sensitive_bytes_debug_redacted() {
        let secret = SensitiveBytes::from("hunter2".to_string());
        let shown = format!("{:?}", secret);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("7 bytes"));
    }

    #[test]
    fn test_payload_kind_labels() {
        assert_eq!(PayloadKind::Image.to_string(), "image");
        assert_eq!(PayloadKind::Text.as_str(), "text");
    }
}
