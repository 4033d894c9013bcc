//! Upload policy: what is accepted and how stored files are named.
//!
//! Everything here is pure; the handler feeds it the declared metadata and the streamed byte
//! counts, and the storage layer only ever sees names produced by [`stored_file_name`].

use crate::config::UploadConfig;
use crate::errors::{Error, Result};
use uuid::Uuid;

/// Longest extension carried over from a client filename.
const MAX_EXTENSION_LEN: usize = 16;

/// Bytes needed to recognise any of the supported image signatures.
pub const SNIFF_LEN: usize = 8;

/// Image families recognised by content sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
}

impl ImageFormat {
    /// Family a declared MIME essence belongs to, if it is one we can sniff.
    pub fn from_mime(essence: &str) -> Option<Self> {
        match essence {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    /// Detect the format from the leading bytes of a file.
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else {
            None
        }
    }
}

/// The checks applied to every upload, built once from [`UploadConfig`].
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_types: Vec<String>,
    max_file_size: u64,
    sniff_content: bool,
}

impl UploadPolicy {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            allowed_types: config.allowed_types.iter().map(|t| t.trim().to_ascii_lowercase()).collect(),
            max_file_size: config.max_file_size,
            sniff_content: config.sniff_content,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check the client-declared MIME type against the allow list.
    ///
    /// Only the essence is compared (`image/png; name=x` matches `image/png`), case-insensitively.
    /// This trusts the client; see [`UploadPolicy::check_content`] for the optional sniffing pass.
    pub fn check_declared_type(&self, declared: &str) -> Result<Option<ImageFormat>> {
        let essence = mime_essence(declared);
        if essence.is_empty() || !self.allowed_types.iter().any(|allowed| *allowed == essence) {
            return Err(Error::InvalidFileType {
                declared: declared.to_string(),
            });
        }
        Ok(ImageFormat::from_mime(&essence))
    }

    /// Fail once the running total of streamed bytes passes the limit.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                limit_bytes: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Compare the leading bytes with the declared family when sniffing is enabled.
    ///
    /// Declared types outside the families we know how to sniff are let through unchanged.
    pub fn check_content(&self, declared: Option<ImageFormat>, head: &[u8]) -> Result<()> {
        let Some(expected) = declared.filter(|_| self.sniff_content) else {
            return Ok(());
        };

        match ImageFormat::from_magic(head) {
            Some(found) if found == expected => Ok(()),
            found => Err(Error::InvalidFileType {
                declared: format!("{expected:?} (content looks like {found:?})"),
            }),
        }
    }
}

/// Lowercased `type/subtype` with parameters stripped.
fn mime_essence(declared: &str) -> String {
    declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extension of a client-supplied filename, if it is safe to reuse.
///
/// Only the final path component is considered, so `a.jpg/../../b` yields nothing and
/// `..\\evil.png` yields `png`. The extension keeps the client's case and must be ASCII
/// alphanumeric; anything else is dropped rather than sanitised.
pub fn extension_of(file_name: &str) -> Option<&str> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (_, extension) = base.rsplit_once('.')?;

    if extension.is_empty() || extension.len() > MAX_EXTENSION_LEN || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(extension)
}

/// Fresh, practically unique name for a stored file.
pub fn stored_file_name(extension: Option<&str>) -> String {
    let id = Uuid::new_v4().simple();
    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}
