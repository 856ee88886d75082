//! Image fingerprints used for deduplication
//!
//! A [`Fingerprint`] pairs the SHA-512 of the exact file bytes with a
//! perceptual hash of the decoded picture.

/// DCT perceptual hash
pub mod phash;

use crate::bot::action::PlatformError;
use crate::bot::event::MediaRef;
use crate::bot::telegram::TelegramPlatform;
use async_trait::async_trait;
use image::ImageReader;
use sha2::{Digest, Sha512};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

/// Errors that can occur while fingerprinting media
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The media is not a decodable still image
    #[error("not an image")]
    NotAnImage,
    /// The file could not be fetched
    #[error("fetch error: {0}")]
    Fetch(#[from] PlatformError),
    /// The hashing task died
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Content and perceptual hash of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex SHA-512 of the file bytes
    pub content_hash: String,
    /// 64-bit perceptual hash
    pub perceptual_hash: u64,
    /// File the hashes were computed from
    pub file_id: String,
}

impl Fingerprint {
    /// Hash raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns `FingerprintError::NotAnImage` if the bytes do not decode.
    pub fn from_bytes(file_id: impl Into<String>, bytes: &[u8]) -> Result<Self, FingerprintError> {
        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|_| FingerprintError::NotAnImage)?
            .decode()
            .map_err(|_| FingerprintError::NotAnImage)?;

        Ok(Self {
            content_hash: format!("{:x}", Sha512::digest(bytes)),
            perceptual_hash: phash::perceptual_hash(&img),
            file_id: file_id.into(),
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.content_hash.get(..16).unwrap_or(&self.content_hash);
        write!(f, "Image({short}/{:016x})", self.perceptual_hash)
    }
}

/// Turns a media reference into a fingerprint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FingerprintResolver: Send + Sync {
    /// Fetch and hash the media.
    async fn resolve(&self, media: &MediaRef) -> Result<Fingerprint, FingerprintError>;
}

/// Resolver that downloads files through the Bot API.
pub struct TelegramResolver {
    platform: TelegramPlatform,
}

impl TelegramResolver {
    /// Create a resolver for one account
    #[must_use]
    pub const fn new(platform: TelegramPlatform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl FingerprintResolver for TelegramResolver {
    async fn resolve(&self, media: &MediaRef) -> Result<Fingerprint, FingerprintError> {
        if !media.mime.is_empty() && !media.mime.starts_with("image/") {
            return Err(FingerprintError::NotAnImage);
        }
        let bytes = self.platform.download(&media.file_id).await?;
        let file_id = media.file_id.clone();
        tokio::task::spawn_blocking(move || Fingerprint::from_bytes(file_id, &bytes)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    fn png_bytes(seed: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(64, 48, |x, y| {
            let v = u8::try_from((x * 4 + y * seed) % 256).unwrap_or(0);
            Rgb([v, v / 2, 255 - v])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("png encoding");
        buf.into_inner()
    }

    #[test]
    fn test_from_bytes_hashes_content() -> Result<(), FingerprintError> {
        let bytes = png_bytes(3);
        let fp = Fingerprint::from_bytes("file-1", &bytes)?;

        assert_eq!(fp.content_hash.len(), 128);
        assert!(fp.content_hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.file_id, "file-1");

        let again = Fingerprint::from_bytes("file-2", &bytes)?;
        assert_eq!(fp.content_hash, again.content_hash);
        assert_eq!(fp.perceptual_hash, again.perceptual_hash);
        Ok(())
    }

    #[test]
    fn test_different_bytes_different_content_hash() -> Result<(), FingerprintError> {
        let a = Fingerprint::from_bytes("a", &png_bytes(3))?;
        let b = Fingerprint::from_bytes("b", &png_bytes(7))?;
        assert_ne!(a.content_hash, b.content_hash);
        Ok(())
    }

    #[test]
    fn test_garbage_is_not_an_image() {
        let result = Fingerprint::from_bytes("x", b"definitely not a picture");
        assert!(matches!(result, Err(FingerprintError::NotAnImage)));
    }

    #[test]
    fn test_display_is_short() -> Result<(), FingerprintError> {
        let fp = Fingerprint::from_bytes("a", &png_bytes(3))?;
        let shown = fp.to_string();
        assert!(shown.starts_with("Image("));
        assert!(shown.len() < 48);
        Ok(())
    }
}
