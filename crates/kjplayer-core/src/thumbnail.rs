//! Still-frame extraction for `getThumbnail`

use crate::{Error, MediaSource, Result};
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tracing::debug;

/// JPEG quality used for thumbnails
pub const JPEG_QUALITY: u8 = 80;

/// Produces an encoded still frame of a source at a position
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn frame_at(&self, source: &MediaSource, position_ms: u64) -> Result<Bytes>;
}

/// Encode an RGB frame as JPEG
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(frame)
        .map_err(|e| Error::Thumbnail(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Extracts frames by piping one raw RGB frame out of `ffmpeg`
#[cfg(feature = "ffmpeg-thumbnails")]
#[derive(Debug, Clone)]
pub struct FfmpegThumbnails {
    pub width: u32,
    pub height: u32,
}

#[cfg(feature = "ffmpeg-thumbnails")]
impl Default for FfmpegThumbnails {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
        }
    }
}

#[cfg(feature = "ffmpeg-thumbnails")]
impl FfmpegThumbnails {
    /// Bytes in one rgb24 frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[cfg(feature = "ffmpeg-thumbnails")]
#[async_trait]
impl ThumbnailExtractor for FfmpegThumbnails {
    async fn frame_at(&self, source: &MediaSource, position_ms: u64) -> Result<Bytes> {
        let seek = format!("{:.3}", position_ms as f64 / 1000.0);
        let scale = format!("scale={}:{}", self.width, self.height);
        debug!(uri = %source.uri, position_ms, "Extracting frame with ffmpeg");

        let output = tokio::process::Command::new("ffmpeg")
            .args([
                "-ss", &seek,
                "-i", &source.uri,
                "-vframes", "1",
                "-vf", &scale,
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .kill_on_drop(true)
            .output()
            .await?;

        let expected = self.frame_len();
        if !output.status.success() || output.stdout.len() < expected {
            return Err(Error::Thumbnail(format!(
                "no frame at {}ms in {}",
                position_ms, source.uri
            )));
        }

        let frame = RgbImage::from_raw(self.width, self.height, output.stdout[..expected].to_vec())
            .ok_or_else(|| Error::Thumbnail("incomplete frame data".into()))?;
        encode_jpeg(&frame, JPEG_QUALITY)
    }
}

/// Renders a deterministic gradient frame; used where no decoder is available
#[derive(Debug, Clone, Copy)]
pub struct PatternThumbnails {
    pub width: u32,
    pub height: u32,
}

impl Default for PatternThumbnails {
    fn default() -> Self {
        Self {
            width: 64,
            height: 36,
        }
    }
}

#[async_trait]
impl ThumbnailExtractor for PatternThumbnails {
    async fn frame_at(&self, source: &MediaSource, position_ms: u64) -> Result<Bytes> {
        let shift = (position_ms / 100 % 256) as u8;
        let seed = source.uri.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        let frame = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x as u8).wrapping_mul(4).wrapping_add(shift),
                (y as u8).wrapping_mul(7),
                seed,
            ])
        });
        encode_jpeg(&frame, JPEG_QUALITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_thumbnail_is_jpeg() {
        let thumbs = PatternThumbnails::default();
        let bytes = thumbs
            .frame_at(&MediaSource::from_uri("a.mp4"), 5_000)
            .await
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[cfg(feature = "ffmpeg-thumbnails")]
    #[test]
    fn test_frame_len_does_not_wrap() {
        assert_eq!(FfmpegThumbnails::default().frame_len(), 320 * 180 * 3);
        let huge = FfmpegThumbnails {
            width: 40_000,
            height: 40_000,
        };
        assert_eq!(huge.frame_len(), 4_800_000_000);
    }

    #[test]
    fn test_pattern_thumbnail_is_deterministic() {
        let thumbs = PatternThumbnails::default();
        let source = MediaSource::from_uri("a.mp4");
        let a = tokio_test::block_on(thumbs.frame_at(&source, 1_000)).unwrap();
        let b = tokio_test::block_on(thumbs.frame_at(&source, 1_000)).unwrap();
        assert_eq!(a, b);
    }
}
