//! Optional transform applied to freshly downloaded entries

use crate::refresh::part_path;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub type PostProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Replacement file produced by a post-processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEntry {
    pub path: PathBuf,
    pub mime: String,
}

/// Transform keyed by MIME type.
///
/// Implementations must write their output atomically: the variant path is
/// served directly once it exists.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Where the transformed variant of `path` lives, if this processor
    /// handles `mime`
    fn variant(&self, path: &Path, mime: &str) -> Option<ProcessedEntry>;

    /// Transform `path`. `Ok(None)` means the MIME type was declined.
    async fn process(
        &self,
        path: &Path,
        mime: &str,
    ) -> Result<Option<ProcessedEntry>, PostProcessError>;
}

/// MIME types the image transcoder accepts
const TRANSCODABLE: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/bmp"];

/// Recompresses raster images to lossy WebP
#[derive(Debug, Clone, Copy)]
pub struct ImageTranscoder {
    quality: u8,
}

impl ImageTranscoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

fn encode_webp(source: &Path, quality: u8) -> Result<Vec<u8>, PostProcessError> {
    let image = image::ImageReader::open(source)?
        .with_guessed_format()?
        .decode()?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err("image has no pixels".into());
    }
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), width, height)
        .encode_simple(false, quality as f32)
        .map_err(|e| format!("webp encoding failed: {:?}", e))?;
    Ok(encoded.to_vec())
}

#[async_trait]
impl PostProcessor for ImageTranscoder {
    fn variant(&self, path: &Path, mime: &str) -> Option<ProcessedEntry> {
        if !TRANSCODABLE.contains(&mime) {
            return None;
        }
        let mut name = OsString::from(path.as_os_str());
        name.push(".webp");
        Some(ProcessedEntry {
            path: PathBuf::from(name),
            mime: "image/webp".to_string(),
        })
    }

    async fn process(
        &self,
        path: &Path,
        mime: &str,
    ) -> Result<Option<ProcessedEntry>, PostProcessError> {
        let Some(variant) = self.variant(path, mime) else {
            return Ok(None);
        };

        let source = path.to_path_buf();
        let quality = self.quality;
        let encoded = tokio::task::spawn_blocking(move || encode_webp(&source, quality)).await??;

        let staging = part_path(&variant.path);
        fs::write(&staging, &encoded).await?;
        if let Err(e) = fs::rename(&staging, &variant.path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!(path = ?variant.path, bytes = encoded.len(), "Transcoded image to WebP");
        Ok(Some(variant))
    }
}
