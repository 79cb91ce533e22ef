//! Frame sources: lazily decoded, finite, in-order frame streams.

mod memory;
mod still;
mod video;

pub use still::ImageFrameSource;
pub use memory::MemoryFrameSource;
pub use video::VideoFrameSource;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crowdmon_models::MediaKind;

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// A finite sequence of decoded frames.
///
/// Frames come out in strictly increasing index order. `Ok(None)` marks
/// end of stream; an `Err` mid-stream is a decode failure.
#[async_trait]
pub trait FrameSource: Send {
    /// Best current estimate of the frame count.
    fn total_frames(&self) -> Option<u64>;

    /// Frames per second of the emitted stream, if it is timed.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Decode the next frame.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Decoding limits shared by all sources.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Frames larger than this are scaled down
    pub max_width: u32,
    pub max_height: u32,
    /// Sample video at this rate instead of every frame
    pub sample_fps: Option<f64>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            sample_fps: None,
        }
    }
}

/// Opens an asset reference as a frame source.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, asset_ref: &str, kind: MediaKind) -> MediaResult<Box<dyn FrameSource>>;
}

/// Opens files on local disk, resolving relative references against a base directory.
#[derive(Debug, Clone)]
pub struct FileSourceOpener {
    base_dir: Option<PathBuf>,
    options: SourceOptions,
}

impl FileSourceOpener {
    pub fn new(options: SourceOptions) -> Self {
        Self {
            base_dir: None,
            options,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Map an asset reference to a path.
    pub fn resolve(&self, asset_ref: &str) -> MediaResult<PathBuf> {
        if asset_ref.trim().is_empty() {
            return Err(MediaError::FileNotFound(PathBuf::new()));
        }
        let path = Path::new(asset_ref);
        let resolved = match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };
        if !resolved.is_file() {
            return Err(MediaError::FileNotFound(resolved));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, asset_ref: &str, kind: MediaKind) -> MediaResult<Box<dyn FrameSource>> {
        let path = self.resolve(asset_ref)?;
        match kind {
            MediaKind::Image => Ok(Box::new(ImageFrameSource::open(&path, &self.options).await?)),
            MediaKind::Video => Ok(Box::new(VideoFrameSource::open(&path, &self.options).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_against_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();

        let opener = FileSourceOpener::new(SourceOptions::default()).with_base_dir(dir.path());
        assert_eq!(opener.resolve("a.png").unwrap(), dir.path().join("a.png"));
        assert!(matches!(
            opener.resolve("missing.png"),
            Err(MediaError::FileNotFound(_))
        ));
        assert!(opener.resolve("  ").is_err());
    }

    #[tokio::test]
    async fn test_open_missing_file_is_invalid_asset() {
        let opener = FileSourceOpener::new(SourceOptions::default());
        let err = match opener.open("/nonexistent/file.mp4", MediaKind::Video).await {
            Err(e) => e,
            Ok(_) => panic!("expected open to fail"),
        };
        assert!(err.is_invalid_asset());
    }
}
