use async_trait::async_trait;
use image::imageops::FilterType;
use std::path::Path;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

use super::{FrameSource, SourceOptions};

/// A still image presented as a one-frame stream.
pub struct ImageFrameSource {
    frame: Option<Frame>,
}

impl ImageFrameSource {
    /// Decode the image up front so an unreadable file fails at open time.
    pub async fn open(path: &Path, options: &SourceOptions) -> MediaResult<Self> {
        let path = path.to_path_buf();
        let (max_w, max_h) = (options.max_width, options.max_height);

        let frame = tokio::task::spawn_blocking(move || -> MediaResult<Frame> {
            let decoded =
                image::open(&path).map_err(|e| MediaError::InvalidImage(e.to_string()))?;
            let resized = if decoded.width() > max_w || decoded.height() > max_h {
                decoded.resize(max_w, max_h, FilterType::Triangle)
            } else {
                decoded
            };
            Ok(Frame::from_image(0, 0.0, resized.to_rgb8()))
        })
        .await
        .map_err(|e| MediaError::internal(format!("image decode task failed: {e}")))??;

        debug!(width = frame.width, height = frame.height, "Decoded still image");
        Ok(Self { frame: Some(frame) })
    }
}

#[async_trait]
impl FrameSource for ImageFrameSource {
    fn total_frames(&self) -> Option<u64> {
        Some(1)
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        Ok(self.frame.take())
    }
}
