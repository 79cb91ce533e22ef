use async_trait::async_trait;
use std::collections::VecDeque;

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

use super::FrameSource;

/// Frames held in memory, optionally failing at a given position.
///
/// Useful for replaying pre-decoded frames and for exercising decode
/// failures without a broken file.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: VecDeque<Frame>,
    total: Option<u64>,
    fps: Option<f64>,
    fail_at: Option<(u64, String)>,
    emitted: u64,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let total = Some(frames.len() as u64);
        Self {
            frames: frames.into(),
            total,
            fps: None,
            fail_at: None,
            emitted: 0,
        }
    }

    /// `count` solid frames at `fps`.
    pub fn uniform(count: u64, fps: f64, width: u32, height: u32) -> Self {
        let frames = (0..count)
            .map(|i| Frame::filled(i, i as f64 / fps, width, height, [40, 40, 40]))
            .collect();
        let mut source = Self::new(frames);
        source.fps = Some(fps);
        source
    }

    /// Report a different frame estimate than the real count.
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    /// Return a decode error instead of frame `index`.
    pub fn fail_at(mut self, index: u64, message: impl Into<String>) -> Self {
        self.fail_at = Some((index, message.into()));
        self
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn total_frames(&self) -> Option<u64> {
        self.total
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if let Some((index, message)) = &self.fail_at {
            if *index == self.emitted {
                return Err(MediaError::decode_failed(*index, message.clone()));
            }
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.emitted += 1;
        }
        Ok(frame)
    }
}
