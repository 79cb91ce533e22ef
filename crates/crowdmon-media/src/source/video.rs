use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame::{fit_within, Frame};
use crate::probe::probe_video;
use crate::process::drain_stderr;

use super::{FrameSource, SourceOptions};

/// Video decoded by an FFmpeg child process piping raw RGB24 frames.
pub struct VideoFrameSource {
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frame_rate: f64,
    estimate: Option<u64>,
    next_index: u64,
    finished: bool,
}

impl VideoFrameSource {
    /// Probe the file and start decoding.
    pub async fn open(path: &Path, options: &SourceOptions) -> MediaResult<Self> {
        let info = probe_video(path).await?;
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let (width, height) = fit_within(info.width, info.height, options.max_width, options.max_height);
        let sample_rate = options.sample_fps.filter(|r| *r > 0.0 && *r < info.fps);
        let frame_rate = sample_rate.unwrap_or(info.fps);
        let filter = build_filter(sample_rate, width, height);

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-vf", &filter, "-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            path = %path.display(),
            width,
            height,
            frame_rate,
            "Starting FFmpeg frame decoder"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;

        let stderr_task = child.stderr.take().map(drain_stderr);

        Ok(Self {
            child,
            reader: BufReader::with_capacity(Frame::byte_len(width, height), stdout),
            stderr_task,
            width,
            height,
            frame_rate,
            estimate: info.estimated_frames(sample_rate),
            next_index: 0,
            finished: false,
        })
    }

    /// Reap the decoder and turn a non-zero exit into a decode failure.
    async fn finish(&mut self) -> MediaResult<()> {
        self.finished = true;
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            debug!(frames = self.next_index, "FFmpeg frame decoder finished");
            return Ok(());
        }

        warn!(
            exit_code = ?status.code(),
            frames = self.next_index,
            "FFmpeg frame decoder exited with error"
        );
        Err(MediaError::decode_failed(
            self.next_index,
            format!("decoder exited with {:?}: {}", status.code(), stderr.trim()),
        ))
    }
}

fn build_filter(sample_rate: Option<f64>, width: u32, height: u32) -> String {
    match sample_rate {
        Some(rate) => format!("fps={},scale={}:{}", rate, width, height),
        None => format!("scale={}:{}", width, height),
    }
}

#[async_trait]
impl FrameSource for VideoFrameSource {
    fn total_frames(&self) -> Option<u64> {
        self.estimate
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.frame_rate)
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let frame_len = Frame::byte_len(self.width, self.height);
        let mut pixels = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            let n = self.reader.read(&mut pixels[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.finish().await?;
            return Ok(None);
        }
        if filled < frame_len {
            self.finished = true;
            return Err(MediaError::decode_failed(
                self.next_index,
                format!("truncated frame: {} of {} bytes", filled, frame_len),
            ));
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame::new(
            index,
            index as f64 / self.frame_rate,
            self.width,
            self.height,
            pixels,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        assert_eq!(build_filter(None, 640, 360), "scale=640:360");
        assert_eq!(build_filter(Some(5.0), 640, 360), "fps=5,scale=640:360");
    }

    #[tokio::test]
    async fn test_open_rejects_non_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();

        // Without ffprobe installed this is FfprobeNotFound; with it, a probe failure.
        assert!(VideoFrameSource::open(&path, &SourceOptions::default())
            .await
            .is_err());
    }
}
