//! Annotated output: detection boxes drawn over the source frames.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crowdmon_models::{Detection, DetectionSet, MediaKind};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::process::drain_stderr;

const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const OTHER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

fn color_for(detection: &Detection) -> Rgb<u8> {
    if detection.category.is_person() {
        PERSON_COLOR
    } else if detection.category.is_face() {
        FACE_COLOR
    } else {
        OTHER_COLOR
    }
}

/// Draw every detection in the set onto the image.
pub fn draw_detections(image: &mut RgbImage, detections: &DetectionSet) {
    let (width, height) = image.dimensions();
    for detection in detections.iter() {
        let bbox = detection.bounding_box.clamp_to(width, height);
        let color = color_for(detection);
        for inset in 0..BOX_THICKNESS {
            let x = bbox.x1 as i32 + inset as i32;
            let y = bbox.y1 as i32 + inset as i32;
            let w = (bbox.width() as i64 - 2 * inset as i64).max(1) as u32;
            let h = (bbox.height() as i64 - 2 * inset as i64).max(1) as u32;
            draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
        }
    }
}

/// Output file name for a job's annotated result.
pub fn output_file_name(stem: &str, kind: MediaKind) -> String {
    match kind {
        MediaKind::Image => format!("{stem}_annotated.png"),
        MediaKind::Video => format!("{stem}_annotated.mp4"),
    }
}

/// Writer for a job's annotated result, created before the first frame.
pub enum AnnotatedOutput {
    /// Keeps the latest frame and writes it as PNG on finish.
    Image {
        path: PathBuf,
        last: Option<RgbImage>,
    },
    /// Streams frames into an H.264 encoder.
    Video {
        path: PathBuf,
        frame_rate: f64,
        encoder: Option<VideoEncoder>,
    },
}

impl AnnotatedOutput {
    pub fn new(kind: MediaKind, path: impl Into<PathBuf>, frame_rate: Option<f64>) -> Self {
        let path = path.into();
        match kind {
            MediaKind::Image => AnnotatedOutput::Image { path, last: None },
            MediaKind::Video => AnnotatedOutput::Video {
                path,
                frame_rate: frame_rate.filter(|r| *r > 0.0).unwrap_or(30.0),
                encoder: None,
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            AnnotatedOutput::Image { path, .. } | AnnotatedOutput::Video { path, .. } => path,
        }
    }

    /// Annotate one frame and append it to the output.
    pub async fn write_frame(&mut self, frame: &Frame, detections: &DetectionSet) -> MediaResult<()> {
        let mut image = frame.to_image().ok_or_else(|| {
            MediaError::encode_failed(format!("frame {} has a malformed pixel buffer", frame.index))
        })?;
        draw_detections(&mut image, detections);

        match self {
            AnnotatedOutput::Image { last, .. } => {
                *last = Some(image);
                Ok(())
            }
            AnnotatedOutput::Video {
                path,
                frame_rate,
                encoder,
            } => {
                if encoder.is_none() {
                    *encoder = Some(VideoEncoder::start(path, frame.width, frame.height, *frame_rate)?);
                }
                match encoder {
                    Some(encoder) => encoder.write(&image).await,
                    None => Err(MediaError::internal("video encoder not started")),
                }
            }
        }
    }

    /// Flush the output. Returns `None` if no frame was ever written.
    pub async fn finish(self) -> MediaResult<Option<PathBuf>> {
        match self {
            AnnotatedOutput::Image { path, last } => {
                let Some(image) = last else {
                    return Ok(None);
                };
                let target = path.clone();
                tokio::task::spawn_blocking(move || image.save(&target))
                    .await
                    .map_err(|e| MediaError::internal(format!("image save task failed: {e}")))?
                    .map_err(|e| MediaError::encode_failed(e.to_string()))?;
                debug!(path = %path.display(), "Wrote annotated image");
                Ok(Some(path))
            }
            AnnotatedOutput::Video { path, encoder, .. } => match encoder {
                Some(encoder) => {
                    encoder.finish().await?;
                    debug!(path = %path.display(), "Wrote annotated video");
                    Ok(Some(path))
                }
                None => Ok(None),
            },
        }
    }

    /// Discard the output and any partial file.
    pub async fn abort(self) {
        let path = self.path().to_path_buf();
        if let AnnotatedOutput::Video {
            encoder: Some(encoder),
            ..
        } = self
        {
            encoder.kill().await;
        }
        remove_partial(&path).await;
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}

/// FFmpeg child encoding raw RGB24 frames from stdin.
pub struct VideoEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    path: PathBuf,
    width: u32,
    height: u32,
}

impl VideoEncoder {
    pub fn start(path: &Path, width: u32, height: u32, frame_rate: f64) -> MediaResult<Self> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", width, height),
            "-r",
            &format!("{:.3}", frame_rate),
            "-i",
            "-",
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None))?;
        let stdin = child.stdin.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdin", None, None)
        })?;
        let stderr_task = child.stderr.take().map(drain_stderr);

        debug!(path = %path.display(), width, height, frame_rate, "Started annotated video encoder");
        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task,
            path: path.to_path_buf(),
            width,
            height,
        })
    }

    pub async fn write(&mut self, image: &RgbImage) -> MediaResult<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(MediaError::encode_failed(format!(
                "frame size changed from {}x{} to {}x{}",
                self.width,
                self.height,
                image.width(),
                image.height()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::encode_failed("encoder input already closed"))?;
        stdin
            .write_all(image.as_raw())
            .await
            .map_err(|e| MediaError::encode_failed(format!("encoder pipe closed: {e}")))
    }

    /// Close the input and wait for the encoder to finalize the file.
    pub async fn finish(mut self) -> MediaResult<()> {
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.success() {
            return Ok(());
        }
        remove_partial(&self.path).await;
        Err(MediaError::ffmpeg_failed(
            "annotated video encode failed",
            Some(stderr),
            status.code(),
        ))
    }

    pub async fn kill(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill video encoder");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_models::{BoundingBox, CrowdThresholds};

    fn set_with(detections: Vec<Detection>) -> DetectionSet {
        DetectionSet::assemble(detections, None, &CrowdThresholds::default())
    }

    #[test]
    fn test_draw_detections_colors() {
        let mut image = RgbImage::new(40, 40);
        let set = set_with(vec![
            Detection::person(BoundingBox::new(2.0, 2.0, 20.0, 20.0), 0.9),
            Detection::face(BoundingBox::new(25.0, 25.0, 35.0, 35.0), 0.9),
        ]);
        draw_detections(&mut image, &set);

        assert_eq!(*image.get_pixel(2, 2), PERSON_COLOR);
        assert_eq!(*image.get_pixel(25, 25), FACE_COLOR);
        // Interior untouched.
        assert_eq!(image.get_pixel(10, 10).0, [0, 0, 0]);
    }

    #[test]
    fn test_draw_clamps_out_of_frame_boxes() {
        let mut image = RgbImage::new(10, 10);
        let set = set_with(vec![Detection::person(
            BoundingBox::new(-50.0, -50.0, 500.0, 500.0),
            0.9,
        )]);
        draw_detections(&mut image, &set);
        assert_eq!(*image.get_pixel(0, 0), PERSON_COLOR);
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("job1", MediaKind::Image), "job1_annotated.png");
        assert_eq!(output_file_name("job1", MediaKind::Video), "job1_annotated.mp4");
    }

    #[tokio::test]
    async fn test_image_output_written_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut output = AnnotatedOutput::new(MediaKind::Image, &path, None);

        let frame = Frame::filled(0, 0.0, 16, 16, [9, 9, 9]);
        let set = set_with(vec![Detection::person(BoundingBox::new(1.0, 1.0, 8.0, 8.0), 0.9)]);
        output.write_frame(&frame, &set).await.unwrap();
        assert!(!path.exists());

        let written = output.finish().await.unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));
        let reloaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*reloaded.get_pixel(1, 1), PERSON_COLOR);
    }

    #[tokio::test]
    async fn test_abort_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.png");
        std::fs::write(&path, b"partial").unwrap();

        AnnotatedOutput::new(MediaKind::Image, &path, None).abort().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_finish_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let output = AnnotatedOutput::new(MediaKind::Video, dir.path().join("none.mp4"), Some(25.0));
        assert!(output.finish().await.unwrap().is_none());
    }
}
