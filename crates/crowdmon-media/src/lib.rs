//! Media handling for the crowd monitor.
//!
//! This crate provides:
//! - Asset format recognition
//! - Frame sources for still images and FFmpeg-decoded video
//! - Pluggable detection capabilities
//! - Annotated image and video output

pub mod annotate;
pub mod asset;
pub mod detector;
pub mod error;
pub mod frame;
pub mod probe;
mod process;
pub mod source;

pub use annotate::{draw_detections, output_file_name, AnnotatedOutput};
pub use asset::{content_type_for, kind_for_extension, sniff_asset, AssetFormat};
pub use detector::{Detector, DetectorError, DetectorRegistry, ReplayDetector};
pub use error::{MediaError, MediaResult};
pub use frame::{fit_within, Frame};
pub use probe::{probe_video, VideoInfo};
pub use source::{
    FileSourceOpener, FrameSource, ImageFrameSource, MemoryFrameSource, SourceOpener,
    SourceOptions, VideoFrameSource,
};
