//! Frame sources for the engagement pipeline.
//!
//! Every reader owns its capture handle on a background thread and hands
//! frames to the consumer over a small bounded channel. A disconnected
//! channel means the source is exhausted.

#[cfg(feature = "opencv")]
mod camera;
mod ffmpeg;
#[cfg(any(feature = "opencv", test))]
mod retry;
mod types;

#[cfg(feature = "opencv")]
pub use camera::spawn_camera_reader;
pub use ffmpeg::spawn_ffmpeg_reader;
pub use types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index};
