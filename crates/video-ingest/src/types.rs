use std::process::ExitStatus;

use anyhow::Error;
use thiserror::Error;

/// Raw 8-bit, three-channel frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes a frame of this size must carry.
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source returned an empty frame")]
    EmptyFrame,
    #[error("video source exited with {status}")]
    SourceExited { status: ExitStatus },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] Error),
}

impl CaptureError {
    /// Whether the reader keeps running after reporting this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::EmptyFrame)
    }
}

/// Ingress transport used to source frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local V4L device, given as an index or `/dev/videoN`.
    Device,
    /// Real-time streaming protocol feed.
    Rtsp,
    /// MJPEG over HTTP, e.g. another machine's camera server.
    Http,
    /// Pre-recorded file, replayed at its native rate.
    File,
}

impl SourceKind {
    /// Infer the transport kind from a URI.
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            SourceKind::Http
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

/// Parse a `/dev/videoX` style URI (or a bare index) and return the index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return (index >= 0).then_some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Some(0))]
    #[case("3", Some(3))]
    #[case("/dev/video2", Some(2))]
    #[case("/dev/video", None)]
    #[case("/dev/videox", None)]
    #[case("-1", None)]
    #[case("clip.mp4", None)]
    fn parses_device_indices(#[case] uri: &str, #[case] expected: Option<i32>) {
        assert_eq!(parse_device_index(uri), expected);
    }

    #[rstest]
    #[case("0", SourceKind::Device)]
    #[case("/dev/video1", SourceKind::Device)]
    #[case("rtsp://10.0.0.5/stream", SourceKind::Rtsp)]
    #[case("http://192.168.1.20:5000/feed", SourceKind::Http)]
    #[case("recordings/session.mp4", SourceKind::File)]
    fn infers_source_kind(#[case] uri: &str, #[case] expected: SourceKind) {
        assert_eq!(SourceKind::from_uri(uri), expected);
    }

    #[test]
    fn only_empty_frames_are_transient() {
        assert!(CaptureError::EmptyFrame.is_transient());
        assert!(
            !CaptureError::Open {
                uri: "0".to_string()
            }
            .is_transient()
        );
    }
}
