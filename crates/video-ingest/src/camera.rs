//! OpenCV-backed camera capture.

use std::thread;

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::warn;

use crate::{
    retry::{FailedReads, ReadVerdict},
    types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index},
};

/// Spawns a background thread that owns the capture handle for `uri` and
/// forwards BGR frames resized to `target_size`.
///
/// Empty reads are reported as [`CaptureError::EmptyFrame`] and retried with
/// a growing delay. A file ends at its first failed read; a live source that
/// keeps failing ends with [`CaptureError::Open`]. Any other error ends the
/// thread and disconnects the channel.
pub fn spawn_camera_reader(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(2);
    let uri = uri.to_string();

    thread::Builder::new()
        .name("opencv-capture".into())
        .spawn(move || {
            if let Err(err) = capture_loop(&uri, target_size, &tx) {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(rx)
}

fn capture_loop(
    uri: &str,
    target_size: (u32, u32),
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let mut cap = open_video_capture(uri)?;
    configure_camera(&mut cap, target_size, 30.0);

    let mut frame = Mat::default();
    let mut scratch = Mat::default();
    let (target_w, target_h) = target_size;
    let mut failed_reads = FailedReads::new(SourceKind::from_uri(uri));

    loop {
        let grabbed = cap
            .read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed && !cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
            return Ok(());
        }
        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            match failed_reads.read_failed() {
                ReadVerdict::Retry(delay) => {
                    if tx.send(Err(CaptureError::EmptyFrame)).is_err() {
                        return Ok(());
                    }
                    thread::sleep(delay);
                    continue;
                }
                ReadVerdict::Exhausted => return Ok(()),
                ReadVerdict::GiveUp => {
                    warn!("{uri}: no frame after repeated reads, giving up");
                    return Err(CaptureError::Open {
                        uri: uri.to_string(),
                    });
                }
            }
        }
        failed_reads.frame_read();

        let working = if size.width != target_w as i32 || size.height != target_h as i32 {
            opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: target_w as i32,
                    height: target_h as i32,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &scratch
        } else {
            &frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        let sent = tx.send(Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }));
        if sent.is_err() {
            return Ok(());
        }
    }
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    match VideoCapture::from_file(uri, videoio::CAP_ANY) {
        Ok(cap) => {
            if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                return Ok(cap);
            }
        }
        Err(err) => {
            warn!("failed to open {uri}: {err}");
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32), fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
