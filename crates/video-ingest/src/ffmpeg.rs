//! FFmpeg subprocess reader.
//!
//! FFmpeg decodes whatever the source is (V4L device, file, RTSP, HTTP MJPEG)
//! and writes packed `rgb24` frames of a fixed size to stdout, which a
//! background thread slices into [`Frame`]s.

use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::types::{CaptureError, Frame, FrameFormat, SourceKind, parse_device_index};

/// Frames buffered between the reader thread and the consumer.
const QUEUE_SIZE: usize = 2;

/// Spawns an FFmpeg process for `uri` and forwards decoded frames over the
/// returned [`Receiver`].
///
/// The channel disconnects once the source is exhausted; a terminal error is
/// sent right before that when the source could not be read at all.
pub fn spawn_ffmpeg_reader(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let kind = SourceKind::from_uri(uri);
    let mut cmd = Command::new("ffmpeg");
    cmd.args(ffmpeg_args(uri, kind, target_size))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    debug!("Spawning ffmpeg for {uri} ({kind:?})");
    let mut child = cmd.spawn().map_err(CaptureError::Io)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    let (tx, rx) = bounded(QUEUE_SIZE);
    let uri = uri.to_string();
    thread::Builder::new()
        .name("ffmpeg-reader".into())
        .spawn(move || {
            if let Err(err) = ffmpeg_loop(stdout, child, &uri, target_size, &tx) {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(rx)
}

/// Build the FFmpeg argument list for a source.
pub(crate) fn ffmpeg_args(uri: &str, kind: SourceKind, target_size: (u32, u32)) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let input = match kind {
        SourceKind::Device => {
            args.extend(["-f", "video4linux2"].map(String::from));
            match parse_device_index(uri) {
                Some(index) => format!("/dev/video{index}"),
                None => uri.to_string(),
            }
        }
        SourceKind::Rtsp => {
            args.extend(
                [
                    "-rtsp_transport",
                    "tcp",
                    "-fflags",
                    "nobuffer",
                    "-flags",
                    "low_delay",
                ]
                .map(String::from),
            );
            uri.to_string()
        }
        SourceKind::Http => {
            args.extend(["-fflags", "nobuffer", "-flags", "low_delay"].map(String::from));
            uri.to_string()
        }
        SourceKind::File => {
            args.push("-re".to_string());
            uri.to_string()
        }
    };

    args.push("-i".to_string());
    args.push(input);
    args.push("-an".to_string());
    args.push("-vf".to_string());
    args.push(format!("scale={}:{}", target_size.0, target_size.1));
    args.extend(["-pix_fmt", "rgb24", "-f", "rawvideo", "-"].map(String::from));
    args
}

enum ReadOutcome {
    EndOfStream { frames: u64 },
    ReceiverClosed,
}

fn ffmpeg_loop(
    stdout: impl Read,
    mut child: Child,
    uri: &str,
    target_size: (u32, u32),
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let outcome = read_frames(stdout, target_size, tx);
    if !matches!(outcome, Ok(ReadOutcome::EndOfStream { .. })) {
        let _ = child.kill();
    }
    let status = child.wait();

    match outcome? {
        ReadOutcome::ReceiverClosed => Ok(()),
        ReadOutcome::EndOfStream { frames } => match status {
            Ok(status) if !status.success() => Err(CaptureError::SourceExited { status }),
            _ if frames == 0 => Err(CaptureError::Open {
                uri: uri.to_string(),
            }),
            _ => Ok(()),
        },
    }
}

/// Slice a raw `rgb24` byte stream into frames until EOF or until the
/// consumer hangs up.
fn read_frames(
    mut stdout: impl Read,
    target_size: (u32, u32),
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<ReadOutcome, CaptureError> {
    let (width, height) = target_size;
    let mut buffer = vec![0u8; Frame::expected_len(width, height)];
    let mut frames: u64 = 0;

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = Frame {
                    data: buffer.clone(),
                    width,
                    height,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    format: FrameFormat::Rgb8,
                };
                if tx.send(Ok(frame)).is_err() {
                    return Ok(ReadOutcome::ReceiverClosed);
                }
                frames += 1;
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Ok(ReadOutcome::EndOfStream { frames });
            }
            Err(err) => return Err(CaptureError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn device_sources_use_v4l_input() {
        let args = ffmpeg_args("0", SourceKind::Device, (640, 480));
        let joined = args.join(" ");
        assert!(joined.contains("-f video4linux2 -i /dev/video0"));
        assert!(joined.contains("scale=640:480"));
        assert!(joined.ends_with("-pix_fmt rgb24 -f rawvideo -"));
    }

    #[test]
    fn rtsp_sources_force_tcp_transport() {
        let args = ffmpeg_args("rtsp://cam/live", SourceKind::Rtsp, (320, 240));
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-i rtsp://cam/live"));
    }

    #[test]
    fn file_sources_replay_in_real_time() {
        let args = ffmpeg_args("clip.mp4", SourceKind::File, (320, 240));
        let re = args.iter().position(|a| a == "-re");
        let input = args.iter().position(|a| a == "-i");
        assert!(re.is_some() && re < input);
    }

    #[test]
    fn slices_stream_into_whole_frames() {
        let (width, height) = (4, 2);
        let frame_len = Frame::expected_len(width, height);
        let mut bytes: Vec<u8> = (0..frame_len * 2).map(|i| i as u8).collect();
        bytes.extend_from_slice(&[0u8; 5]);
        let (tx, rx) = bounded(4);

        let outcome = read_frames(Cursor::new(bytes), (width, height), &tx).unwrap();
        drop(tx);

        assert!(matches!(outcome, ReadOutcome::EndOfStream { frames: 2 }));
        let frames: Vec<Frame> = rx.iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data[0], frame_len as u8);
        assert_eq!(frames[0].format, FrameFormat::Rgb8);
    }

    #[test]
    fn stops_when_consumer_hangs_up() {
        let bytes = vec![0u8; Frame::expected_len(2, 2) * 3];
        let (tx, rx) = bounded(1);
        drop(rx);

        let outcome = read_frames(Cursor::new(bytes), (2, 2), &tx).unwrap();
        assert!(matches!(outcome, ReadOutcome::ReceiverClosed));
    }
}
