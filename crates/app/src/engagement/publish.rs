//! Per-client byte streams for the MJPEG and SSE feeds.
//!
//! Each connection gets its own lazy stream over a reader of the shared
//! cells. Dropping the stream (client gone) cancels it; closing the cell
//! (pipeline gone) ends it.

use std::time::Duration;

use actix_web::web::Bytes;
use async_stream::stream;
use futures::Stream;
use tokio::time::{self, MissedTickBehavior};

use crate::engagement::{
    data::StatsSnapshot,
    shared::{FrameReader, StatsReader},
};

/// Multipart boundary shared by the response header and every part.
pub(crate) const FRAME_BOUNDARY: &str = "frame";

/// One multipart part carrying a single JPEG.
pub(crate) fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 48);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(FRAME_BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Serialise a snapshot as one SSE `data:` event.
pub(crate) fn sse_event(snapshot: &StatsSnapshot) -> Bytes {
    match serde_json::to_string(&snapshot.to_event()) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(err) => Bytes::from(format!("event: error\ndata: {err}\n\n")),
    }
}

/// Emit every new frame as a multipart part, skipping frames the client was
/// too slow to see.
pub(crate) fn mjpeg_stream(
    mut frames: FrameReader,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    stream! {
        if let Some(packet) = frames.latest() {
            yield Ok(multipart_chunk(&packet.jpeg));
        }
        while let Some(packet) = frames.next_frame().await {
            yield Ok(multipart_chunk(&packet.jpeg));
        }
    }
}

/// Emit the current snapshot once per `period`, independent of frame rate.
///
/// The first event is sent as soon as the client subscribes.
pub(crate) fn stats_stream(
    stats: StatsReader,
    period: Duration,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    stream! {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if stats.is_closed() {
                break;
            }
            yield Ok(sse_event(&stats.current()));
        }
    }
}
