//! The frame pipeline: one tick per captured frame.
//!
//! Each tick mirrors the frame, extracts landmarks, classifies them, feeds the
//! smoothing window and publishes a fresh stats snapshot plus the annotated
//! JPEG. The pipeline owns both writers, so dropping it closes every client
//! stream.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use image::{RgbImage, imageops};
use ml_core::{Label, LandmarkExtractor, LevelClassifier, ModelError};
use tracing::{debug, info, warn};
use video_ingest::{CaptureError, Frame};

use crate::engagement::{
    annotation::{draw_hud, draw_mesh, frame_to_image},
    data::{FramePacket, Level, StatsSnapshot},
    encoding::encode_jpeg,
    fps::FpsMeter,
    shared::{FrameWriter, StatsWriter},
    smoothing::SmoothingWindow,
};

/// Upper bound on how long the loop blocks before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-run knobs derived from the validated configuration.
#[derive(Clone, Debug)]
pub(crate) struct PipelineSettings {
    pub(crate) landmark_count: usize,
    pub(crate) window: usize,
    pub(crate) jpeg_quality: u8,
    pub(crate) show_mesh: bool,
    pub(crate) show_hud: bool,
    pub(crate) stall_timeout: Duration,
    pub(crate) verbose: bool,
}

/// Why [`FramePipeline::run`] returned.
#[derive(Debug)]
pub(crate) enum PipelineOutcome {
    /// The source closed after delivering its frames.
    Exhausted,
    /// Shutdown was requested.
    Shutdown,
    /// The source reported a permanent error.
    Failed(CaptureError),
    /// No frame arrived within the stall timeout.
    Stalled(Duration),
}

pub(crate) struct FramePipeline<E, C> {
    extractor: E,
    classifier: C,
    settings: PipelineSettings,
    window: SmoothingWindow,
    modus: Option<Label>,
    fps: FpsMeter,
    frame_number: u64,
    stats: StatsWriter,
    frames: FrameWriter,
}

impl<E: LandmarkExtractor, C: LevelClassifier> FramePipeline<E, C> {
    pub(crate) fn new(
        extractor: E,
        classifier: C,
        settings: PipelineSettings,
        stats: StatsWriter,
        frames: FrameWriter,
    ) -> Self {
        Self {
            window: SmoothingWindow::new(settings.window),
            extractor,
            classifier,
            settings,
            modus: None,
            fps: FpsMeter::default(),
            frame_number: 0,
            stats,
            frames,
        }
    }

    /// Consume frames until the source ends, fails, stalls or shutdown is
    /// requested.
    pub(crate) fn run(
        mut self,
        frames: &Receiver<Result<Frame, CaptureError>>,
        shutdown: &AtomicBool,
    ) -> PipelineOutcome {
        let poll = self.settings.stall_timeout.min(POLL_INTERVAL);
        let mut last_frame_at = Instant::now();

        loop {
            if shutdown.load(Ordering::Relaxed) {
                return PipelineOutcome::Shutdown;
            }

            let received = tracing::info_span!("capture.recv").in_scope(|| frames.recv_timeout(poll));
            match received {
                Ok(Ok(frame)) => {
                    if let Err(err) = self.process_frame(frame, Instant::now()) {
                        metrics::counter!("engagement_capture_skipped_total").increment(1);
                        warn!("Skipping malformed frame: {err:#}");
                    }
                    last_frame_at = Instant::now();
                }
                Ok(Err(err)) if err.is_transient() => {
                    metrics::counter!("engagement_capture_skipped_total").increment(1);
                    if self.settings.verbose {
                        warn!("Skipping tick: {err}");
                    }
                }
                Ok(Err(err)) => return PipelineOutcome::Failed(err),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return PipelineOutcome::Exhausted,
            }

            // Empty reads do not count as progress.
            let waited = last_frame_at.elapsed();
            if waited >= self.settings.stall_timeout {
                return PipelineOutcome::Stalled(waited);
            }
        }
    }

    /// Run one tick on `frame`, started at `tick_start`.
    ///
    /// Only a frame whose buffer does not match its dimensions is an error;
    /// model failures degrade the tick to the no-face outcome.
    pub(crate) fn process_frame(
        &mut self,
        frame: Frame,
        tick_start: Instant,
    ) -> anyhow::Result<StatsSnapshot> {
        let mut image = frame_to_image(&frame)?;
        let fps = self.fps.tick(tick_start);
        self.frame_number = self.frame_number.wrapping_add(1);

        let frame_span = tracing::info_span!(
            "frame",
            frame = self.frame_number,
            width = frame.width,
            height = frame.height,
            timestamp = frame.timestamp_ms
        );
        let _frame_guard = frame_span.enter();
        metrics::counter!("engagement_frames_total").increment(1);
        metrics::gauge!("engagement_pipeline_fps").set(fps);

        imageops::flip_horizontal_in_place(&mut image);

        let inference_start = Instant::now();
        let level = match self.classify(&mut image) {
            Ok(Some(label)) => {
                self.window.push(label);
                if let Some(modus) = self.window.modus() {
                    self.modus = Some(modus);
                }
                Level::Detected(label)
            }
            Ok(None) => {
                metrics::counter!("engagement_no_face_total").increment(1);
                Level::NoFace
            }
            Err(err) => {
                metrics::counter!("engagement_model_errors_total").increment(1);
                warn!("Model rejected frame #{}: {err}", self.frame_number);
                Level::NoFace
            }
        };
        metrics::histogram!("engagement_stage_latency_seconds", "stage" => "inference")
            .record(inference_start.elapsed().as_secs_f64());

        let snapshot = StatsSnapshot {
            fps: fps.round() as u32,
            level,
            modus: self.modus,
        };
        self.stats.publish(snapshot);

        if self.settings.verbose {
            info!(
                fps = snapshot.fps,
                level = %snapshot.level_text(),
                modus = %snapshot.modus_text(),
                "tick"
            );
        } else if self.frame_number % 30 == 0 {
            debug!(
                "Heartbeat: frame #{}, {} fps, level {}, modus {}, window {}/{}, readers {}",
                self.frame_number,
                snapshot.fps,
                snapshot.level_text(),
                snapshot.modus_text(),
                self.window.len(),
                self.window.capacity(),
                self.frames.reader_count()
            );
        }

        if self.settings.show_hud {
            draw_hud(&mut image, &snapshot);
        }
        self.publish_frame(&image, frame.timestamp_ms);

        Ok(snapshot)
    }

    fn classify(&mut self, image: &mut RgbImage) -> Result<Option<Label>, ModelError> {
        let Some(landmarks) = self.extractor.extract(image)? else {
            return Ok(None);
        };
        if self.settings.show_mesh {
            draw_mesh(image, &landmarks);
        }
        let features = landmarks.to_feature_vector(self.settings.landmark_count)?;
        self.classifier.classify(&features).map(Some)
    }

    fn publish_frame(&self, image: &RgbImage, timestamp_ms: i64) {
        let encode_start = Instant::now();
        match encode_jpeg(image, self.settings.jpeg_quality) {
            Ok(jpeg) => self.frames.publish(Some(FramePacket {
                jpeg,
                frame_number: self.frame_number,
                timestamp_ms,
            })),
            Err(err) => {
                metrics::counter!("engagement_encode_errors_total").increment(1);
                tracing::error!("Frame #{} not published: {err:#}", self.frame_number);
            }
        }
        metrics::histogram!("engagement_stage_latency_seconds", "stage" => "encoding")
            .record(encode_start.elapsed().as_secs_f64());
    }
}
