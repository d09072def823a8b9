//! Live engagement detection: capture, classify, smooth, and stream.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: The per-frame tick driving models, smoothing and publishing.
//! - `smoothing`: Majority-vote window over recent labels.
//! - `fps`: Tick-to-tick frame rate.
//! - `shared`: Single-writer cells holding the latest stats and frame.
//! - `publish`: Per-client MJPEG and SSE byte streams.
//! - `server`: Actix Web endpoints.
//! - `annotation` / `encoding`: Overlays and JPEG output.
//! - `telemetry`: Tracing subscribers and Prometheus metrics.

use std::{
    path::Path,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::Receiver;
use ml_core::{ForestClassifier, LandmarkExtractor};
use tracing::{error, info, warn};
use video_ingest::{CaptureError, Frame};

pub use config::{CaptureBackend, EngagementConfig, ServeCliArgs};

use crate::engagement::{
    data::StatsSnapshot,
    pipeline::{FramePipeline, PipelineOutcome},
    server::{ServerState, spawn_preview_server},
    shared::snapshot_cell,
};

mod annotation;
mod config;
mod data;
mod encoding;
mod fps;
mod pipeline;
mod publish;
mod server;
mod shared;
mod smoothing;
mod telemetry;

/// Serve the engagement feeds until the source ends, fails, or Ctrl+C.
pub fn run(config: EngagementConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    telemetry::init_metrics_recorder();
    let serve_span = tracing::info_span!(
        "engagement.serve",
        source = %config.source_uri,
        kind = ?config.source_kind,
        capture = ?config.capture,
        width = config.width,
        height = config.height,
        landmarks = config.landmark_count,
        window = config.window
    );
    let _serve_guard = serve_span.enter();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let classifier = load_classifier(&config.classifier_path, config.landmark_count)?;
    let extractor = build_extractor(&config)?;
    let frames = start_capture(&config)?;

    let (stats_tx, stats_rx) = snapshot_cell(StatsSnapshot::default());
    let (frame_tx, frame_rx) = snapshot_cell(None);
    let server = spawn_preview_server(
        ServerState {
            stats: stats_rx,
            frames: frame_rx,
            stats_period: config.stats_interval,
        },
        &config.bind,
        config.port,
    )
    .context("Failed to start HTTP server")?;
    for addr in server.addrs() {
        info!("Viewer available at http://{addr}/ (video: /video_feed, stats: /stats_feed)");
    }

    let pipeline = FramePipeline::new(
        extractor,
        classifier,
        config.pipeline_settings(),
        stats_tx,
        frame_tx,
    );
    let outcome = pipeline.run(&frames, &shutdown);
    drop(frames);

    info!("Stopping engagement server");
    server.stop();

    match outcome {
        PipelineOutcome::Exhausted => {
            info!("Video source exhausted");
            Ok(())
        }
        PipelineOutcome::Shutdown => Ok(()),
        PipelineOutcome::Failed(err) => {
            error!("Capture failed: {err}");
            Err(err).context("Capture failed")
        }
        PipelineOutcome::Stalled(waited) => {
            error!("No frame received for {:.1}s", waited.as_secs_f64());
            bail!("Video source stalled for {:.1}s", waited.as_secs_f64())
        }
    }
}

/// Print a summary of a classifier export.
pub fn inspect_classifier(path: &Path) -> Result<()> {
    let forest = ForestClassifier::load(path)
        .with_context(|| format!("Failed to load classifier {}", path.display()))?;
    let classes: Vec<String> = forest.classes().iter().map(|c| c.to_string()).collect();
    println!("classifier: {}", path.display());
    println!("classes:    [{}]", classes.join(", "));
    println!(
        "features:   {} ({} landmarks)",
        forest.n_features(),
        forest.n_features() / 3
    );
    println!("trees:      {}", forest.tree_count());
    Ok(())
}

fn load_classifier(path: &Path, landmark_count: usize) -> Result<ForestClassifier> {
    let forest = ForestClassifier::load(path)
        .with_context(|| format!("Failed to load classifier {}", path.display()))?;
    let expected = landmark_count * 3;
    if forest.n_features() != expected {
        bail!(
            "Classifier {} expects {} features but {} landmarks produce {}",
            path.display(),
            forest.n_features(),
            landmark_count,
            expected
        );
    }
    info!(
        "Loaded classifier with {} trees and classes {:?}",
        forest.tree_count(),
        forest.classes()
    );
    Ok(forest)
}

#[cfg(feature = "with-tch")]
fn build_extractor(config: &EngagementConfig) -> Result<Box<dyn LandmarkExtractor>> {
    use ml_core::{face_mesh::FaceMeshExtractor, tch::Device};

    let path = config
        .landmark_model
        .as_ref()
        .context("Missing landmark model. Provide --landmark-model <path>.")?;
    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let extractor = FaceMeshExtractor::new(path, device)
        .with_context(|| format!("Failed to load landmark model {}", path.display()))?
        .with_presence_threshold(config.presence_threshold);
    info!("Landmark model loaded on {:?}", extractor.device());
    Ok(Box::new(extractor))
}

#[cfg(not(feature = "with-tch"))]
fn build_extractor(_config: &EngagementConfig) -> Result<Box<dyn LandmarkExtractor>> {
    bail!("No landmark backend compiled in; rebuild with `--features with-tch`")
}

fn start_capture(config: &EngagementConfig) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let size = (config.width, config.height);
    match config.capture {
        CaptureBackend::Ffmpeg => video_ingest::spawn_ffmpeg_reader(&config.source_uri, size)
            .with_context(|| format!("Failed to start ffmpeg capture for {}", config.source_uri)),
        #[cfg(feature = "opencv")]
        CaptureBackend::Opencv => video_ingest::spawn_camera_reader(&config.source_uri, size)
            .with_context(|| format!("Failed to start OpenCV capture for {}", config.source_uri)),
        #[cfg(not(feature = "opencv"))]
        CaptureBackend::Opencv => {
            bail!("--capture opencv requires building with `--features opencv`")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FOREST: &str = r#"{
        "classes": [0, 1],
        "n_features": 6,
        "trees": [{
            "children_left": [1, -1, -1],
            "children_right": [2, -1, -1],
            "feature": [0, -2, -2],
            "threshold": [0.5, -2.0, -2.0],
            "value": [[1.0, 1.0], [1.0, 0.0], [0.0, 1.0]]
        }]
    }"#;

    fn forest_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FOREST.as_bytes()).unwrap();
        file
    }

    #[test]
    fn classifier_must_match_the_landmark_count() {
        let file = forest_file();
        assert!(load_classifier(file.path(), 2).is_ok());
        let err = load_classifier(file.path(), 468).unwrap_err();
        assert!(err.to_string().contains("expects 6 features"));
    }

    #[test]
    fn inspect_reads_the_export() {
        let file = forest_file();
        assert!(inspect_classifier(file.path()).is_ok());
        assert!(inspect_classifier(Path::new("/nonexistent/forest.json")).is_err());
    }
}
