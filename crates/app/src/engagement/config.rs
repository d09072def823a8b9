//! Configuration for the `serve` command.
//!
//! Translates CLI arguments into an `EngagementConfig` which the pipeline,
//! server and telemetry consume without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use video_ingest::SourceKind;

use crate::engagement::pipeline::PipelineSettings;

/// Frame source implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CaptureBackend {
    /// ffmpeg subprocess decoding to raw RGB.
    #[default]
    Ffmpeg,
    /// OpenCV `VideoCapture` (requires the `opencv` feature).
    Opencv,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
/// Validated configuration shared by every stage.
pub struct EngagementConfig {
    /// Camera URI, device index, or file path.
    pub source_uri: String,
    /// Transport inferred from `source_uri`.
    pub source_kind: SourceKind,
    pub capture: CaptureBackend,
    /// TorchScript face-mesh model.
    pub landmark_model: Option<PathBuf>,
    /// Face-presence probability below which a frame has no face.
    pub presence_threshold: f64,
    /// JSON forest export.
    pub classifier_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Landmarks per face; the feature vector has three times as many values.
    pub landmark_count: usize,
    /// Smoothing window capacity in ticks.
    pub window: usize,
    pub stats_interval: Duration,
    pub jpeg_quality: u8,
    pub bind: String,
    pub port: u16,
    pub show_mesh: bool,
    pub show_hud: bool,
    /// Give up when no frame arrives for this long.
    pub stall_timeout: Duration,
    /// Force CPU inference.
    pub use_cpu: bool,
    /// Log every tick.
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeCliArgs {
    /// Camera device index, device path, file, or rtsp/http URI.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// TorchScript face-mesh model.
    #[arg(long = "landmark-model", value_name = "PATH")]
    pub landmark_model: Option<PathBuf>,
    /// Face-presence probability below which a frame counts as having no face.
    #[arg(long = "presence-threshold", value_name = "P", default_value_t = 0.5)]
    pub presence_threshold: f64,
    /// Random-forest classifier exported as JSON.
    #[arg(long = "classifier", value_name = "PATH")]
    pub classifier: PathBuf,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Landmarks produced per face.
    #[arg(long = "landmarks", value_name = "N", default_value_t = 468)]
    pub landmarks: usize,
    /// Smoothing window length in ticks.
    #[arg(long = "window", value_name = "N", default_value_t = 150)]
    pub window: usize,
    /// Period of the stats feed.
    #[arg(long = "stats-interval-ms", value_name = "MS", default_value_t = 200)]
    pub stats_interval_ms: u64,
    /// JPEG quality used by the encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: u8,
    /// Address the HTTP server binds to.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: String,
    /// HTTP port.
    #[arg(long = "port", value_name = "PORT", default_value_t = 5000)]
    pub port: u16,
    /// Do not draw the landmark mesh.
    #[arg(long = "no-mesh", action = clap::ArgAction::SetTrue)]
    pub no_mesh: bool,
    /// Draw fps/level/modus onto the video.
    #[arg(long = "hud", action = clap::ArgAction::SetTrue)]
    pub hud: bool,
    /// Frame source implementation.
    #[arg(long = "capture", value_enum, default_value_t = CaptureBackend::Ffmpeg)]
    pub capture: CaptureBackend,
    /// Stop when no frame arrives for this long.
    #[arg(long = "stall-timeout-ms", value_name = "MS", default_value_t = 5000)]
    pub stall_timeout_ms: u64,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Log every tick.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ServeCliArgs> for EngagementConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeCliArgs) -> Result<Self> {
        if args.source.trim().is_empty() {
            bail!("--source must not be empty");
        }
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.landmarks == 0 {
            bail!("--landmarks must be at least 1");
        }
        if args.window == 0 {
            bail!("--window must be at least 1");
        }
        if args.stats_interval_ms == 0 {
            bail!("--stats-interval-ms must be at least 1");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if !(0.0..=1.0).contains(&args.presence_threshold) {
            bail!("--presence-threshold must be between 0 and 1");
        }
        if args.stall_timeout_ms == 0 {
            bail!("--stall-timeout-ms must be at least 1");
        }

        let source_kind = SourceKind::from_uri(&args.source);

        Ok(Self {
            source_uri: args.source,
            source_kind,
            capture: args.capture,
            landmark_model: args.landmark_model,
            presence_threshold: args.presence_threshold,
            classifier_path: args.classifier,
            width: args.width,
            height: args.height,
            landmark_count: args.landmarks,
            window: args.window,
            stats_interval: Duration::from_millis(args.stats_interval_ms),
            jpeg_quality: args.jpeg_quality,
            bind: args.bind,
            port: args.port,
            show_mesh: !args.no_mesh,
            show_hud: args.hud,
            stall_timeout: Duration::from_millis(args.stall_timeout_ms),
            use_cpu: args.use_cpu,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

impl EngagementConfig {
    pub(crate) fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            landmark_count: self.landmark_count,
            window: self.window,
            jpeg_quality: self.jpeg_quality,
            show_mesh: self.show_mesh,
            show_hud: self.show_hud,
            stall_timeout: self.stall_timeout,
            verbose: self.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ServeCliArgs,
    }

    fn parse(extra: &[&str]) -> Result<EngagementConfig> {
        let argv = ["engagement", "--classifier", "forest.json"]
            .into_iter()
            .chain(extra.iter().copied());
        let harness = Harness::try_parse_from(argv)?;
        EngagementConfig::try_from(harness.args)
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.source_uri, "0");
        assert_eq!(config.source_kind, SourceKind::Device);
        assert_eq!(config.capture, CaptureBackend::Ffmpeg);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.landmark_count, 468);
        assert_eq!(config.window, 150);
        assert_eq!(config.stats_interval, Duration::from_millis(200));
        assert_eq!(config.jpeg_quality, 85);
        assert_eq!((config.bind.as_str(), config.port), ("0.0.0.0", 5000));
        assert!(config.show_mesh);
        assert!(!config.show_hud);
        assert_eq!(config.stall_timeout, Duration::from_secs(5));
        assert!(config.landmark_model.is_none());
        assert_eq!(config.presence_threshold, 0.5);
        assert!(config.telemetry.chrome_trace_path.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--source",
            "rtsp://cam/stream",
            "--capture",
            "opencv",
            "--no-mesh",
            "--hud",
            "--window",
            "30",
            "--port",
            "8080",
            "--chrome-trace",
            "trace.json",
        ])
        .unwrap();
        assert_eq!(config.source_kind, SourceKind::Rtsp);
        assert_eq!(config.capture, CaptureBackend::Opencv);
        assert!(!config.show_mesh);
        assert!(config.show_hud);
        assert_eq!(config.pipeline_settings().window, 30);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.telemetry.chrome_trace_path,
            Some(PathBuf::from("trace.json"))
        );
    }

    #[rstest]
    #[case(&["--width", "0"])]
    #[case(&["--height", "0"])]
    #[case(&["--landmarks", "0"])]
    #[case(&["--window", "0"])]
    #[case(&["--stats-interval-ms", "0"])]
    #[case(&["--jpeg-quality", "0"])]
    #[case(&["--jpeg-quality", "101"])]
    #[case(&["--stall-timeout-ms", "0"])]
    #[case(&["--presence-threshold", "1.5"])]
    #[case(&["--source", " "])]
    fn rejects_invalid_values(#[case] extra: &[&str]) {
        assert!(parse(extra).is_err());
    }

    #[test]
    fn classifier_is_required() {
        assert!(Harness::try_parse_from(["engagement"]).is_err());
    }
}
