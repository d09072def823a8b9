use actix_web::web::Bytes;
use ml_core::Label;
use serde::Serialize;

/// Shown while a stat has no value yet.
pub(crate) const NOT_AVAILABLE: &str = "N/A";
/// Level reported when the extractor finds no face or the models reject a frame.
pub(crate) const NO_FACE: &str = "No face detected";

/// Latest encoded frame handed to video clients.
#[derive(Clone, Debug)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Bytes,
    pub(crate) frame_number: u64,
    pub(crate) timestamp_ms: i64,
}

/// Instantaneous classification outcome of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Level {
    /// No tick has completed yet.
    #[default]
    Pending,
    NoFace,
    Detected(Label),
}

/// Complete result of one pipeline tick, replaced as a whole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StatsSnapshot {
    pub(crate) fps: u32,
    pub(crate) level: Level,
    pub(crate) modus: Option<Label>,
}

impl StatsSnapshot {
    pub(crate) fn level_text(&self) -> String {
        match self.level {
            Level::Pending => NOT_AVAILABLE.to_string(),
            Level::NoFace => NO_FACE.to_string(),
            Level::Detected(label) => label.to_string(),
        }
    }

    pub(crate) fn modus_text(&self) -> String {
        self.modus
            .map(|label| label.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    pub(crate) fn to_event(self) -> StatsEvent {
        StatsEvent {
            fps: self.fps,
            level: self.level_text(),
            modus: self.modus_text(),
        }
    }
}

/// Wire form of a [`StatsSnapshot`].
#[derive(Serialize)]
pub(crate) struct StatsEvent {
    pub(crate) fps: u32,
    pub(crate) level: String,
    pub(crate) modus: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_reports_not_available() {
        let json = serde_json::to_value(StatsSnapshot::default().to_event()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"fps": 0, "level": "N/A", "modus": "N/A"})
        );
    }

    #[test]
    fn labels_render_as_strings() {
        let snapshot = StatsSnapshot {
            fps: 29,
            level: Level::Detected(Label(2)),
            modus: Some(Label(1)),
        };
        let json = serde_json::to_value(snapshot.to_event()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"fps": 29, "level": "2", "modus": "1"})
        );
    }

    #[test]
    fn no_face_keeps_modus() {
        let snapshot = StatsSnapshot {
            fps: 30,
            level: Level::NoFace,
            modus: Some(Label(3)),
        };
        assert_eq!(snapshot.level_text(), NO_FACE);
        assert_eq!(snapshot.modus_text(), "3");
    }
}
