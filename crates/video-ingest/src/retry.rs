//! What a reader does after a read that produced no frame.

use std::time::Duration;

use crate::types::SourceKind;

/// Consecutive failed reads after which a live source is given up on.
pub(crate) const MAX_CONSECUTIVE_FAILED_READS: u32 = 50;

const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadVerdict {
    /// Report an empty frame and try again after the delay.
    Retry(Duration),
    /// The source has no more frames.
    Exhausted,
    /// Too many failed reads in a row.
    GiveUp,
}

/// Counts consecutive failed reads for one source.
#[derive(Debug)]
pub(crate) struct FailedReads {
    kind: SourceKind,
    consecutive: u32,
    delivered: bool,
}

impl FailedReads {
    pub(crate) fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            consecutive: 0,
            delivered: false,
        }
    }

    pub(crate) fn frame_read(&mut self) {
        self.consecutive = 0;
        self.delivered = true;
    }

    pub(crate) fn read_failed(&mut self) -> ReadVerdict {
        // A file that already produced frames has reached its end.
        if self.kind == SourceKind::File && self.delivered {
            return ReadVerdict::Exhausted;
        }
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_FAILED_READS {
            return ReadVerdict::GiveUp;
        }
        let shift = (self.consecutive - 1).min(5);
        ReadVerdict::Retry((BASE_DELAY * (1 << shift)).min(MAX_DELAY))
    }
}
