//! Single-writer, multi-reader cells for the latest stats and frame.
//!
//! The pipeline owns the writer and replaces the whole value each tick;
//! readers clone the current value out and never hold the borrow across I/O.
//! Dropping the writer closes the cell, which ends every reader's stream.

use tokio::sync::watch;

use crate::engagement::data::{FramePacket, StatsSnapshot};

pub(crate) type StatsWriter = SnapshotWriter<StatsSnapshot>;
pub(crate) type StatsReader = SnapshotReader<StatsSnapshot>;
pub(crate) type FrameWriter = SnapshotWriter<Option<FramePacket>>;
pub(crate) type FrameReader = SnapshotReader<Option<FramePacket>>;

/// Create a cell holding `initial`.
pub(crate) fn snapshot_cell<T>(initial: T) -> (SnapshotWriter<T>, SnapshotReader<T>) {
    let (tx, rx) = watch::channel(initial);
    (SnapshotWriter { tx }, SnapshotReader { rx })
}

pub(crate) struct SnapshotWriter<T> {
    tx: watch::Sender<T>,
}

impl<T> SnapshotWriter<T> {
    /// Atomically replace the stored value.
    pub(crate) fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub(crate) fn reader_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub(crate) struct SnapshotReader<T> {
    rx: watch::Receiver<T>,
}

impl<T> Clone for SnapshotReader<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T: Clone> SnapshotReader<T> {
    /// Copy of the most recently published value.
    pub(crate) fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Copy of the most recent value, marking it as seen by [`Self::next`].
    pub(crate) fn latest(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Whether the writer has been dropped.
    pub(crate) fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Wait for a value this reader has not seen yet.
    ///
    /// Returns `None` once the writer is gone and every value was seen.
    pub(crate) async fn next(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl FrameReader {
    /// Wait for the next published frame, skipping anything older.
    pub(crate) async fn next_frame(&mut self) -> Option<FramePacket> {
        loop {
            if let Some(packet) = self.next().await? {
                return Some(packet);
            }
        }
    }
}
