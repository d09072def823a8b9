//! Majority-vote smoothing over the most recent classifier labels.

use std::collections::{BTreeMap, VecDeque};

use ml_core::Label;

/// Default window length, roughly five seconds at 30 fps.
pub(crate) const DEFAULT_WINDOW: usize = 150;

/// Fixed-capacity FIFO of labels.
///
/// The modus is only reported once the window is full so a half-filled
/// window of start-up frames cannot dominate the vote.
#[derive(Debug, Clone)]
pub(crate) struct SmoothingWindow {
    capacity: usize,
    labels: VecDeque<Label>,
}

impl SmoothingWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            labels: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a label, evicting the oldest one once full.
    pub(crate) fn push(&mut self, label: Label) {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
    }

    pub(crate) fn is_full(&self) -> bool {
        self.labels.len() == self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.labels.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Labels from oldest to newest.
    #[cfg(test)]
    pub(crate) fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Most frequent label of a full window; ties go to the lowest label.
    pub(crate) fn modus(&self) -> Option<Label> {
        if !self.is_full() {
            return None;
        }
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(*label).or_default() += 1;
        }
        let mut best: Option<(Label, usize)> = None;
        for (label, count) in counts {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((label, count));
            }
        }
        best.map(|(label, _)| label)
    }
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
