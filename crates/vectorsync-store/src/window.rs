//! Receive windows: which sequences a node has confirmed for each producer.
//!
//! Windows are kept for diagnostics and snapshotting. Intervals are closed
//! and merged on insert, so adjacent or overlapping ranges collapse into one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use vectorsync_core::NodeId;

/// Merged closed intervals of received sequence numbers for one producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveWindow {
    /// start -> end (inclusive), non-overlapping and non-adjacent.
    intervals: BTreeMap<u64, u64>,
}

impl ReceiveWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `[start, end]` as received. Empty ranges are ignored.
    pub fn insert(&mut self, start: u64, end: u64) {
        if start > end {
            return;
        }
        let mut new_start = start;
        let mut new_end = end;

        // Absorb a predecessor that overlaps or touches the new range.
        if let Some((&s, &e)) = self.intervals.range(..=start).next_back() {
            if e.saturating_add(1) >= start {
                new_start = s;
                new_end = new_end.max(e);
                self.intervals.remove(&s);
            }
        }

        // Absorb every successor that starts inside or right after the range.
        let absorbed: Vec<(u64, u64)> = self
            .intervals
            .range(new_start..=new_end.saturating_add(1))
            .map(|(s, e)| (*s, *e))
            .collect();
        for (s, e) in absorbed {
            new_end = new_end.max(e);
            self.intervals.remove(&s);
        }

        self.intervals.insert(new_start, new_end);
    }

    /// Whether `seq` has been received.
    pub fn contains(&self, seq: u64) -> bool {
        self.intervals
            .range(..=seq)
            .next_back()
            .map(|(_, e)| seq <= *e)
            .unwrap_or(false)
    }

    /// The highest `n` such that `1..=n` has been received.
    pub fn contiguous_prefix(&self) -> u64 {
        match self.intervals.iter().next() {
            Some((1, e)) => *e,
            _ => 0,
        }
    }

    /// Ranges in `1..=up_to` not yet received.
    pub fn missing(&self, up_to: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut next = 1;
        for (&s, &e) in &self.intervals {
            if s > up_to {
                break;
            }
            if s > next {
                gaps.push((next, s - 1));
            }
            next = next.max(e.saturating_add(1));
        }
        if next <= up_to {
            gaps.push((next, up_to));
        }
        gaps
    }

    /// Iterate over the merged intervals in ascending order.
    pub fn intervals(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.intervals.iter().map(|(s, e)| (*s, *e))
    }

    /// Whether nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// One receive window per producer of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveWindows {
    windows: Vec<ReceiveWindow>,
}

impl ReceiveWindows {
    /// Create empty windows for a group of `group_size` producers.
    pub fn new(group_size: usize) -> Self {
        Self {
            windows: vec![ReceiveWindow::new(); group_size],
        }
    }

    /// Record `[start, end]` of `producer` as received. Unknown producers are ignored.
    pub fn insert(&mut self, producer: NodeId, start: u64, end: u64) {
        if let Some(window) = self.windows.get_mut(producer.slot()) {
            window.insert(start, end);
        }
    }

    /// The window for `producer`.
    pub fn get(&self, producer: NodeId) -> Option<&ReceiveWindow> {
        self.windows.get(producer.slot())
    }

    /// Iterate over `(producer, window)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ReceiveWindow)> {
        self.windows
            .iter()
            .enumerate()
            .map(|(i, w)| (NodeId(i as u64), w))
    }
}

/// Renders as `(nid:start-end)` for every interval of every producer.
impl fmt::Display for ReceiveWindows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (producer, window) in self.iter() {
            for (s, e) in window.intervals() {
                write!(f, "({}:{}-{})", producer, s, e)?;
            }
        }
        Ok(())
    }
}
