use serde::{Deserialize, Serialize};

/// Closed interval during which one label was continuously reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySegment {
    pub label: String,
    /// Epoch milliseconds
    pub start: i64,
    /// Epoch milliseconds
    pub end: i64,
}

impl ActivitySegment {
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmenterState {
    NoActivity,
    InActivity {
        label: String,
        start: i64,
        /// Latest time the label was reported
        last_seen: i64,
    },
}

/// Turns one label per window into labelled time segments.
///
/// A segment closes the moment a different label arrives (its end is the new label's
/// time) or when the session finishes.
#[derive(Debug, Clone)]
pub struct ActivitySegmenter {
    state: SegmenterState,
}

impl Default for ActivitySegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySegmenter {
    pub fn new() -> Self {
        Self {
            state: SegmenterState::NoActivity,
        }
    }

    pub fn state(&self) -> &SegmenterState {
        &self.state
    }

    /// Feed the label for the window classified at `t`.
    /// Returns the segment closed by this transition, if any.
    pub fn observe(&mut self, label: &str, t: i64) -> Option<ActivitySegment> {
        if let SegmenterState::InActivity {
            label: current,
            last_seen,
            ..
        } = &mut self.state
        {
            if current.as_str() == label {
                *last_seen = (*last_seen).max(t);
                return None;
            }
        }

        let closed = self.close(t);
        self.state = SegmenterState::InActivity {
            label: label.to_string(),
            start: closed.as_ref().map_or(t, |s| s.end),
            last_seen: t,
        };
        closed
    }

    /// Close the open segment at session termination time `t`
    pub fn finish(&mut self, t: i64) -> Option<ActivitySegment> {
        let closed = self.close(t);
        self.state = SegmenterState::NoActivity;
        closed
    }

    /// The open segment with its end advanced to the latest report
    pub fn open_segment(&self) -> Option<ActivitySegment> {
        match &self.state {
            SegmenterState::NoActivity => None,
            SegmenterState::InActivity {
                label,
                start,
                last_seen,
            } => Some(ActivitySegment {
                label: label.clone(),
                start: *start,
                end: (*last_seen).max(*start),
            }),
        }
    }

    fn close(&self, t: i64) -> Option<ActivitySegment> {
        match &self.state {
            SegmenterState::NoActivity => None,
            SegmenterState::InActivity { label, start, .. } => Some(ActivitySegment {
                label: label.clone(),
                start: *start,
                end: t.max(*start),
            }),
        }
    }
}
