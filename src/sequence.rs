use serde::{Deserialize, Serialize};

/// Outcome of a sequence-number continuity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapStatus {
    Continuous,
    /// 65535 followed by 0
    WrappedOk,
    /// Dropped or reordered batch
    Discontinuous,
}

impl GapStatus {
    pub fn is_discontinuous(self) -> bool {
        self == GapStatus::Discontinuous
    }
}

/// Per-device wrapping u16 counter check
#[derive(Debug, Clone, Default)]
pub struct SequenceGapDetector {
    last_seq: Option<u16>,
}

impl SequenceGapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` against the previous value and remember it.
    ///
    /// The very first value of a session is `Continuous` so startup does not warn.
    pub fn check(&mut self, seq: u16) -> GapStatus {
        let status = match self.last_seq {
            None => GapStatus::Continuous,
            Some(u16::MAX) if seq == 0 => GapStatus::WrappedOk,
            Some(last) if last != u16::MAX && seq == last + 1 => GapStatus::Continuous,
            Some(_) => GapStatus::Discontinuous,
        };
        self.last_seq = Some(seq);
        status
    }

    pub fn last_seq(&self) -> Option<u16> {
        self.last_seq
    }

    pub fn reset(&mut self) {
        self.last_seq = None;
    }
}
