//! Dedicated inference thread.
//!
//! Released window pairs are queued on a bounded channel; the worker runs every
//! classifier slot on each pair, feeds the segment-driving slot's labels to the
//! segmenter and hands closed segments to persistence. Producers never wait on it.

use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender, TrySendError};

use crate::classifier::ClassifierSlot;
use crate::events::{EventBus, SessionEvent};
use crate::gate::WindowPair;
use crate::segmenter::{ActivitySegment, ActivitySegmenter};
use crate::storage::ActivityRecord;

pub enum InferenceJob {
    Window(WindowPair),
    /// Close the open segment at this timestamp
    Finish(i64),
}

/// Counters returned when the worker is joined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceReport {
    pub windows: u64,
    pub classifications: u64,
    pub failures: u64,
    pub segments: u64,
}

/// What the worker hands back once joined; slots are reusable for the next recording
pub struct InferenceOutcome {
    pub report: InferenceReport,
    pub slots: Vec<ClassifierSlot>,
}

pub struct InferenceWorker {
    tx: Option<Sender<InferenceJob>>,
    handle: Option<JoinHandle<InferenceOutcome>>,
    dropped: u64,
}

struct WorkerState {
    slots: Vec<ClassifierSlot>,
    segmenter: ActivitySegmenter,
    events: EventBus,
    persistence: Option<Sender<ActivityRecord>>,
    report: InferenceReport,
}

impl WorkerState {
    fn run_window(&mut self, pair: WindowPair) {
        self.report.windows += 1;
        for slot in &self.slots {
            match slot.run(&pair) {
                Ok(classification) => {
                    self.report.classifications += 1;
                    if slot.feeds_segmenter() {
                        if let Some(segment) =
                            self.segmenter.observe(&classification.label, classification.timestamp)
                        {
                            Self::close_segment(
                                &self.events,
                                self.persistence.as_ref(),
                                &mut self.report,
                                segment,
                            );
                        }
                    }
                    self.events.publish(SessionEvent::Classified(classification));
                }
                Err(error) => {
                    self.report.failures += 1;
                    log::warn!(
                        "classifier '{}' failed on window {}: {}",
                        slot.name(),
                        pair.epoch,
                        error
                    );
                    self.events.publish(SessionEvent::ClassificationFailed {
                        model: slot.name().to_string(),
                        epoch: pair.epoch,
                        error,
                    });
                }
            }
        }
    }

    fn finish(&mut self, timestamp: i64) {
        if let Some(segment) = self.segmenter.finish(timestamp) {
            Self::close_segment(
                &self.events,
                self.persistence.as_ref(),
                &mut self.report,
                segment,
            );
        }
    }

    fn close_segment(
        events: &EventBus,
        persistence: Option<&Sender<ActivityRecord>>,
        report: &mut InferenceReport,
        segment: ActivitySegment,
    ) {
        report.segments += 1;
        log::info!(
            "segment closed: {} [{}, {}]",
            segment.label,
            segment.start,
            segment.end
        );
        if let Some(tx) = persistence {
            if tx.send(ActivityRecord::from(segment.clone())).is_err() {
                log::error!("persistence worker stopped, segment lost");
            }
        }
        events.publish(SessionEvent::SegmentClosed(segment));
    }
}

impl InferenceWorker {
    pub fn spawn(
        slots: Vec<ClassifierSlot>,
        queue: usize,
        events: EventBus,
        persistence: Option<Sender<ActivityRecord>>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<InferenceJob>(queue);
        let mut state = WorkerState {
            slots,
            segmenter: ActivitySegmenter::new(),
            events,
            persistence,
            report: InferenceReport::default(),
        };

        let handle = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        InferenceJob::Window(pair) => state.run_window(pair),
                        InferenceJob::Finish(timestamp) => state.finish(timestamp),
                    }
                }
                InferenceOutcome {
                    report: state.report,
                    slots: state.slots,
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Queue a window without blocking; a full queue drops it
    pub fn submit(&mut self, pair: WindowPair) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(InferenceJob::Window(pair)) {
            Ok(()) => true,
            Err(TrySendError::Full(InferenceJob::Window(pair))) => {
                self.dropped += 1;
                log::warn!("inference queue full, dropping window {}", pair.epoch);
                false
            }
            Err(_) => {
                log::error!("inference worker stopped");
                false
            }
        }
    }

    /// Windows dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drain queued windows, close the open segment at `termination`, join the thread
    pub fn finish(mut self, termination: i64) -> Option<InferenceOutcome> {
        if let Some(tx) = self.tx.take() {
            if tx.send(InferenceJob::Finish(termination)).is_err() {
                log::error!("inference worker stopped before the final segment was flushed");
            }
        }
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
