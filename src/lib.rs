// Dual-sensor stream reconstruction and activity logging
// Decodes RESpeck/Thingy frames, aligns both streams into windows, classifies them
// and keeps a log of activity segments

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod gate;
pub mod inference;
pub mod pipeline;
pub mod reconciler;
pub mod recorder;
pub mod sample;
pub mod segmenter;
pub mod sequence;
pub mod session;
pub mod storage;
pub mod window;

pub use classifier::{argmax, Classification, Classifier, ClassifierSlot, LinearClassifier};
pub use config::{DeviceConfig, PipelineConfig};
pub use decoder::{decode, FrameMode, PacketDecoder};
pub use error::{ClassifierError, DecodeError, PResult, PipelineError, StorageError};
pub use events::SessionEvent;
pub use gate::{DualStreamGate, WindowPair};
pub use pipeline::{DeviceContext, DeviceStats, IngestOutcome};
pub use reconciler::{DeviceClockState, TimestampReconciler};
pub use recorder::CsvRecorder;
pub use sample::{CorrectedSample, DeviceFamily, DeviceRole, RawBatch, RawSample, Vec3};
pub use segmenter::{ActivitySegment, ActivitySegmenter};
pub use sequence::{GapStatus, SequenceGapDetector};
pub use session::{RecordingReport, Session, SessionMetadata, SessionState};
pub use storage::{
    ActivityLogExport, ActivityRecord, ActivitySummary, JsonLinesSegmentStore, MemorySegmentStore,
    SegmentStore,
};
pub use window::{ChannelSet, SlidingWindowBuffer, TensorOrder, Window, WindowLayout};
