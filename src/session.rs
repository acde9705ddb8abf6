use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDate, Utc};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierSlot;
use crate::config::PipelineConfig;
use crate::error::{PResult, PipelineError};
use crate::events::{EventBus, SessionEvent};
use crate::gate::DualStreamGate;
use crate::inference::{InferenceReport, InferenceWorker};
use crate::pipeline::{DeviceContext, DeviceStats};
use crate::sample::{CorrectedSample, DeviceRole};
use crate::storage::{utc_day_bounds, ActivityLogExport, PersistenceWorker, SegmentStore};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, nothing is ingested
    Idle,
    /// Frames are ingested and windows classified
    Recording,
    /// Frames are ignored, workers stay alive
    Paused,
}

/// Session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: String,
    pub state: SessionState,
    pub primary: DeviceStats,
    pub secondary: DeviceStats,
    pub windows_released: u64,
    pub windows_dropped: u64,
    /// Latest host timestamp handed to the window buffers in this recording
    pub last_sample_ts: Option<i64>,
    /// Events a full subscriber did not receive
    pub lost_events: u64,
}

impl SessionMetadata {
    fn device_mut(&mut self, role: DeviceRole) -> &mut DeviceStats {
        match role {
            DeviceRole::Primary => &mut self.primary,
            DeviceRole::Secondary => &mut self.secondary,
        }
    }
}

/// Totals for one finished recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingReport {
    pub inference: InferenceReport,
    pub windows_dropped: u64,
    pub segments_written: usize,
}

struct Workers {
    inference: InferenceWorker,
    persistence: PersistenceWorker,
}

/// One recording pipeline over both devices.
///
/// Each device's frames must be fed from a single producer; the two producers may run
/// on different threads. An ingest holds the state for reading until it is done, so a
/// concurrent stop waits for it and never races the reset.
pub struct Session {
    config: PipelineConfig,
    state: RwLock<SessionState>,
    metadata: Mutex<SessionMetadata>,
    devices: [Mutex<DeviceContext>; 2],
    gate: DualStreamGate,
    events: EventBus,
    store: Arc<dyn SegmentStore>,
    slots: Mutex<Vec<ClassifierSlot>>,
    workers: Mutex<Option<Workers>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> PResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Internal(format!("Failed to acquire {} lock", what)))
}

fn read_state(state: &RwLock<SessionState>) -> PResult<RwLockReadGuard<'_, SessionState>> {
    state
        .read()
        .map_err(|_| PipelineError::Internal("Failed to acquire state lock".to_string()))
}

fn write_state(state: &RwLock<SessionState>) -> PResult<RwLockWriteGuard<'_, SessionState>> {
    state
        .write()
        .map_err(|_| PipelineError::Internal("Failed to acquire state lock".to_string()))
}

impl Session {
    /// Create new session in Idle state
    pub fn new(
        config: PipelineConfig,
        slots: Vec<ClassifierSlot>,
        store: Arc<dyn SegmentStore>,
    ) -> PResult<Self> {
        config.validate()?;
        let channels = config.channels.count();
        for slot in &slots {
            slot.validate(config.window_size, channels)?;
        }
        if slots.iter().filter(|s| s.feeds_segmenter()).count() > 1 {
            return Err(PipelineError::InvalidConfig(
                "at most one classifier may drive the activity log".to_string(),
            ));
        }

        let metadata = SessionMetadata {
            session_id: format!("session_{}", Utc::now().timestamp_millis()),
            start_time: Utc::now().to_rfc3339(),
            state: SessionState::Idle,
            primary: DeviceStats::default(),
            secondary: DeviceStats::default(),
            windows_released: 0,
            windows_dropped: 0,
            last_sample_ts: None,
            lost_events: 0,
        };

        let devices = [
            Mutex::new(DeviceContext::new(
                DeviceRole::Primary,
                &config.primary,
                config.gravity,
            )),
            Mutex::new(DeviceContext::new(
                DeviceRole::Secondary,
                &config.secondary,
                config.gravity,
            )),
        ];

        Ok(Session {
            gate: DualStreamGate::new(config.window_size, config.channels),
            config,
            state: RwLock::new(SessionState::Idle),
            metadata: Mutex::new(metadata),
            devices,
            events: EventBus::new(),
            store,
            slots: Mutex::new(slots),
            workers: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SegmentStore> {
        Arc::clone(&self.store)
    }

    /// Bounded event feed; events are dropped for this subscriber while it is full
    pub fn subscribe(&self, capacity: usize) -> Receiver<SessionEvent> {
        self.events.subscribe(capacity)
    }

    /// Event feed that never drops, for recorders that must keep every sample.
    /// The consumer has to keep up or memory grows.
    pub fn subscribe_unbounded(&self) -> Receiver<SessionEvent> {
        self.events.subscribe_unbounded()
    }

    /// Transition to Recording state (Idle → Recording, Paused → Recording)
    pub fn start_recording(&self) -> PResult<()> {
        let mut state = write_state(&self.state)?;
        let mut meta = lock(&self.metadata, "metadata")?;

        match *state {
            SessionState::Idle => {
                let slots = std::mem::take(&mut *lock(&self.slots, "classifier")?);
                let persistence = PersistenceWorker::spawn(Arc::clone(&self.store))
                    .map_err(|e| PipelineError::Internal(format!("persistence worker: {}", e)))?;
                let inference = InferenceWorker::spawn(
                    slots,
                    self.config.inference_queue,
                    self.events.clone(),
                    persistence.sender(),
                )
                .map_err(|e| PipelineError::Internal(format!("inference worker: {}", e)))?;

                *lock(&self.workers, "worker")? = Some(Workers {
                    inference,
                    persistence,
                });
                *state = SessionState::Recording;
                meta.state = SessionState::Recording;
                meta.last_sample_ts = None;
                log::info!(
                    "{}: recording started, {} ms windows",
                    meta.session_id,
                    self.config.window_duration_ms()
                );
                Ok(())
            }
            SessionState::Recording => Err(PipelineError::AlreadyRunning),
            SessionState::Paused => {
                *state = SessionState::Recording;
                meta.state = SessionState::Recording;
                log::info!("{}: recording resumed", meta.session_id);
                Ok(())
            }
        }
    }

    /// Transition to Paused state (Recording → Paused)
    pub fn pause_recording(&self) -> PResult<()> {
        let mut state = write_state(&self.state)?;

        match *state {
            SessionState::Recording => {
                *state = SessionState::Paused;
                lock(&self.metadata, "metadata")?.state = SessionState::Paused;
                Ok(())
            }
            SessionState::Paused => Err(PipelineError::InvalidState("Already paused".to_string())),
            SessionState::Idle => Err(PipelineError::InvalidState("Not recording".to_string())),
        }
    }

    /// End the recording at `termination_ts`: drain inference, close the open
    /// segment, wait for persistence, return to Idle
    pub fn stop_recording(&self, termination_ts: i64) -> PResult<RecordingReport> {
        // Waits for in-flight ingests, later ones see Idle
        let mut state = write_state(&self.state)?;
        if *state == SessionState::Idle {
            return Err(PipelineError::NotRunning);
        }

        let workers = lock(&self.workers, "worker")?
            .take()
            .ok_or_else(|| PipelineError::Internal("Workers missing".to_string()))?;

        let windows_dropped = workers.inference.dropped();
        let outcome = workers
            .inference
            .finish(termination_ts)
            .ok_or_else(|| PipelineError::Internal("Inference worker panicked".to_string()))?;
        *lock(&self.slots, "classifier")? = outcome.slots;
        let segments_written = workers.persistence.shutdown();

        self.gate.reset()?;
        for device in &self.devices {
            lock(device, "device")?.reset();
        }

        *state = SessionState::Idle;
        let mut meta = lock(&self.metadata, "metadata")?;
        meta.state = SessionState::Idle;
        meta.lost_events = self.events.lost_events();
        log::info!(
            "{}: recording stopped, {} windows, {} segments written",
            meta.session_id,
            outcome.report.windows,
            segments_written
        );

        Ok(RecordingReport {
            inference: outcome.report,
            windows_dropped,
            segments_written,
        })
    }

    pub fn get_state(&self) -> PResult<SessionState> {
        Ok(*read_state(&self.state)?)
    }

    pub fn is_recording(&self) -> PResult<bool> {
        Ok(self.get_state()? == SessionState::Recording)
    }

    pub fn get_metadata(&self) -> PResult<SessionMetadata> {
        let mut meta = lock(&self.metadata, "metadata")?.clone();
        meta.lost_events = self.events.lost_events();
        Ok(meta)
    }

    /// Feed one frame from `role`, received at `host_ts`.
    /// Returns how many samples entered the window buffers; malformed frames count zero.
    pub fn ingest(&self, role: DeviceRole, bytes: &[u8], host_ts: i64) -> PResult<usize> {
        // Only accept frames while recording; held until the samples are in the gate
        let state = read_state(&self.state)?;
        if *state != SessionState::Recording {
            return Ok(0);
        }

        let (result, stats) = {
            let mut device = lock(&self.devices[role.index()], "device")?;
            let result = device.ingest(bytes, host_ts);
            (result, device.stats())
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                *lock(&self.metadata, "metadata")?.device_mut(role) = stats;
                self.events.publish(SessionEvent::FrameDropped { role, error });
                return Ok(0);
            }
        };

        if outcome.status.is_discontinuous() {
            self.events.publish(SessionEvent::Gap {
                role,
                status: outcome.status,
                seq: outcome.seq,
            });
        }

        let mut released = 0u64;
        for sample in &outcome.samples {
            if let Some(pair) = self.gate.ingest(role, sample)? {
                released += 1;
                if let Some(workers) = lock(&self.workers, "worker")?.as_mut() {
                    workers.inference.submit(pair);
                }
            }
            self.events.publish(SessionEvent::Sample {
                role,
                sample: sample.clone(),
            });
        }

        let dropped = lock(&self.workers, "worker")?
            .as_ref()
            .map_or(0, |w| w.inference.dropped());
        let mut meta = lock(&self.metadata, "metadata")?;
        *meta.device_mut(role) = stats;
        meta.windows_released += released;
        meta.windows_dropped = dropped;
        meta.last_sample_ts = meta
            .last_sample_ts
            .max(outcome.samples.last().map(|s| s.host_timestamp));

        Ok(outcome.samples.len())
    }

    /// Preview path: first sample of the frame stamped with `host_ts`, published but
    /// never windowed
    pub fn ingest_live(
        &self,
        role: DeviceRole,
        bytes: &[u8],
        host_ts: i64,
    ) -> PResult<Option<CorrectedSample>> {
        let mut device = lock(&self.devices[role.index()], "device")?;
        match device.ingest_live(bytes, host_ts) {
            Ok(Some(sample)) => {
                self.events.publish(SessionEvent::Sample {
                    role,
                    sample: sample.clone(),
                });
                Ok(Some(sample))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                self.events.publish(SessionEvent::FrameDropped { role, error });
                Ok(None)
            }
        }
    }

    /// Device reconnected: its sequence and clock history no longer apply
    pub fn reconnect(&self, role: DeviceRole) -> PResult<()> {
        lock(&self.devices[role.index()], "device")?.reset();
        Ok(())
    }

    /// Activity totals per label for records starting in `[from, to)`
    pub fn activity_summary(&self, from: i64, to: i64) -> PResult<ActivityLogExport> {
        Ok(ActivityLogExport::from_store(self.store.as_ref(), from, to)?)
    }

    /// Activity totals for one UTC calendar day
    pub fn daily_summary(&self, date: NaiveDate) -> PResult<ActivityLogExport> {
        let (from, to) = utc_day_bounds(date).ok_or_else(|| {
            PipelineError::InvalidState(format!("{} has no UTC day bounds", date))
        })?;
        self.activity_summary(from, to)
    }
}

impl Drop for Session {
    /// A session dropped mid-recording still closes and persists its open segment,
    /// ending it at the last ingested sample
    fn drop(&mut self) {
        let Some(workers) = self.workers.get_mut().ok().and_then(Option::take) else {
            return;
        };
        let termination_ts = self
            .metadata
            .get_mut()
            .ok()
            .and_then(|meta| meta.last_sample_ts)
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        if workers.inference.finish(termination_ts).is_none() {
            log::error!("inference worker panicked, open segment lost");
        }
        let written = workers.persistence.shutdown();
        log::info!(
            "session dropped while recording, {} segments written",
            written
        );
    }
}
