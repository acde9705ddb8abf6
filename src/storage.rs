use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{NaiveDate, TimeZone, Utc};
use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::segmenter::ActivitySegment;

/// Row of the activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity_name: String,
    pub start_time: i64,
    pub end_time: i64,
}

impl ActivityRecord {
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }
}

impl From<ActivitySegment> for ActivityRecord {
    fn from(segment: ActivitySegment) -> Self {
        ActivityRecord {
            activity_name: segment.label,
            start_time: segment.start,
            end_time: segment.end,
        }
    }
}

/// Total time spent in one activity over a range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub activity_name: String,
    pub total_duration: i64,
}

impl ActivitySummary {
    pub fn formatted_duration(&self) -> String {
        format_duration(self.total_duration)
    }
}

/// `HH:MM:SS` from milliseconds, negative treated as zero
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// `[start, end)` epoch-millisecond bounds of a UTC calendar day
pub fn utc_day_bounds(date: NaiveDate) -> Option<(i64, i64)> {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
    let end = Utc.from_utc_datetime(&date.succ_opt()?.and_hms_opt(0, 0, 0)?);
    Some((start.timestamp_millis(), end.timestamp_millis()))
}

/// Durations grouped by activity for records starting in `[from, to)`, by name
pub fn summarize<'a>(
    records: impl IntoIterator<Item = &'a ActivityRecord>,
    from: i64,
    to: i64,
) -> Vec<ActivitySummary> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for record in records {
        if record.start_time >= from && record.start_time < to {
            *totals.entry(record.activity_name.as_str()).or_default() += record.duration_ms();
        }
    }
    totals
        .into_iter()
        .map(|(name, total)| ActivitySummary {
            activity_name: name.to_string(),
            total_duration: total,
        })
        .collect()
}

/// Persistence capability for closed activity segments
pub trait SegmentStore: Send + Sync {
    fn append(&self, record: ActivityRecord) -> Result<(), StorageError>;

    fn summary(&self, from: i64, to: i64) -> Result<Vec<ActivitySummary>, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;

    fn delete_all(&self) -> Result<(), StorageError>;
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("store lock poisoned".to_string())
}

/// Volatile store, used by tests and by the replay tool when no file is given
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl SegmentStore for MemorySegmentStore {
    fn append(&self, record: ActivityRecord) -> Result<(), StorageError> {
        self.records.lock().map_err(|_| poisoned())?.push(record);
        Ok(())
    }

    fn summary(&self, from: i64, to: i64) -> Result<Vec<ActivitySummary>, StorageError> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(summarize(records.iter(), from, to))
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.lock().map_err(|_| poisoned())?.len())
    }

    fn delete_all(&self) -> Result<(), StorageError> {
        self.records.lock().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Append-only JSON-lines file, one `ActivityRecord` per line
#[derive(Debug)]
pub struct JsonLinesSegmentStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSegmentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<ActivityRecord>, StorageError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl SegmentStore for JsonLinesSegmentStore {
    fn append(&self, record: ActivityRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn summary(&self, from: i64, to: i64) -> Result<Vec<ActivitySummary>, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let records = self.read_all()?;
        Ok(summarize(records.iter(), from, to))
    }

    fn count(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        Ok(self.read_all()?.len())
    }

    fn delete_all(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        File::create(&self.path)?;
        Ok(())
    }
}

/// Serializable dump of the log, with its per-activity totals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogExport {
    pub exported_at: String,
    pub record_count: usize,
    pub summary: Vec<ActivitySummary>,
}

impl ActivityLogExport {
    pub fn from_store(store: &dyn SegmentStore, from: i64, to: i64) -> Result<Self, StorageError> {
        Ok(ActivityLogExport {
            exported_at: Utc::now().to_rfc3339(),
            record_count: store.count()?,
            summary: store.summary(from, to)?,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Background writer: segments are queued without blocking and written in order
pub struct PersistenceWorker {
    tx: Option<Sender<ActivityRecord>>,
    handle: Option<JoinHandle<usize>>,
}

impl PersistenceWorker {
    pub fn spawn(store: Arc<dyn SegmentStore>) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded::<ActivityRecord>();
        let handle = std::thread::Builder::new()
            .name("segment-persistence".to_string())
            .spawn(move || {
                let mut written = 0usize;
                for record in rx {
                    match store.append(record.clone()) {
                        Ok(()) => written += 1,
                        Err(e) => log::error!(
                            "failed to persist {} segment [{}, {}]: {}",
                            record.activity_name,
                            record.start_time,
                            record.end_time,
                            e
                        ),
                    }
                }
                written
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Handle for other threads to enqueue records
    pub fn sender(&self) -> Option<Sender<ActivityRecord>> {
        self.tx.clone()
    }

    pub fn submit(&self, segment: ActivitySegment) {
        if let Some(tx) = &self.tx {
            if tx.send(segment.into()).is_err() {
                log::error!("persistence worker stopped, segment lost");
            }
        }
    }

    /// Close the queue, wait for pending writes, return how many succeeded.
    /// Senders handed out by [`Self::sender`] must be dropped first.
    pub fn shutdown(mut self) -> usize {
        self.tx.take();
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, start: i64, end: i64) -> ActivityRecord {
        ActivityRecord {
            activity_name: name.to_string(),
            start_time: start,
            end_time: end,
        }
    }

    struct FailingStore;

    impl SegmentStore for FailingStore {
        fn append(&self, _record: ActivityRecord) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk full".to_string()))
        }

        fn summary(&self, _from: i64, _to: i64) -> Result<Vec<ActivitySummary>, StorageError> {
            Ok(Vec::new())
        }

        fn count(&self) -> Result<usize, StorageError> {
            Ok(0)
        }

        fn delete_all(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(3_723_999), "01:02:03");
        assert_eq!(format_duration(-5), "00:00:00");
    }

    #[test]
    fn test_record_json_columns() {
        let json = serde_json::to_string(&record("lyingBack", 1, 2)).unwrap();
        assert_eq!(json, r#"{"activityName":"lyingBack","startTime":1,"endTime":2}"#);
    }

    #[test]
    fn test_memory_store_summary() {
        let store = MemorySegmentStore::new();
        store.append(record("running", 0, 60_000)).unwrap();
        store.append(record("sitting", 60_000, 90_000)).unwrap();
        store.append(record("running", 90_000, 100_000)).unwrap();
        store.append(record("running", 500_000, 600_000)).unwrap();

        let summary = store.summary(0, 200_000).unwrap();
        assert_eq!(
            summary,
            vec![
                ActivitySummary {
                    activity_name: "running".to_string(),
                    total_duration: 70_000
                },
                ActivitySummary {
                    activity_name: "sitting".to_string(),
                    total_duration: 30_000
                },
            ]
        );
        assert_eq!(summary[0].formatted_duration(), "00:01:10");
        assert_eq!(store.count().unwrap(), 4);

        store.delete_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_json_lines_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity_log.jsonl");
        {
            let store = JsonLinesSegmentStore::open(&path).unwrap();
            store.append(record("walking", 0, 1_000)).unwrap();
            store.append(record("walking", 2_000, 4_000)).unwrap();
        }

        let store = JsonLinesSegmentStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.summary(0, 10_000).unwrap()[0].total_duration, 3_000);

        store.delete_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_utc_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let (start, end) = utc_day_bounds(date).unwrap();
        assert_eq!(start, 1_704_153_600_000);
        assert_eq!(end - start, 86_400_000);
    }

    #[test]
    fn test_persistence_worker_writes_in_order() {
        let store = Arc::new(MemorySegmentStore::new());
        let worker = PersistenceWorker::spawn(store.clone()).unwrap();
        for i in 0..5 {
            worker.submit(ActivitySegment {
                label: format!("a{}", i),
                start: i,
                end: i + 1,
            });
        }
        assert_eq!(worker.shutdown(), 5);

        let names: Vec<String> = store.records().into_iter().map(|r| r.activity_name).collect();
        assert_eq!(names, vec!["a0", "a1", "a2", "a3", "a4"]);
    }

    #[test]
    fn test_persistence_failure_is_not_fatal() {
        let worker = PersistenceWorker::spawn(Arc::new(FailingStore)).unwrap();
        worker.submit(ActivitySegment {
            label: "walking".to_string(),
            start: 0,
            end: 1,
        });
        assert_eq!(worker.shutdown(), 0);
    }

    #[test]
    fn test_export_json() {
        let store = MemorySegmentStore::new();
        store.append(record("running", 0, 5_000)).unwrap();
        let export = ActivityLogExport::from_store(&store, 0, 10_000).unwrap();
        let json = export.to_json().unwrap();
        assert!(json.contains("\"recordCount\": 1"));
        assert!(json.contains("running"));
    }
}
