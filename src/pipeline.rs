//! Per-device ingestion: decode, sequence check, timestamp reconciliation.
//!
//! A [`DeviceContext`] holds all mutable state for one device and is owned by that
//! device's producer, so the two device pipelines never share anything until their
//! samples reach the gate.

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::decoder::{decoder_for, PacketDecoder};
use crate::error::DecodeError;
use crate::reconciler::{DeviceClockState, TimestampReconciler};
use crate::sample::{CorrectedSample, DeviceRole, RawBatch};
use crate::sequence::{GapStatus, SequenceGapDetector};

/// Counters for one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub frames: u64,
    pub dropped_frames: u64,
    pub gaps: u64,
    pub samples: u64,
}

/// Samples reconstructed from one frame
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub seq: u16,
    pub status: GapStatus,
    pub samples: Vec<CorrectedSample>,
}

pub struct DeviceContext {
    role: DeviceRole,
    config: DeviceConfig,
    gravity: f32,
    decoder: &'static dyn PacketDecoder,
    detector: SequenceGapDetector,
    reconciler: TimestampReconciler,
    next_index: u64,
    stats: DeviceStats,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("role", &self.role)
            .field("config", &self.config)
            .field("last_seq", &self.detector.last_seq())
            .field("clock", self.reconciler.state())
            .field("stats", &self.stats)
            .finish()
    }
}

impl DeviceContext {
    pub fn new(role: DeviceRole, config: &DeviceConfig, gravity: f32) -> Self {
        Self {
            role,
            config: config.clone(),
            gravity,
            decoder: decoder_for(config.family),
            detector: SequenceGapDetector::new(),
            reconciler: TimestampReconciler::new(
                config.average_batch_interval_ms,
                config.max_deviation_ms,
            ),
            next_index: 0,
            stats: DeviceStats::default(),
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn clock(&self) -> &DeviceClockState {
        self.reconciler.state()
    }

    pub fn last_seq(&self) -> Option<u16> {
        self.detector.last_seq()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<RawBatch, DecodeError> {
        self.stats.frames += 1;
        self.decoder.decode(bytes, self.config.mode).map_err(|e| {
            self.stats.dropped_frames += 1;
            log::warn!("{:?}: dropping frame: {}", self.role, e);
            e
        })
    }

    /// Full batch path: every sample gets an interpolated timestamp
    pub fn ingest(&mut self, bytes: &[u8], host_timestamp: i64) -> Result<IngestOutcome, DecodeError> {
        let batch = self.decode(bytes)?;

        let previous = self.detector.last_seq();
        let status = self.detector.check(batch.seq);
        match status {
            GapStatus::Continuous => {}
            GapStatus::WrappedOk => log::debug!("{:?}: sequence number wrapped", self.role),
            GapStatus::Discontinuous => {
                self.stats.gaps += 1;
                log::warn!(
                    "{:?}: unexpected sequence number, expected {}, received {}; resetting clock",
                    self.role,
                    previous.map_or(0, |p| p.wrapping_add(1)),
                    batch.seq
                );
                self.reconciler.invalidate();
            }
        }

        let stamps = self
            .reconciler
            .reconcile(host_timestamp, batch.device_timestamp, batch.len());

        let samples: Vec<CorrectedSample> = batch
            .samples
            .iter()
            .zip(stamps)
            .map(|(raw, stamp)| {
                let sample = CorrectedSample {
                    host_timestamp: stamp.host,
                    device_timestamp: stamp.device,
                    index: self.next_index,
                    acc: raw.acc.scaled(1.0 / self.gravity),
                    gyro: raw.gyro,
                    mag: raw.mag,
                    high_frequency: raw.high_frequency.unwrap_or(false),
                    battery: batch.battery,
                    charging: batch.charging,
                };
                self.next_index += 1;
                sample
            })
            .collect();
        self.stats.samples += samples.len() as u64;

        Ok(IngestOutcome {
            seq: batch.seq,
            status,
            samples,
        })
    }

    /// Live preview path: first sample only, stamped with the arrival time.
    /// `None` when the frame carries no samples.
    pub fn ingest_live(
        &mut self,
        bytes: &[u8],
        host_timestamp: i64,
    ) -> Result<Option<CorrectedSample>, DecodeError> {
        let batch = self.decode(bytes)?;
        let Some(raw) = batch.samples.first() else {
            return Ok(None);
        };

        let sample = CorrectedSample {
            host_timestamp,
            device_timestamp: batch.device_timestamp,
            index: self.next_index,
            acc: raw.acc.scaled(1.0 / self.gravity),
            gyro: raw.gyro,
            mag: raw.mag,
            high_frequency: raw.high_frequency.unwrap_or(false),
            battery: batch.battery,
            charging: batch.charging,
        };
        self.next_index += 1;
        self.stats.samples += 1;
        Ok(Some(sample))
    }

    /// Forget sequence and clock history, used on reconnect
    pub fn reset(&mut self) {
        self.detector.reset();
        self.reconciler.reset();
        log::info!("{:?}: device state reset", self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_frames::*;
    use crate::decoder::{FrameMode, RESPECK_NORMAL_SAMPLES};
    use approx::assert_relative_eq;

    fn respeck_context() -> DeviceContext {
        DeviceContext::new(DeviceRole::Primary, &DeviceConfig::respeck(), 9.81)
    }

    #[test]
    fn test_batch_is_spread_over_interval() {
        let mut ctx = respeck_context();
        let outcome = ctx.ingest(&respeck_normal(1, 5_000, [981, 0, -981]), 100_000).unwrap();

        assert_eq!(outcome.status, GapStatus::Continuous);
        assert_eq!(outcome.samples.len(), RESPECK_NORMAL_SAMPLES);
        assert_eq!(outcome.samples[0].host_timestamp, 100_000 - 1_280);
        assert_eq!(outcome.samples[1].host_timestamp, 100_000 - 1_280 + 40);
        assert_eq!(outcome.samples[31].index, 31);
        assert_relative_eq!(outcome.samples[0].acc.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(outcome.samples[0].acc.z, -1.0, epsilon = 1e-5);
        assert_eq!(outcome.samples[0].battery, 80);
    }

    #[test]
    fn test_consecutive_batches_are_contiguous() {
        let mut ctx = respeck_context();
        let first = ctx.ingest(&respeck_normal(1, 5_000, [0; 3]), 100_000).unwrap();
        let second = ctx.ingest(&respeck_normal(2, 6_280, [0; 3]), 101_300).unwrap();

        assert_eq!(second.status, GapStatus::Continuous);
        assert_eq!(second.samples[0].host_timestamp, 100_000);
        assert!(second.samples[0].host_timestamp > first.samples[31].host_timestamp);
        assert_eq!(second.samples[0].index, 32);
        assert_eq!(second.samples[0].device_timestamp, 5_000);
    }

    #[test]
    fn test_gap_resets_clock() {
        let mut ctx = respeck_context();
        ctx.ingest(&respeck_normal(1, 5_000, [0; 3]), 100_000).unwrap();
        let outcome = ctx.ingest(&respeck_normal(3, 7_560, [0; 3]), 102_560).unwrap();

        assert_eq!(outcome.status, GapStatus::Discontinuous);
        assert_eq!(ctx.stats().gaps, 1);
        // Arrival time is ground truth after a gap
        assert_eq!(ctx.clock().current_host, Some(102_560));
        assert_eq!(outcome.samples[0].host_timestamp, 102_560 - 1_280);
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut ctx = respeck_context();
        assert!(ctx.ingest(&[0u8; 12], 0).is_err());
        assert_eq!(ctx.stats().dropped_frames, 1);

        // The stream carries on afterwards
        let outcome = ctx.ingest(&respeck_normal(9, 0, [0; 3]), 10_000).unwrap();
        assert_eq!(outcome.status, GapStatus::Continuous);
        assert_eq!(ctx.stats().frames, 2);
    }

    #[test]
    fn test_thingy_single_sample_frames() {
        let mut ctx = DeviceContext::new(DeviceRole::Secondary, &DeviceConfig::thingy(), 9.81);
        let a = ctx
            .ingest(&thingy_normal(10, 0, [1024, 0, 0], [0; 3], [16, 16, 16]), 1_000)
            .unwrap();
        let b = ctx
            .ingest(&thingy_normal(11, 40, [1024, 0, 0], [0; 3], [16, 16, 16]), 1_041)
            .unwrap();

        assert_eq!(a.samples.len(), 1);
        assert_eq!(a.samples[0].host_timestamp, 960);
        assert_eq!(b.samples[0].host_timestamp, 1_000);
        assert_relative_eq!(a.samples[0].acc.x, 1.0 / 9.81, epsilon = 1e-6);
        assert!(a.samples[0].mag.is_some());
    }

    #[test]
    fn test_imu_mode() {
        let mut config = DeviceConfig::respeck();
        config.mode = FrameMode::Imu;
        let mut ctx = DeviceContext::new(DeviceRole::Primary, &config, 9.81);
        let outcome = ctx.ingest(&respeck_imu(0, 0, [0; 3], [100, 0, 0]), 50_000).unwrap();

        assert_eq!(outcome.samples.len(), 16);
        assert!(outcome.samples[0].high_frequency);
        assert!(outcome.samples[0].charging);
        assert_relative_eq!(outcome.samples[5].gyro.x, 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_live_path_uses_arrival_time() {
        let mut ctx = respeck_context();
        let sample = ctx
            .ingest_live(&respeck_ramp(4, 123, 100), 77_777)
            .unwrap()
            .unwrap();

        assert_eq!(sample.host_timestamp, 77_777);
        assert_eq!(sample.device_timestamp, 123);
        assert_relative_eq!(sample.acc.x, 1.0 / 9.81, epsilon = 1e-6);
        assert_eq!(ctx.last_seq(), None);
    }

    #[test]
    fn test_reset_on_reconnect() {
        let mut ctx = respeck_context();
        ctx.ingest(&respeck_normal(1, 0, [0; 3]), 10_000).unwrap();
        ctx.reset();
        assert_eq!(ctx.last_seq(), None);
        assert_eq!(ctx.clock(), &DeviceClockState::default());

        let outcome = ctx.ingest(&respeck_normal(500, 0, [0; 3]), 20_000).unwrap();
        assert_eq!(outcome.status, GapStatus::Continuous);
    }
}
