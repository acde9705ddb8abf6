//! Two-domain timestamp reconciliation.
//!
//! Samples arrive in batches: the device stamps the batch, the host stamps the moment it
//! received it, and the order of samples inside the batch is exact. Each batch moves a
//! pair of anchors forward in both clock domains and every sample gets a linear
//! interpolation between the previous and current anchor. Host anchors advance by the
//! nominal batch interval and only snap to the real arrival time when the two disagree
//! by more than `max_deviation_ms`, which smooths out host-side jitter while bounding
//! drift.

use serde::{Deserialize, Serialize};

/// Elapsed-time multiple of the nominal interval that counts as a stream restart
const RESTART_INTERVALS: f64 = 2.5;

/// Rolling anchors for one device. Reset on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceClockState {
    pub last_host: Option<i64>,
    pub current_host: Option<i64>,
    pub last_device: Option<i64>,
    pub current_device: Option<i64>,
    /// Newest host timestamp handed out for a sample
    pub last_corrected_host: Option<i64>,
    /// Newest device timestamp handed out for a sample
    pub last_corrected_device: Option<i64>,
}

/// Host and device timestamp for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleStamp {
    pub host: i64,
    pub device: i64,
}

/// Anchor pair chosen for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAnchors {
    pub last_host: i64,
    pub current_host: i64,
    pub last_device: i64,
    pub current_device: i64,
    /// The host anchor was taken from the arrival time rather than extrapolated
    pub snapped: bool,
}

#[derive(Debug, Clone)]
pub struct TimestampReconciler {
    average_batch_interval_ms: i64,
    max_deviation_ms: i64,
    state: DeviceClockState,
}

impl TimestampReconciler {
    pub fn new(average_batch_interval_ms: i64, max_deviation_ms: i64) -> Self {
        Self {
            average_batch_interval_ms,
            max_deviation_ms,
            state: DeviceClockState::default(),
        }
    }

    pub fn state(&self) -> &DeviceClockState {
        &self.state
    }

    /// Drop the anchors so the next batch's arrival time is taken as ground truth.
    /// Emitted-timestamp floors are kept so output stays monotonic.
    pub fn invalidate(&mut self) {
        self.state.last_host = None;
        self.state.current_host = None;
        self.state.last_device = None;
        self.state.current_device = None;
    }

    /// Forget everything, used when the device reconnects
    pub fn reset(&mut self) {
        self.state = DeviceClockState::default();
    }

    /// Advance the anchors for a batch received at `actual_host` carrying `device_ts`
    pub fn observe_batch(&mut self, actual_host: i64, device_ts: i64) -> BatchAnchors {
        let interval = self.average_batch_interval_ms;

        let last_host = match self.state.current_host {
            Some(current)
                if (current as f64 + RESTART_INTERVALS * interval as f64) >= actual_host as f64 =>
            {
                current
            }
            _ => actual_host - interval,
        };

        let extrapolated = last_host + interval;
        let snapped = (extrapolated - actual_host).abs() > self.max_deviation_ms;
        let current_host = if snapped { actual_host } else { extrapolated };

        let last_device = self.state.current_device.unwrap_or(device_ts - interval);
        let current_device = device_ts;

        self.state.last_host = Some(last_host);
        self.state.current_host = Some(current_host);
        self.state.last_device = Some(last_device);
        self.state.current_device = Some(current_device);

        BatchAnchors {
            last_host,
            current_host,
            last_device,
            current_device,
            snapped,
        }
    }

    /// Timestamps for sample `position` of `total` between the batch anchors
    pub fn stamp(&mut self, anchors: &BatchAnchors, position: usize, total: usize) -> SampleStamp {
        let host = interpolate(anchors.last_host, anchors.current_host, position, total);
        let device = interpolate(anchors.last_device, anchors.current_device, position, total);

        let host = self.state.last_corrected_host.map_or(host, |floor| host.max(floor));
        let device = self
            .state
            .last_corrected_device
            .map_or(device, |floor| device.max(floor));

        self.state.last_corrected_host = Some(host);
        self.state.last_corrected_device = Some(device);
        SampleStamp { host, device }
    }

    /// Stamp every sample of a `total`-sample batch
    pub fn reconcile(&mut self, actual_host: i64, device_ts: i64, total: usize) -> Vec<SampleStamp> {
        let anchors = self.observe_batch(actual_host, device_ts);
        if anchors.snapped {
            log::debug!(
                "host anchor snapped to arrival time {} (extrapolated {})",
                actual_host,
                anchors.last_host + self.average_batch_interval_ms
            );
        }
        (0..total)
            .map(|position| self.stamp(&anchors, position, total))
            .collect()
    }
}

/// `last + (current - last) * position / total`, truncated toward zero
pub fn interpolate(last: i64, current: i64, position: usize, total: usize) -> i64 {
    if total == 0 {
        return last;
    }
    let fraction = position as f64 / total as f64;
    ((current - last) as f64 * fraction) as i64 + last
}
