use std::collections::VecDeque;

use ndarray::{Array2, ShapeError};
use serde::{Deserialize, Serialize};

use crate::sample::{CorrectedSample, DeviceRole};

/// Feature channels taken from each sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSet {
    /// accel x/y/z
    #[default]
    Accel,
    /// accel x/y/z, gyro x/y/z
    AccelGyro,
}

impl ChannelSet {
    pub fn count(self) -> usize {
        match self {
            ChannelSet::Accel => 3,
            ChannelSet::AccelGyro => 6,
        }
    }
}

/// Element order of a flattened window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorOrder {
    /// `[s0c0, s0c1, .., s1c0, ..]`
    #[default]
    SampleMajor,
    /// `[c0s0, c0s1, .., c1s0, ..]`
    ChannelMajor,
}

/// Which device data a classifier consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowLayout {
    /// N x C from one device
    Single(DeviceRole),
    /// N x 2C, each row holds the primary channels then the secondary channels
    Interleaved,
}

/// A materialized, read-only window (rows are samples, columns are channels)
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    data: Array2<f32>,
}

impl Window {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// Rebuild a window from a flat tensor of `samples` x `channels`
    pub fn from_flat(
        flat: Vec<f32>,
        samples: usize,
        channels: usize,
        order: TensorOrder,
    ) -> Result<Self, ShapeError> {
        let data = match order {
            TensorOrder::SampleMajor => Array2::from_shape_vec((samples, channels), flat)?,
            TensorOrder::ChannelMajor => Array2::from_shape_vec((channels, samples), flat)?
                .reversed_axes()
                .as_standard_layout()
                .to_owned(),
        };
        Ok(Self { data })
    }

    pub fn samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Values of one channel, oldest first
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        self.data.column(channel).to_vec()
    }

    pub fn to_flat(&self, order: TensorOrder) -> Vec<f32> {
        match order {
            TensorOrder::SampleMajor => self.data.iter().copied().collect(),
            TensorOrder::ChannelMajor => self.data.t().iter().copied().collect(),
        }
    }

    /// Column-wise concatenation of two windows with the same sample count
    pub fn interleave(primary: &Window, secondary: &Window) -> Window {
        let samples = primary.samples().min(secondary.samples());
        let split = primary.channels();
        let data = Array2::from_shape_fn((samples, split + secondary.channels()), |(i, c)| {
            if c < split {
                primary.data[[i, c]]
            } else {
                secondary.data[[i, c - split]]
            }
        });
        Window { data }
    }
}

/// Fixed-capacity per-channel FIFO for one device
#[derive(Debug, Clone)]
pub struct SlidingWindowBuffer {
    capacity: usize,
    channels: ChannelSet,
    per_channel: Vec<VecDeque<f32>>,
    last_host_timestamp: Option<i64>,
}

impl SlidingWindowBuffer {
    /// Buffer of `capacity` zero-valued samples
    pub fn new(capacity: usize, channels: ChannelSet) -> Self {
        let per_channel = (0..channels.count())
            .map(|_| std::iter::repeat(0.0).take(capacity).collect())
            .collect();
        Self {
            capacity,
            channels,
            per_channel,
            last_host_timestamp: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_set(&self) -> ChannelSet {
        self.channels
    }

    /// Always equals capacity, the buffer is zero-filled from construction
    pub fn len(&self) -> usize {
        self.per_channel.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_host_timestamp(&self) -> Option<i64> {
        self.last_host_timestamp
    }

    /// Append one value per channel, evicting the oldest
    pub fn push_values(&mut self, values: &[f32]) {
        if self.capacity == 0 {
            return;
        }
        for (queue, &value) in self.per_channel.iter_mut().zip(values.iter()) {
            if queue.len() == self.capacity {
                queue.pop_front();
            }
            queue.push_back(value);
        }
    }

    pub fn push(&mut self, sample: &CorrectedSample) {
        let mut values = [0.0f32; 6];
        let count = self.channels.count();
        for (c, slot) in values.iter_mut().enumerate().take(count) {
            *slot = sample.channel(c);
        }
        self.push_values(&values[..count]);
        self.last_host_timestamp = Some(sample.host_timestamp);
    }

    /// Contents of one channel, oldest first
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        self.per_channel
            .get(channel)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Window {
        let data = Array2::from_shape_fn((self.capacity, self.per_channel.len()), |(i, c)| {
            self.per_channel[c][i]
        });
        Window::new(data)
    }

    /// Back to all zeros
    pub fn reset(&mut self) {
        for queue in &mut self.per_channel {
            queue.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, pushes: usize) -> SlidingWindowBuffer {
        let mut buffer = SlidingWindowBuffer::new(capacity, ChannelSet::Accel);
        for i in 0..pushes {
            let v = i as f32;
            buffer.push_values(&[v, v * 10.0, -v]);
        }
        buffer
    }

    #[test]
    fn test_cold_start_is_zero_filled() {
        let buffer = SlidingWindowBuffer::new(5, ChannelSet::AccelGyro);
        assert_eq!(buffer.len(), 5);
        let window = buffer.snapshot();
        assert_eq!((window.samples(), window.channels()), (5, 6));
        assert!(window.to_flat(TensorOrder::SampleMajor).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fifo_eviction() {
        let buffer = filled(4, 6);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.channel(0), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buffer.channel(1), vec![20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_flat_layouts() {
        let window = filled(2, 2).snapshot();
        assert_eq!(
            window.to_flat(TensorOrder::SampleMajor),
            vec![0.0, 0.0, -0.0, 1.0, 10.0, -1.0]
        );
        assert_eq!(
            window.to_flat(TensorOrder::ChannelMajor),
            vec![0.0, 1.0, 0.0, 10.0, -0.0, -1.0]
        );
    }

    #[test]
    fn test_flat_round_trip() {
        let window = filled(8, 11).snapshot();
        for order in [TensorOrder::SampleMajor, TensorOrder::ChannelMajor] {
            let rebuilt = Window::from_flat(window.to_flat(order), 8, 3, order).unwrap();
            assert_eq!(rebuilt, window);
            assert_eq!(rebuilt.channel(0), (3..11).map(|v| v as f32).collect::<Vec<_>>());
        }
        assert!(Window::from_flat(vec![0.0; 5], 2, 3, TensorOrder::SampleMajor).is_err());
    }

    #[test]
    fn test_interleave() {
        let a = filled(3, 3).snapshot();
        let mut other = SlidingWindowBuffer::new(3, ChannelSet::Accel);
        other.push_values(&[7.0, 8.0, 9.0]);
        let b = other.snapshot();

        let joined = Window::interleave(&a, &b);
        assert_eq!((joined.samples(), joined.channels()), (3, 6));
        let flat = joined.to_flat(TensorOrder::SampleMajor);
        assert_eq!(&flat[12..], &[2.0, 20.0, -2.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_reset_zeroes() {
        let mut buffer = filled(3, 5);
        buffer.reset();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.channel(2), vec![0.0, 0.0, 0.0]);
    }
}
