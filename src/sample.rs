use serde::{Deserialize, Serialize};

/// Sensor hardware family, selects the frame decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Chest-worn RESpeck, batched big-endian frames
    Respeck,
    /// Wrist-worn Thingy, single-sample little-endian frames
    Thingy,
}

/// Which of the two synchronized streams a device feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Primary,
    Secondary,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 2] = [DeviceRole::Primary, DeviceRole::Secondary];

    pub fn index(self) -> usize {
        match self {
            DeviceRole::Primary => 0,
            DeviceRole::Secondary => 1,
        }
    }
}

/// Three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// One sample as it came off the wire, physical units but not yet normalised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// m/s²
    pub acc: Vec3,
    /// deg/s
    pub gyro: Vec3,
    /// µT, only on frames that carry a magnetometer
    pub mag: Option<Vec3>,
    pub high_frequency: Option<bool>,
}

impl RawSample {
    pub fn new(acc: Vec3, gyro: Vec3) -> Self {
        Self {
            acc,
            gyro,
            mag: None,
            high_frequency: None,
        }
    }

    pub fn with_mag(mut self, mag: Vec3) -> Self {
        self.mag = Some(mag);
        self
    }

    pub fn with_high_frequency(mut self, high_frequency: bool) -> Self {
        self.high_frequency = Some(high_frequency);
        self
    }
}

/// Payload of one decoded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub family: DeviceFamily,
    pub samples: Vec<RawSample>,
    /// Wrapping device counter
    pub seq: u16,
    /// Device clock, milliseconds
    pub device_timestamp: i64,
    pub battery: u8,
    pub charging: bool,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A sample after timestamp reconciliation, ready for windowing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSample {
    /// Host clock, epoch milliseconds
    pub host_timestamp: i64,
    /// Device clock, milliseconds
    pub device_timestamp: i64,
    /// Running per-device sample counter since the session started
    pub index: u64,
    /// g
    pub acc: Vec3,
    pub gyro: Vec3,
    pub mag: Option<Vec3>,
    pub high_frequency: bool,
    pub battery: u8,
    pub charging: bool,
}

impl CorrectedSample {
    /// Feature channel by position: accel x/y/z then gyro x/y/z
    pub fn channel(&self, channel: usize) -> f32 {
        match channel {
            0 => self.acc.x,
            1 => self.acc.y,
            2 => self.acc.z,
            3 => self.gyro.x,
            4 => self.gyro.y,
            5 => self.gyro.z,
            _ => 0.0,
        }
    }
}
