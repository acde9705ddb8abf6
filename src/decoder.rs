//! Fixed-length frame decoders for the two sensor families.
//!
//! Every frame starts with an 8 byte header (device timestamp, sequence number,
//! battery, status) followed by a body whose length depends on the family and the
//! [`FrameMode`]. A frame of any other length is rejected before a single field is read.
//!
//! | family  | mode   | endian | body                                    | total |
//! |---------|--------|--------|-----------------------------------------|-------|
//! | RESpeck | Normal | BE     | 32 x accel i16 (cm/s²)                  | 200   |
//! | RESpeck | Imu    | BE     | 16 x accel i16 + gyro i16 (0.1 deg/s)   | 200   |
//! | Thingy  | Normal | LE     | accel Q6.10, gyro Q11.5, mag Q12.4      | 26    |
//! | Thingy  | Imu    | LE     | accel, gyro, mag as f32                 | 44    |

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::sample::{DeviceFamily, RawBatch, RawSample, Vec3};

pub const HEADER_LEN: usize = 8;

pub const RESPECK_NORMAL_SAMPLES: usize = 32;
pub const RESPECK_IMU_SAMPLES: usize = 16;
const RESPECK_ACC_SCALE: f32 = 1.0 / 100.0;
const RESPECK_GYRO_SCALE: f32 = 1.0 / 10.0;

const THINGY_ACC_SCALE: f32 = 1.0 / 1024.0; // Q6.10
const THINGY_GYRO_SCALE: f32 = 1.0 / 32.0; // Q11.5
const THINGY_MAG_SCALE: f32 = 1.0 / 16.0; // Q12.4

const STATUS_CHARGING: u8 = 0b0000_0001;
const STATUS_HIGH_FREQUENCY: u8 = 0b0000_0010;

/// Frame variant within a device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Accelerometer-centric frame
    #[default]
    Normal,
    /// Full inertial / high-resolution frame
    Imu,
}

/// Bytes of a known fixed length in, `RawBatch` out
pub trait PacketDecoder: Send + Sync {
    fn family(&self) -> DeviceFamily;

    /// Exact frame size accepted for `mode`
    fn frame_len(&self, mode: FrameMode) -> usize;

    fn decode(&self, bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError>;

    fn check_len(&self, bytes: &[u8], mode: FrameMode) -> Result<(), DecodeError> {
        let expected = self.frame_len(mode);
        if bytes.len() != expected {
            return Err(DecodeError::Length {
                family: self.family(),
                mode,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(())
    }
}

/// Decoder for the primary chest sensor
#[derive(Debug, Clone, Copy, Default)]
pub struct RespeckDecoder;

/// Decoder for the secondary wrist sensor
#[derive(Debug, Clone, Copy, Default)]
pub struct ThingyDecoder;

static RESPECK: RespeckDecoder = RespeckDecoder;
static THINGY: ThingyDecoder = ThingyDecoder;

/// Decoder instance for a family
pub fn decoder_for(family: DeviceFamily) -> &'static dyn PacketDecoder {
    match family {
        DeviceFamily::Respeck => &RESPECK,
        DeviceFamily::Thingy => &THINGY,
    }
}

/// Decode one frame of `family`
pub fn decode(family: DeviceFamily, bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError> {
    decoder_for(family).decode(bytes, mode)
}

/// Header fields common to both families; battery not yet range-checked
struct Header {
    seq: u16,
    device_timestamp: i64,
    battery: u8,
    flags: u8,
}

impl Header {
    fn read_respeck<R: Read>(r: &mut R) -> io::Result<Self> {
        let device_timestamp = r.read_u32::<BigEndian>()? as i64;
        let seq = r.read_u16::<BigEndian>()?;
        Ok(Header {
            seq,
            device_timestamp,
            battery: r.read_u8()?,
            flags: r.read_u8()?,
        })
    }

    fn read_thingy<R: Read>(r: &mut R) -> io::Result<Self> {
        let seq = r.read_u16::<LittleEndian>()?;
        let device_timestamp = r.read_u32::<LittleEndian>()? as i64;
        Ok(Header {
            seq,
            device_timestamp,
            battery: r.read_u8()?,
            flags: r.read_u8()?,
        })
    }

    fn high_frequency(&self) -> bool {
        self.flags & STATUS_HIGH_FREQUENCY != 0
    }

    fn into_batch(
        self,
        family: DeviceFamily,
        samples: Vec<RawSample>,
    ) -> Result<RawBatch, DecodeError> {
        if self.battery > 100 {
            return Err(DecodeError::Battery(self.battery));
        }
        Ok(RawBatch {
            family,
            samples,
            seq: self.seq,
            device_timestamp: self.device_timestamp,
            battery: self.battery,
            charging: self.flags & STATUS_CHARGING != 0,
        })
    }
}

fn read_scaled_vec3<B: ByteOrder, R: Read>(r: &mut R, scale: f32) -> io::Result<Vec3> {
    let x = r.read_i16::<B>()? as f32 * scale;
    let y = r.read_i16::<B>()? as f32 * scale;
    let z = r.read_i16::<B>()? as f32 * scale;
    Ok(Vec3::new(x, y, z))
}

fn read_float_vec3<B: ByteOrder, R: Read>(r: &mut R) -> io::Result<Vec3> {
    Ok(Vec3::new(r.read_f32::<B>()?, r.read_f32::<B>()?, r.read_f32::<B>()?))
}

fn read_respeck<R: Read>(r: &mut R, mode: FrameMode) -> io::Result<(Header, Vec<RawSample>)> {
    let header = Header::read_respeck(r)?;
    let count = match mode {
        FrameMode::Normal => RESPECK_NORMAL_SAMPLES,
        FrameMode::Imu => RESPECK_IMU_SAMPLES,
    };
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let acc = read_scaled_vec3::<BigEndian, _>(r, RESPECK_ACC_SCALE)?;
        let gyro = match mode {
            FrameMode::Normal => Vec3::ZERO,
            FrameMode::Imu => read_scaled_vec3::<BigEndian, _>(r, RESPECK_GYRO_SCALE)?,
        };
        samples.push(RawSample::new(acc, gyro).with_high_frequency(header.high_frequency()));
    }
    Ok((header, samples))
}

fn read_thingy<R: Read>(r: &mut R, mode: FrameMode) -> io::Result<(Header, Vec<RawSample>)> {
    let header = Header::read_thingy(r)?;
    let (acc, gyro, mag) = match mode {
        FrameMode::Normal => (
            read_scaled_vec3::<LittleEndian, _>(r, THINGY_ACC_SCALE)?,
            read_scaled_vec3::<LittleEndian, _>(r, THINGY_GYRO_SCALE)?,
            read_scaled_vec3::<LittleEndian, _>(r, THINGY_MAG_SCALE)?,
        ),
        FrameMode::Imu => (
            read_float_vec3::<LittleEndian, _>(r)?,
            read_float_vec3::<LittleEndian, _>(r)?,
            read_float_vec3::<LittleEndian, _>(r)?,
        ),
    };
    let sample = RawSample::new(acc, gyro)
        .with_mag(mag)
        .with_high_frequency(header.high_frequency());
    Ok((header, vec![sample]))
}

/// RESpeck body parser without the length pre-check
fn decode_respeck(bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError> {
    let (header, samples) =
        read_respeck(&mut Cursor::new(bytes), mode).map_err(|_| DecodeError::Truncated {
            family: DeviceFamily::Respeck,
            len: bytes.len(),
        })?;
    header.into_batch(DeviceFamily::Respeck, samples)
}

/// Thingy body parser without the length pre-check
fn decode_thingy(bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError> {
    let (header, samples) =
        read_thingy(&mut Cursor::new(bytes), mode).map_err(|_| DecodeError::Truncated {
            family: DeviceFamily::Thingy,
            len: bytes.len(),
        })?;
    header.into_batch(DeviceFamily::Thingy, samples)
}

impl PacketDecoder for RespeckDecoder {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Respeck
    }

    fn frame_len(&self, mode: FrameMode) -> usize {
        match mode {
            FrameMode::Normal => HEADER_LEN + RESPECK_NORMAL_SAMPLES * 6,
            FrameMode::Imu => HEADER_LEN + RESPECK_IMU_SAMPLES * 12,
        }
    }

    fn decode(&self, bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError> {
        self.check_len(bytes, mode)?;
        decode_respeck(bytes, mode)
    }
}

impl PacketDecoder for ThingyDecoder {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Thingy
    }

    fn frame_len(&self, mode: FrameMode) -> usize {
        match mode {
            FrameMode::Normal => HEADER_LEN + 9 * 2,
            FrameMode::Imu => HEADER_LEN + 9 * 4,
        }
    }

    fn decode(&self, bytes: &[u8], mode: FrameMode) -> Result<RawBatch, DecodeError> {
        self.check_len(bytes, mode)?;
        decode_thingy(bytes, mode)
    }
}

/// Frame builders shared by tests across the crate
#[cfg(test)]
pub(crate) mod test_frames {
    use super::*;

    fn header_be(ts: u32, seq: u16, battery: u8, flags: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ts.to_be_bytes());
        out.extend_from_slice(&seq.to_be_bytes());
        out.push(battery);
        out.push(flags);
        out
    }

    /// RESpeck normal frame, every sample carries `acc` raw counts
    pub fn respeck_normal(seq: u16, ts: u32, acc: [i16; 3]) -> Vec<u8> {
        let mut out = header_be(ts, seq, 80, 0);
        for _ in 0..RESPECK_NORMAL_SAMPLES {
            for v in acc {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out
    }

    /// RESpeck normal frame whose sample `i` has x = `start + i` counts
    pub fn respeck_ramp(seq: u16, ts: u32, start: i16) -> Vec<u8> {
        let mut out = header_be(ts, seq, 80, 0);
        for i in 0..RESPECK_NORMAL_SAMPLES as i16 {
            for v in [start + i, 0, 981] {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out
    }

    pub fn respeck_imu(seq: u16, ts: u32, acc: [i16; 3], gyro: [i16; 3]) -> Vec<u8> {
        let mut out = header_be(ts, seq, 55, STATUS_CHARGING | STATUS_HIGH_FREQUENCY);
        for _ in 0..RESPECK_IMU_SAMPLES {
            for v in acc.iter().chain(gyro.iter()) {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out
    }

    pub fn thingy_normal(seq: u16, ts: u32, acc: [i16; 3], gyro: [i16; 3], mag: [i16; 3]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&ts.to_le_bytes());
        out.push(90);
        out.push(0);
        for v in acc.iter().chain(gyro.iter()).chain(mag.iter()) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn thingy_imu(seq: u16, ts: u32, values: [f32; 9]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&ts.to_le_bytes());
        out.push(90);
        out.push(STATUS_CHARGING);
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}
