//! CSV recording of the corrected sample stream, one file per device.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crossbeam::channel::Receiver;
use serde::Serialize;

use crate::decoder::FrameMode;
use crate::error::StorageError;
use crate::events::SessionEvent;
use crate::sample::{CorrectedSample, DeviceFamily, DeviceRole};

// Rows are serialized without serde headers; the header is chosen per device family
#[derive(Debug, Serialize)]
struct NormalRow {
    phone_timestamp: i64,
    device_timestamp: i64,
    sequence_number: u64,
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,
}

#[derive(Debug, Serialize)]
struct ImuRow {
    phone_timestamp: i64,
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,
    gyro_x: f32,
    gyro_y: f32,
    gyro_z: f32,
}

const IMU_HEADER: [&str; 7] = [
    "Phone timestamp",
    "Accel X",
    "Accel Y",
    "Accel Z",
    "Gyro X",
    "Gyro Y",
    "Gyro Z",
];

fn device_timestamp_column(family: DeviceFamily) -> &'static str {
    match family {
        DeviceFamily::Respeck => "RESpeck timestamp",
        DeviceFamily::Thingy => "Thingy timestamp",
    }
}

pub struct CsvRecorder<W: Write> {
    writer: csv::Writer<W>,
    family: DeviceFamily,
    mode: FrameMode,
    header_written: bool,
    rows: u64,
}

impl CsvRecorder<File> {
    pub fn create(
        path: impl AsRef<Path>,
        family: DeviceFamily,
        mode: FrameMode,
    ) -> Result<Self, StorageError> {
        let file = File::create(path)?;
        Ok(Self::from_writer(file, family, mode))
    }
}

impl<W: Write> CsvRecorder<W> {
    /// Header row is written with the first sample
    pub fn from_writer(writer: W, family: DeviceFamily, mode: FrameMode) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer),
            family,
            mode,
            header_written: false,
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        match self.mode {
            FrameMode::Normal => self.writer.write_record([
                "Phone timestamp",
                device_timestamp_column(self.family),
                "Sequence number",
                "Accel X",
                "Accel Y",
                "Accel Z",
            ])?,
            FrameMode::Imu => self.writer.write_record(IMU_HEADER)?,
        }
        self.header_written = true;
        Ok(())
    }

    pub fn record(&mut self, sample: &CorrectedSample) -> Result<(), StorageError> {
        if !self.header_written {
            self.write_header()?;
        }
        match self.mode {
            FrameMode::Normal => self.writer.serialize(NormalRow {
                phone_timestamp: sample.host_timestamp,
                device_timestamp: sample.device_timestamp,
                sequence_number: sample.index,
                accel_x: sample.acc.x,
                accel_y: sample.acc.y,
                accel_z: sample.acc.z,
            })?,
            FrameMode::Imu => self.writer.serialize(ImuRow {
                phone_timestamp: sample.host_timestamp,
                accel_x: sample.acc.x,
                accel_y: sample.acc.y,
                accel_z: sample.acc.z,
                gyro_x: sample.gyro.x,
                gyro_y: sample.gyro.y,
                gyro_z: sample.gyro.z,
            })?,
        }
        self.rows += 1;
        Ok(())
    }

    /// Record `role`'s samples from a session subscription until the session drops it
    pub fn drain(
        &mut self,
        events: &Receiver<SessionEvent>,
        role: DeviceRole,
    ) -> Result<u64, StorageError> {
        let before = self.rows;
        for event in events {
            if let SessionEvent::Sample { role: r, sample } = event {
                if r == role {
                    self.record(&sample)?;
                }
            }
        }
        self.flush()?;
        Ok(self.rows - before)
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, StorageError> {
        self.writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::sample::Vec3;

    fn sample(t: i64, index: u64) -> CorrectedSample {
        CorrectedSample {
            host_timestamp: t,
            device_timestamp: t - 500,
            index,
            acc: Vec3::new(0.5, -0.25, 1.0),
            gyro: Vec3::new(10.0, 0.0, -2.5),
            mag: None,
            high_frequency: false,
            battery: 90,
            charging: false,
        }
    }

    #[test]
    fn test_normal_rows() {
        let mut recorder =
            CsvRecorder::from_writer(Vec::new(), DeviceFamily::Respeck, FrameMode::Normal);
        recorder.record(&sample(1_000, 0)).unwrap();
        recorder.record(&sample(1_040, 1)).unwrap();
        assert_eq!(recorder.rows(), 2);

        let text = String::from_utf8(recorder.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Phone timestamp,RESpeck timestamp,Sequence number,Accel X,Accel Y,Accel Z"
        );
        assert_eq!(lines[1], "1000,500,0,0.5,-0.25,1.0");
        assert_eq!(lines[2], "1040,540,1,0.5,-0.25,1.0");
    }

    #[test]
    fn test_thingy_timestamp_column() {
        let mut recorder =
            CsvRecorder::from_writer(Vec::new(), DeviceFamily::Thingy, FrameMode::Normal);
        recorder.record(&sample(1_000, 0)).unwrap();

        let text = String::from_utf8(recorder.into_inner().unwrap()).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "Phone timestamp,Thingy timestamp,Sequence number,Accel X,Accel Y,Accel Z"
        );
    }

    #[test]
    fn test_nothing_written_without_samples() {
        let recorder = CsvRecorder::from_writer(Vec::new(), DeviceFamily::Thingy, FrameMode::Imu);
        assert!(recorder.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_imu_rows() {
        let mut recorder =
            CsvRecorder::from_writer(Vec::new(), DeviceFamily::Respeck, FrameMode::Imu);
        recorder.record(&sample(2_000, 7)).unwrap();

        let text = String::from_utf8(recorder.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Phone timestamp,Accel X,Accel Y,Accel Z,Gyro X,Gyro Y,Gyro Z"
        );
        assert_eq!(lines[1], "2000,0.5,-0.25,1.0,10.0,0.0,-2.5");
    }

    #[test]
    fn test_drain_filters_by_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("respeck.csv");

        let bus = EventBus::new();
        let rx = bus.subscribe(16);
        bus.publish(SessionEvent::Sample {
            role: DeviceRole::Primary,
            sample: sample(1_000, 0),
        });
        bus.publish(SessionEvent::Sample {
            role: DeviceRole::Secondary,
            sample: sample(1_010, 0),
        });
        bus.publish(SessionEvent::Sample {
            role: DeviceRole::Primary,
            sample: sample(1_040, 1),
        });
        drop(bus);

        let mut recorder =
            CsvRecorder::create(&path, DeviceFamily::Respeck, FrameMode::Normal).unwrap();
        assert_eq!(recorder.drain(&rx, DeviceRole::Primary).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
