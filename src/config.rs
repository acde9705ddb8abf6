use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decoder::FrameMode;
use crate::error::{PResult, PipelineError};
use crate::sample::{DeviceFamily, DeviceRole};
use crate::window::ChannelSet;

/// Clock and framing parameters for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub family: DeviceFamily,
    #[serde(default)]
    pub mode: FrameMode,
    /// Nominal host-side spacing between two frames
    pub average_batch_interval_ms: i64,
    /// Largest tolerated gap between extrapolated and actual arrival time
    pub max_deviation_ms: i64,
}

impl DeviceConfig {
    /// 32-sample RESpeck batches at 25 Hz
    pub fn respeck() -> Self {
        DeviceConfig {
            family: DeviceFamily::Respeck,
            mode: FrameMode::Normal,
            average_batch_interval_ms: 1_280,
            max_deviation_ms: 400,
        }
    }

    /// One Thingy sample per frame at 25 Hz
    pub fn thingy() -> Self {
        DeviceConfig {
            family: DeviceFamily::Thingy,
            mode: FrameMode::Normal,
            average_batch_interval_ms: 40,
            max_deviation_ms: 400,
        }
    }
}

/// Pipeline tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per device per window (N)
    pub window_size: usize,
    pub channels: ChannelSet,
    pub sampling_frequency_hz: f32,
    /// Divisor from m/s² to g
    pub gravity: f32,
    pub primary: DeviceConfig,
    pub secondary: DeviceConfig,
    /// Released windows allowed to wait for the inference worker
    pub inference_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            window_size: 50,
            channels: ChannelSet::Accel,
            sampling_frequency_hz: 25.0,
            gravity: 9.81,
            primary: DeviceConfig::respeck(),
            secondary: DeviceConfig::thingy(),
            inference_queue: 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> PResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn device(&self, role: DeviceRole) -> &DeviceConfig {
        match role {
            DeviceRole::Primary => &self.primary,
            DeviceRole::Secondary => &self.secondary,
        }
    }

    /// Window duration implied by N and the sample rate
    pub fn window_duration_ms(&self) -> f32 {
        self.window_size as f32 * 1000.0 / self.sampling_frequency_hz
    }

    pub fn validate(&self) -> PResult<()> {
        if self.window_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_size must be positive".to_string(),
            ));
        }
        if self.sampling_frequency_hz <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "sampling_frequency_hz must be positive".to_string(),
            ));
        }
        if self.gravity <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "gravity must be positive".to_string(),
            ));
        }
        if self.inference_queue == 0 {
            return Err(PipelineError::InvalidConfig(
                "inference_queue must be positive".to_string(),
            ));
        }
        for role in DeviceRole::ALL {
            let device = self.device(role);
            if device.average_batch_interval_ms <= 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{:?} average_batch_interval_ms must be positive",
                    role
                )));
            }
            if device.max_deviation_ms < 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{:?} max_deviation_ms must not be negative",
                    role
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_duration_ms(), 2_000.0);
        assert_eq!(config.device(DeviceRole::Secondary).family, DeviceFamily::Thingy);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "window_size": 25,
                "channels": "accel_gyro",
                "primary": {
                    "family": "respeck",
                    "mode": "imu",
                    "average_batch_interval_ms": 640,
                    "max_deviation_ms": 200
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.window_size, 25);
        assert_eq!(config.channels, ChannelSet::AccelGyro);
        assert_eq!(config.primary.mode, FrameMode::Imu);
        assert_eq!(config.secondary, DeviceConfig::thingy());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = PipelineConfig {
            window_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.secondary.average_batch_interval_ms = 0;
        assert!(config.validate().is_err());

        assert!(PipelineConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "window_size": 10 }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.window_size, 10);
        assert!(PipelineConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
