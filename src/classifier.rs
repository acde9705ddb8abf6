//! Classifier capability and the slots that bind a model to a window layout.
//!
//! The crate never depends on an ML runtime: anything that maps a fixed-length `f32`
//! tensor to a fixed-length score vector can be plugged in through [`Classifier`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, PResult, PipelineError};
use crate::gate::WindowPair;
use crate::window::{TensorOrder, WindowLayout};

/// Opaque model: fixed-shape tensor in, fixed-length scores out
pub trait Classifier: Send {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;
    fn classify(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

/// Index of the highest score. Ties go to the earlier index, NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Result of running one slot on one window pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub model: String,
    pub epoch: u64,
    pub timestamp: i64,
    pub index: usize,
    pub label: String,
    pub scores: Vec<f32>,
}

/// A model plus the input layout and label set it was trained with
pub struct ClassifierSlot {
    name: String,
    layout: WindowLayout,
    order: TensorOrder,
    labels: Vec<String>,
    feeds_segmenter: bool,
    classifier: Box<dyn Classifier>,
}

impl std::fmt::Debug for ClassifierSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierSlot")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("order", &self.order)
            .field("labels", &self.labels)
            .field("feeds_segmenter", &self.feeds_segmenter)
            .finish()
    }
}

impl ClassifierSlot {
    pub fn new(
        name: impl Into<String>,
        layout: WindowLayout,
        labels: Vec<String>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        Self {
            name: name.into(),
            layout,
            order: TensorOrder::SampleMajor,
            labels,
            feeds_segmenter: false,
            classifier,
        }
    }

    pub fn with_order(mut self, order: TensorOrder) -> Self {
        self.order = order;
        self
    }

    /// Labels from this slot drive the activity log
    pub fn driving_segments(mut self) -> Self {
        self.feeds_segmenter = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> WindowLayout {
        self.layout
    }

    pub fn feeds_segmenter(&self) -> bool {
        self.feeds_segmenter
    }

    /// Check the model's declared shapes against the window geometry
    pub fn validate(&self, window_size: usize, channels_per_device: usize) -> PResult<()> {
        let devices = match self.layout {
            WindowLayout::Single(_) => 1,
            WindowLayout::Interleaved => 2,
        };
        let expected = window_size * channels_per_device * devices;
        if self.classifier.input_len() != expected {
            return Err(PipelineError::InvalidConfig(format!(
                "classifier '{}' expects {} inputs, windows provide {}",
                self.name,
                self.classifier.input_len(),
                expected
            )));
        }
        if self.classifier.output_len() != self.labels.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "classifier '{}' has {} outputs but {} labels",
                self.name,
                self.classifier.output_len(),
                self.labels.len()
            )));
        }
        Ok(())
    }

    pub fn run(&self, pair: &WindowPair) -> Result<Classification, ClassifierError> {
        let input = pair.tensor(self.layout, self.order);
        if input.len() != self.classifier.input_len() {
            return Err(ClassifierError::InputShape {
                expected: self.classifier.input_len(),
                actual: input.len(),
            });
        }

        let scores = self.classifier.classify(&input)?;
        if scores.len() != self.classifier.output_len() {
            return Err(ClassifierError::OutputShape {
                expected: self.classifier.output_len(),
                actual: scores.len(),
            });
        }

        let index = argmax(&scores)
            .ok_or_else(|| ClassifierError::Model("no finite score".to_string()))?;
        let label = self
            .labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index));

        Ok(Classification {
            model: self.name.clone(),
            epoch: pair.epoch,
            timestamp: pair.released_at,
            index,
            label,
            scores,
        })
    }
}

/// Dense `scores = W · x + b` model loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub input_len: usize,
    /// One row of `input_len` weights per output class
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearClassifier {
    pub fn new(input_len: usize, weights: Vec<Vec<f32>>, bias: Vec<f32>) -> PResult<Self> {
        let model = Self {
            input_len,
            weights,
            bias,
        };
        model.check()?;
        Ok(model)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let model: LinearClassifier = serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> PResult<()> {
        if self.weights.len() != self.bias.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != self.input_len) {
            return Err(PipelineError::InvalidConfig(format!(
                "weight row has {} values, expected {}",
                row.len(),
                self.input_len
            )));
        }
        Ok(())
    }
}

impl Classifier for LinearClassifier {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.bias.len()
    }

    fn classify(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if input.len() != self.input_len {
            return Err(ClassifierError::InputShape {
                expected: self.input_len,
                actual: input.len(),
            });
        }
        Ok(self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::test_models::*;
    use super::*;
    use crate::gate::DualStreamGate;
    use crate::sample::{CorrectedSample, DeviceRole, Vec3};
    use crate::window::ChannelSet;

    fn released_pair(x: f32) -> WindowPair {
        let gate = DualStreamGate::new(2, ChannelSet::Accel);
        let mut released = None;
        for i in 0..2 {
            for role in DeviceRole::ALL {
                let sample = CorrectedSample {
                    host_timestamp: 1_000 + i,
                    device_timestamp: i,
                    index: i as u64,
                    acc: Vec3::new(x, 0.0, 1.0),
                    gyro: Vec3::ZERO,
                    mag: None,
                    high_frequency: false,
                    battery: 100,
                    charging: false,
                };
                released = gate.ingest(role, &sample).unwrap();
            }
        }
        released.unwrap()
    }

    fn labels() -> Vec<String> {
        vec!["walking".to_string(), "sitting".to_string()]
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NAN]), None);
    }

    #[test]
    fn test_slot_labels_window() {
        let slot = ClassifierSlot::new(
            "activity",
            WindowLayout::Interleaved,
            labels(),
            Box::new(SignClassifier {
                input_len: 12,
                stride: 6,
            }),
        );
        assert!(slot.validate(2, 3).is_ok());

        let result = slot.run(&released_pair(0.5)).unwrap();
        assert_eq!(result.label, "walking");
        assert_eq!(result.epoch, 1);
        assert_eq!(result.timestamp, 1_001);

        let result = slot.run(&released_pair(-0.5)).unwrap();
        assert_eq!(result.label, "sitting");
        assert_eq!(result.index, 1);
    }

    #[test]
    fn test_shape_mismatch_reported() {
        let slot = ClassifierSlot::new(
            "social",
            WindowLayout::Single(DeviceRole::Primary),
            labels(),
            Box::new(SignClassifier {
                input_len: 12,
                stride: 3,
            }),
        );
        assert!(slot.validate(2, 3).is_err());
        assert_eq!(
            slot.run(&released_pair(1.0)),
            Err(ClassifierError::InputShape {
                expected: 12,
                actual: 6
            })
        );
    }

    #[test]
    fn test_model_failure_propagates() {
        let slot = ClassifierSlot::new(
            "broken",
            WindowLayout::Single(DeviceRole::Secondary),
            labels(),
            Box::new(BrokenClassifier { input_len: 6 }),
        );
        assert!(matches!(
            slot.run(&released_pair(1.0)),
            Err(ClassifierError::Model(_))
        ));
    }

    #[test]
    fn test_linear_classifier() {
        let model = LinearClassifier::new(
            3,
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 1.0]],
            vec![0.0, -0.5],
        )
        .unwrap();

        assert_eq!(model.classify(&[2.0, 1.0, 1.0]).unwrap(), vec![2.0, 1.5]);
        assert!(model.classify(&[1.0]).is_err());
        assert!(LinearClassifier::new(2, vec![vec![1.0]], vec![0.0]).is_err());
        assert!(LinearClassifier::new(1, vec![vec![1.0]], vec![]).is_err());
    }

    #[test]
    fn test_linear_classifier_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"input_len": 2, "weights": [[1, 1], [-1, 0]], "bias": [0, 0]}"#)
            .unwrap();

        let model = LinearClassifier::from_json_file(&path).unwrap();
        assert_eq!(model.output_len(), 2);
        assert_eq!(argmax(&model.classify(&[-3.0, 1.0]).unwrap()), Some(1));
    }
}
