use super::features::{FeatureRow, FEATURE_DIM};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Black-box classifier consumed by the technical model
///
/// Takes one feature row per tick and returns `[class_0, class_1]`
/// probabilities. Implementations must be stateless per call so a single
/// backend can be shared by several trading models.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, features: &[FeatureRow]) -> Result<[f64; 2], String>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model artifact {path} not found")]
    NotFound { path: String },

    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("model artifact is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("model artifact has wrong shape: {0}")]
    Shape(String),
}

/// Serialized weights of a [`LinearBackend`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearWeights {
    /// Window length the weights were trained for
    pub k: usize,
    /// `k` rows of `FEATURE_DIM` per-class weight pairs
    pub weights: Vec<Vec<[f64; 2]>>,
    pub bias: [f64; 2],
}

/// Softmax-linear classifier over the flattened feature window
#[derive(Debug, Clone)]
pub struct LinearBackend {
    weights: LinearWeights,
}

impl LinearBackend {
    pub fn new(weights: LinearWeights) -> Result<Self, ModelLoadError> {
        if weights.weights.len() != weights.k {
            return Err(ModelLoadError::Shape(format!(
                "expected {} weight rows, found {}",
                weights.k,
                weights.weights.len()
            )));
        }
        if let Some((i, row)) = weights
            .weights
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != FEATURE_DIM)
        {
            return Err(ModelLoadError::Shape(format!(
                "row {} has {} features, expected {}",
                i,
                row.len(),
                FEATURE_DIM
            )));
        }
        let all_finite = weights
            .weights
            .iter()
            .flatten()
            .flatten()
            .chain(weights.bias.iter())
            .all(|w| w.is_finite());
        if !all_finite {
            return Err(ModelLoadError::Shape("non-finite weight".to_string()));
        }

        Ok(Self { weights })
    }

    /// Load weights from a JSON artifact
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::NotFound {
                path: path.display().to_string(),
            });
        }

        let raw = std::fs::read_to_string(path)?;
        let weights: LinearWeights = serde_json::from_str(&raw)?;
        let backend = Self::new(weights)?;

        tracing::info!(path = %path.display(), k = backend.k(), "Loaded linear model weights");
        Ok(backend)
    }

    pub fn k(&self) -> usize {
        self.weights.k
    }
}

impl InferenceBackend for LinearBackend {
    fn infer(&self, features: &[FeatureRow]) -> Result<[f64; 2], String> {
        if features.len() != self.weights.k {
            return Err(format!(
                "model expects {} rows, got {}",
                self.weights.k,
                features.len()
            ));
        }

        let mut logits = self.weights.bias;
        for (row, weights) in features.iter().zip(&self.weights.weights) {
            for (value, pair) in row.iter().zip(weights) {
                logits[0] += *value as f64 * pair[0];
                logits[1] += *value as f64 * pair[1];
            }
        }

        // Numerically stable softmax
        let max = logits[0].max(logits[1]);
        let e0 = (logits[0] - max).exp();
        let e1 = (logits[1] - max).exp();
        let sum = e0 + e1;

        Ok([e0 / sum, e1 / sum])
    }

    fn name(&self) -> &str {
        "linear-softmax"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(k: usize, up_weight: f64) -> LinearWeights {
        let mut row = vec![[0.0, 0.0]; FEATURE_DIM];
        // Price channel pushes towards class 1
        row[0] = [0.0, up_weight];
        LinearWeights {
            k,
            weights: vec![row; k],
            bias: [0.0, 0.0],
        }
    }

    #[test]
    fn test_zero_input_is_even() {
        let backend = LinearBackend::new(weights(3, 1.0)).unwrap();
        let out = backend.infer(&[[0.0; FEATURE_DIM]; 3]).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!((out[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_positive_price_channel_favours_up() {
        let backend = LinearBackend::new(weights(2, 1.0)).unwrap();
        let mut row = [0.0f32; FEATURE_DIM];
        row[0] = 1.0;
        let out = backend.infer(&[row, row]).unwrap();
        assert!(out[1] > out[0]);
        assert!((out[0] + out[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_window_length() {
        let backend = LinearBackend::new(weights(3, 1.0)).unwrap();
        assert!(backend.infer(&[[0.0; FEATURE_DIM]; 2]).is_err());
    }

    #[test]
    fn test_shape_validation() {
        let mut bad = weights(3, 1.0);
        bad.weights.pop();
        assert!(matches!(LinearBackend::new(bad), Err(ModelLoadError::Shape(_))));

        let mut bad = weights(2, 1.0);
        bad.weights[1].pop();
        assert!(matches!(LinearBackend::new(bad), Err(ModelLoadError::Shape(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = LinearBackend::load(Path::new("/nonexistent/model.json"));
        assert!(matches!(result, Err(ModelLoadError::NotFound { .. })));
    }

    #[test]
    fn test_load_corrupt_file() {
        let path = std::env::temp_dir().join(format!("fxtrader-corrupt-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ not json").unwrap();

        let result = LinearBackend::load(&path);
        assert!(matches!(result, Err(ModelLoadError::Corrupt(_))));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_round_trip() {
        let path = std::env::temp_dir().join(format!("fxtrader-model-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string(&weights(4, 0.5)).unwrap()).unwrap();

        let backend = LinearBackend::load(&path).unwrap();
        assert_eq!(backend.k(), 4);

        std::fs::remove_file(&path).ok();
    }
}
