use serde::{Deserialize, Serialize};

use crate::error::{Result, ThinStackError};

/// Nonlinearity applied by the composition unit after accumulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeActivation {
    /// Rectification, `max(x, 0)`.
    #[default]
    Relu,
    /// No nonlinearity.
    Identity,
}

/// Fixed shape of one thin stack.
///
/// `batch_size`, `model_dim` and `seq_length` size every core array. The
/// remaining dimensions belong to collaborators (embedding table, projection,
/// tracking unit, classifier) and are carried so one file describes the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub batch_size: usize,
    pub model_dim: usize,
    pub seq_length: usize,

    #[serde(default)]
    pub word_embedding_dim: Option<usize>,
    #[serde(default)]
    pub tracking_dim: usize,
    #[serde(default)]
    pub vocab_size: usize,
    #[serde(default)]
    pub num_classes: usize,
    #[serde(default)]
    pub compose_activation: ComposeActivation,
}

impl ModelSpec {
    pub fn new(batch_size: usize, model_dim: usize, seq_length: usize) -> Self {
        Self {
            batch_size,
            model_dim,
            seq_length,
            word_embedding_dim: None,
            tracking_dim: 0,
            vocab_size: 0,
            num_classes: 0,
            compose_activation: ComposeActivation::Relu,
        }
    }

    pub fn with_activation(mut self, activation: ComposeActivation) -> Self {
        self.compose_activation = activation;
        self
    }

    pub fn with_tracking_dim(mut self, tracking_dim: usize) -> Self {
        self.tracking_dim = tracking_dim;
        self
    }

    /// Embedding width; defaults to `model_dim` when no projection is used.
    pub fn embedding_dim(&self) -> usize {
        self.word_embedding_dim.unwrap_or(self.model_dim)
    }

    /// Rejects shapes no array can be allocated for.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("model_dim", self.model_dim),
            ("seq_length", self.seq_length),
            ("word_embedding_dim", self.embedding_dim()),
        ] {
            if value == 0 {
                return Err(ThinStackError::InvalidConfig(format!(
                    "{name} must be positive"
                )));
            }
        }
        // Offsets are computed in f32; keep every flat index exactly representable.
        let max_rows = self.batch_size.saturating_mul(self.seq_length);
        if max_rows > (1 << 24) {
            return Err(ThinStackError::InvalidConfig(format!(
                "batch_size * seq_length = {max_rows} exceeds 2^24 rows"
            )));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ThinStackError::InvalidConfig(e.to_string()))
    }
}
