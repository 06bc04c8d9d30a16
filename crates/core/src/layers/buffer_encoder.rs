//! Token embedding and projection that fill the thin stack's buffer.
//!
//! Embedding table shape: `[vocab_size, word_embedding_dim]`.
//! Projection (optional): `project_W` `[word_embedding_dim, model_dim]`, `project_b` `[model_dim]`.
//! Without a projection the embedding width must equal `model_dim`.

use candle_core::{Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder};

use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};
use crate::params::ProjectionParams;

#[derive(Debug, Clone)]
pub struct BufferEncoder {
    embeddings: Embedding,
    projection: Option<Linear>,
    vocab_size: usize,
}

impl BufferEncoder {
    pub fn new(
        spec: &ModelSpec,
        embeddings: Tensor,
        projection: Option<&ProjectionParams>,
    ) -> Result<Self> {
        let (vocab_size, emb_dim) = embeddings.dims2()?;
        if emb_dim != spec.embedding_dim() || (spec.vocab_size > 0 && vocab_size != spec.vocab_size)
        {
            return Err(ThinStackError::ParamShape {
                name: "embeddings",
                expected: vec![spec.vocab_size, spec.embedding_dim()],
                found: vec![vocab_size, emb_dim],
            });
        }

        let projection = match projection {
            Some(p) => {
                // candle's Linear stores [out, in]; checkpoints store [in, out].
                let weight = p.w.t()?.contiguous()?;
                Some(Linear::new(weight, p.b.clone()))
            }
            None if emb_dim != spec.model_dim => {
                return Err(ThinStackError::ParamShape {
                    name: "project_W",
                    expected: vec![emb_dim, spec.model_dim],
                    found: Vec::new(),
                })
            }
            None => None,
        };

        Ok(Self {
            embeddings: Embedding::new(embeddings, emb_dim),
            projection,
            vocab_size,
        })
    }

    /// Loads the `embeddings` table from `vb`.
    pub fn load(
        spec: &ModelSpec,
        vb: &VarBuilder,
        projection: Option<&ProjectionParams>,
    ) -> Result<Self> {
        if spec.vocab_size == 0 {
            return Err(ThinStackError::InvalidConfig(
                "vocab_size must be set to load embeddings".into(),
            ));
        }
        let embeddings = vb.get((spec.vocab_size, spec.embedding_dim()), "embeddings")?;
        Self::new(spec, embeddings, projection)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// `[B, T]` u32 token ids to `[B, T, model_dim]` buffer rows.
    pub fn encode(&self, token_ids: &Tensor) -> Result<Tensor> {
        Ok(self.forward(token_ids)?)
    }
}

impl Module for BufferEncoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let embedded = self.embeddings.forward(xs)?;
        match &self.projection {
            Some(linear) => linear.forward(&embedded),
            None => Ok(embedded),
        }
    }
}
