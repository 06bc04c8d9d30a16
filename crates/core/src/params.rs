//! Learned parameters consumed by the thin stack.
//!
//! Weights use the checkpoint names:
//! `compose_W_l`, `compose_W_r`, `compose_b`, optionally `compose_W_ext` for a
//! tracking contribution, and `project_W` / `project_b` for the buffer
//! projection collaborator.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};

/// Composition weights: `W_l`, `W_r` are `[D, D]`, `b` is `[D]`, `W_ext` is
/// `[D, tracking_dim]` when present.
#[derive(Debug, Clone)]
pub struct ComposeParams {
    pub w_l: Tensor,
    pub w_r: Tensor,
    pub b: Tensor,
    pub w_ext: Option<Tensor>,
}

/// Embedding projection `word_embedding_dim -> model_dim`, stored input-major
/// (`[word_embedding_dim, model_dim]`).
#[derive(Debug, Clone)]
pub struct ProjectionParams {
    pub w: Tensor,
    pub b: Option<Tensor>,
}

/// Everything a thin stack receives from the loader. Never mutated by the
/// stack; clones share storage.
#[derive(Debug, Clone)]
pub struct ThinStackParameters {
    pub compose: ComposeParams,
    pub projection: Option<ProjectionParams>,
}

fn check_shape(name: &'static str, t: &Tensor, expected: &[usize]) -> Result<()> {
    if t.dims() != expected {
        return Err(ThinStackError::ParamShape {
            name,
            expected: expected.to_vec(),
            found: t.dims().to_vec(),
        });
    }
    Ok(())
}

impl ComposeParams {
    pub fn new(spec: &ModelSpec, w_l: Tensor, w_r: Tensor, b: Tensor) -> Result<Self> {
        let d = spec.model_dim;
        check_shape("compose_W_l", &w_l, &[d, d])?;
        check_shape("compose_W_r", &w_r, &[d, d])?;
        check_shape("compose_b", &b, &[d])?;
        Ok(Self {
            w_l: w_l.to_dtype(DType::F32)?,
            w_r: w_r.to_dtype(DType::F32)?,
            b: b.to_dtype(DType::F32)?,
            w_ext: None,
        })
    }

    pub fn with_ext(mut self, spec: &ModelSpec, w_ext: Tensor) -> Result<Self> {
        check_shape("compose_W_ext", &w_ext, &[spec.model_dim, spec.tracking_dim])?;
        self.w_ext = Some(w_ext.to_dtype(DType::F32)?);
        Ok(self)
    }

    pub fn model_dim(&self) -> usize {
        self.b.dims1().unwrap_or(0)
    }
}

impl ThinStackParameters {
    /// Shape-checked composition weights with no collaborator parameters.
    pub fn from_tensors(spec: &ModelSpec, w_l: Tensor, w_r: Tensor, b: Tensor) -> Result<Self> {
        Ok(Self {
            compose: ComposeParams::new(spec, w_l, w_r, b)?,
            projection: None,
        })
    }

    /// Loads every parameter present in `vb`. Composition weights are
    /// required; `compose_W_ext` and the projection are optional.
    pub fn load(spec: &ModelSpec, vb: &VarBuilder) -> Result<Self> {
        let d = spec.model_dim;
        let w_l = vb.get((d, d), "compose_W_l")?;
        let w_r = vb.get((d, d), "compose_W_r")?;
        let b = vb.get(d, "compose_b")?;
        let mut compose = ComposeParams::new(spec, w_l, w_r, b)?;

        if spec.tracking_dim > 0 && vb.contains_tensor("compose_W_ext") {
            let w_ext = vb.get((d, spec.tracking_dim), "compose_W_ext")?;
            compose = compose.with_ext(spec, w_ext)?;
        }

        let projection = if vb.contains_tensor("project_W") {
            let w = vb.get((spec.embedding_dim(), d), "project_W")?;
            let b = if vb.contains_tensor("project_b") {
                Some(vb.get(d, "project_b")?)
            } else {
                None
            };
            Some(ProjectionParams { w, b })
        } else {
            None
        };

        tracing::debug!(
            model_dim = d,
            has_ext = compose.w_ext.is_some(),
            has_projection = projection.is_some(),
            "Loaded thin stack parameters"
        );

        Ok(Self {
            compose,
            projection,
        })
    }
}

/// Creates a VarBuilder over safetensors weight files.
pub fn load_safetensors(paths: &[PathBuf], device: &Device) -> Result<VarBuilder<'static>> {
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, DType::F32, device)? };
    Ok(vb)
}
